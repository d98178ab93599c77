//! Merge checkpoint outcomes back into the product table.

use crate::catalog::ProductTable;
use crate::checkpoint::Checkpoint;
use crate::models::{ProcessingOutcome, Result, ShopscribeError, UpdateMode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Counts for one export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Rows written, variant rows included
    pub rows: usize,
    pub products: usize,
    /// Products whose row carries generated content
    pub updated: usize,
    /// Products written unchanged after a failed generation
    pub failed: usize,
    /// Products with no outcome yet
    pub unprocessed: usize,
    /// Succeeded products whose stored text does not fit the current mode
    pub unmergeable: usize,
}

/// Writes an updated copy of the input table.
///
/// Only reads the checkpoint, so it is safe to call while a run is in
/// progress or after an interrupt.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    mode: UpdateMode,
}

impl Exporter {
    pub fn new(mode: UpdateMode) -> Self {
        Self { mode }
    }

    pub fn export(
        &self,
        table: &ProductTable,
        checkpoint: &Checkpoint,
        output_path: &Path,
    ) -> Result<ExportSummary> {
        let mut headers = table.headers().to_vec();
        let mut rows = table.rows().to_vec();

        // Target columns, appended when the input lacks them.
        let mut targets = Vec::new();
        for field in self.mode.target_fields() {
            let col = match table.column_index(field.column()) {
                Some(col) => col,
                None => {
                    headers.push(field.column().to_string());
                    for row in &mut rows {
                        row.push(String::new());
                    }
                    headers.len() - 1
                }
            };
            targets.push((field, col));
        }

        let records = table.records();
        let mut summary = ExportSummary {
            rows: rows.len(),
            products: records.len(),
            ..ExportSummary::default()
        };

        let target_fields = self.mode.target_fields();
        for record in &records {
            let Some(entry) = checkpoint.get(&record.handle) else {
                summary.unprocessed += 1;
                continue;
            };
            match entry.outcome() {
                ProcessingOutcome::Succeeded { .. } if entry.fields != target_fields => {
                    warn!(
                        handle = %record.handle,
                        generated_for = ?entry.fields,
                        exporting = ?target_fields,
                        "Stored output was generated for other fields, row left unchanged"
                    );
                    summary.unmergeable += 1;
                }
                ProcessingOutcome::Succeeded { generated } => {
                    match self.mode.apply(record, &generated) {
                        Ok(updated) => {
                            let row = &mut rows[record.row_index];
                            for (field, col) in &targets {
                                row[*col] = updated.field(*field).unwrap_or_default().to_string();
                            }
                            summary.updated += 1;
                        }
                        Err(e) => {
                            warn!(handle = %record.handle, error = %e, "Stored output does not fit update mode, row left unchanged");
                            summary.unmergeable += 1;
                        }
                    }
                }
                ProcessingOutcome::Failed { .. } => summary.failed += 1,
                ProcessingOutcome::Pending => summary.unprocessed += 1,
            }
        }

        ProductTable::write_rows(output_path, &headers, &rows)
            .map_err(|e| ShopscribeError::export_io("writing export", e))?;

        info!(
            output = %output_path.display(),
            rows = summary.rows,
            updated = summary.updated,
            failed = summary.failed,
            unprocessed = summary.unprocessed,
            unmergeable = summary.unmergeable,
            "Export written"
        );
        Ok(summary)
    }
}

/// Write every row of the next `count` products without a successful
/// outcome to `output_path`. Returns the number of products extracted.
pub fn extract_pending(
    table: &ProductTable,
    checkpoint: &Checkpoint,
    count: usize,
    output_path: &Path,
) -> Result<usize> {
    let records = table.records();
    let selected: HashSet<&str> = checkpoint
        .unfinished(&records)
        .take(count)
        .map(|r| r.handle.as_str())
        .collect();

    let rows: Vec<Vec<String>> = (0..table.len())
        .filter(|&row| selected.contains(table.handle(row)))
        .map(|row| table.rows()[row].clone())
        .collect();

    ProductTable::write_rows(output_path, table.headers(), &rows)
        .map_err(|e| ShopscribeError::export_io("writing extract", e))?;

    info!(
        output = %output_path.display(),
        products = selected.len(),
        rows = rows.len(),
        "Pending products extracted"
    );
    Ok(selected.len())
}
