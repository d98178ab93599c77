//! Shopify product-export table.
//!
//! The table keeps every row and every column of the input so the exporter
//! can write it back unchanged apart from the rewritten fields. Product
//! records are derived from it: one per handle, in order of first
//! appearance.

use crate::models::{columns, Record, Result, ShopscribeError};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use indexmap::IndexMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const UTF8_BOM: char = '\u{feff}';

/// Full contents of an export CSV.
#[derive(Debug, Clone)]
pub struct ProductTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    handle_col: usize,
}

impl ProductTable {
    /// Load a table from a CSV file.
    ///
    /// Fails with `Format` when the `Handle` column is missing, a row has
    /// the wrong number of fields, or a row has an empty handle.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ShopscribeError::io("opening input table", e))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ShopscribeError::format(path, format!("reading header: {e}")))?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if i == 0 {
                    h.trim_start_matches(UTF8_BOM).to_string()
                } else {
                    h.to_string()
                }
            })
            .collect();

        let handle_col = headers
            .iter()
            .position(|h| h.trim() == columns::HANDLE)
            .ok_or_else(|| {
                ShopscribeError::format(path, format!("missing required column '{}'", columns::HANDLE))
            })?;

        let mut rows = Vec::new();
        let mut record = StringRecord::new();
        loop {
            match reader.read_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {}
                Err(e) => return Err(ShopscribeError::format(path, e.to_string())),
            }
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let row: Vec<String> = record.iter().map(str::to_string).collect();
            if row[handle_col].trim().is_empty() {
                return Err(ShopscribeError::format(
                    path,
                    format!("empty handle on line {line}"),
                ));
            }
            rows.push(row);
        }

        info!(rows = rows.len(), columns = headers.len(), path = %path.display(), "Loaded product table");

        Ok(Self {
            headers,
            rows,
            handle_col,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by exact header name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    /// Handle of a row.
    pub fn handle(&self, row: usize) -> &str {
        self.rows[row][self.handle_col].trim()
    }

    /// Cell value, `None` for a missing column or a blank cell.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        let value = self.rows[row][col].as_str();
        (!value.trim().is_empty()).then_some(value)
    }

    /// One record per distinct handle, in order of first appearance.
    ///
    /// The record is read from the first row of a handle that carries a
    /// title; Shopify variant rows repeat the handle with blank product
    /// columns.
    pub fn records(&self) -> Vec<Record> {
        let mut product_rows: IndexMap<&str, usize> = IndexMap::new();
        for row in 0..self.rows.len() {
            let handle = self.handle(row);
            match product_rows.get(handle) {
                None => {
                    product_rows.insert(handle, row);
                }
                Some(&first) => {
                    if self.cell(first, columns::TITLE).is_none()
                        && self.cell(row, columns::TITLE).is_some()
                    {
                        product_rows.insert(handle, row);
                    }
                }
            }
        }

        let records: Vec<Record> = product_rows
            .into_iter()
            .map(|(handle, row)| self.record_at(handle, row))
            .collect();
        debug!(products = records.len(), "Derived product records");
        records
    }

    fn record_at(&self, handle: &str, row: usize) -> Record {
        let text = |column: &str| self.cell(row, column).map(|v| v.trim().to_string());
        Record {
            handle: handle.to_string(),
            title: text(columns::TITLE),
            // Kept verbatim so an appended export leaves the original body intact.
            description: self.cell(row, columns::BODY_HTML).map(str::to_string),
            vendor: text(columns::VENDOR),
            category: text(columns::PRODUCT_CATEGORY),
            product_type: text(columns::TYPE),
            sku: text(columns::VARIANT_SKU),
            price: text(columns::VARIANT_PRICE),
            image: text(columns::IMAGE_SRC),
            row_index: row,
        }
    }

    /// Write a table with the given headers and rows to `path`.
    ///
    /// Writes to a temp file beside the target and renames it into place.
    pub fn write_rows(path: &Path, headers: &[String], rows: &[Vec<String>]) -> std::io::Result<()> {
        let temp_path = temp_sibling(path);
        {
            let file = File::create(&temp_path)?;
            let mut writer = WriterBuilder::new().from_writer(file);
            writer.write_record(headers)?;
            for row in rows {
                writer.write_record(row)?;
            }
            let mut file = writer
                .into_inner()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path)
    }
}

/// `<name>.tmp` next to `path`.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EXPORT: &str = "\u{feff}Handle,Title,Body (HTML),Vendor,Variant SKU\n\
rose-oil,Rose Oil,<p>Rich rose</p>,Atelier,RO-1\n\
rose-oil,,,,RO-2\n\
amber-soap,Amber Soap,,Sudsy,AS-1\n";

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_preserves_rows_and_strips_bom() {
        let dir = TempDir::new().unwrap();
        let table = ProductTable::load(&write(&dir, "export.csv", EXPORT)).unwrap();
        assert_eq!(table.headers()[0], "Handle");
        assert_eq!(table.len(), 3);
        assert_eq!(table.handle(1), "rose-oil");
    }

    #[test]
    fn test_records_one_per_handle_in_order() {
        let dir = TempDir::new().unwrap();
        let table = ProductTable::load(&write(&dir, "export.csv", EXPORT)).unwrap();
        let records = table.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].handle, "rose-oil");
        assert_eq!(records[0].description.as_deref(), Some("<p>Rich rose</p>"));
        assert_eq!(records[0].row_index, 0);
        assert_eq!(records[1].handle, "amber-soap");
        assert_eq!(records[1].description, None);
        assert_eq!(records[1].product_type, None);
        assert_eq!(records[1].sku.as_deref(), Some("AS-1"));
        assert_eq!(records[1].price, None);
    }

    #[test]
    fn test_description_keeps_surrounding_whitespace() {
        let dir = TempDir::new().unwrap();
        let csv = "Handle,Title,Body (HTML)\nx, X ,\"\n  <p>Body</p>  \"\n";
        let table = ProductTable::load(&write(&dir, "export.csv", csv)).unwrap();
        let record = &table.records()[0];
        assert_eq!(record.title.as_deref(), Some("X"));
        assert_eq!(record.description.as_deref(), Some("\n  <p>Body</p>  "));
    }

    #[test]
    fn test_title_row_wins_over_earlier_variant_row() {
        let dir = TempDir::new().unwrap();
        let csv = "Handle,Title\nx,\nx,Real Title\n";
        let table = ProductTable::load(&write(&dir, "export.csv", csv)).unwrap();
        let records = table.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title.as_deref(), Some("Real Title"));
        assert_eq!(records[0].row_index, 1);
    }

    #[test]
    fn test_missing_handle_column_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.csv", "Title,Vendor\nA,B\n");
        assert!(matches!(
            ProductTable::load(&path),
            Err(ShopscribeError::Format { .. })
        ));
    }

    #[test]
    fn test_ragged_row_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.csv", "Handle,Title\na,A\nb,B,extra\n");
        assert!(matches!(
            ProductTable::load(&path),
            Err(ShopscribeError::Format { .. })
        ));
    }

    #[test]
    fn test_empty_handle_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.csv", "Handle,Title\n,A\n");
        assert!(matches!(
            ProductTable::load(&path),
            Err(ShopscribeError::Format { .. })
        ));
    }

    #[test]
    fn test_write_rows_round_trips_quoting() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.csv");
        let headers = vec!["Handle".to_string(), "Body (HTML)".to_string()];
        let rows = vec![vec!["a".to_string(), "<p>one, \"two\"</p>\nthree".to_string()]];
        ProductTable::write_rows(&out, &headers, &rows).unwrap();

        let table = ProductTable::load(&out).unwrap();
        assert_eq!(table.rows(), rows.as_slice());
        assert!(!temp_sibling(&out).exists());
    }
}
