//! In-memory view of a checkpoint log.
//!
//! Entries are kept in processing order; a later entry for the same handle
//! replaces the earlier one and moves to the end.

use crate::models::{ProcessingOutcome, ProductField, Record};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Persisted status of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Succeeded,
    Failed,
}

/// One line of the checkpoint log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Product handle
    pub handle: String,
    pub status: EntryStatus,
    /// Raw generated text, present when succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_description: Option<String>,
    /// Failure reason, present when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Generation calls made for this outcome
    #[serde(default)]
    pub attempts: u32,
    /// Fields the generated text was produced for
    #[serde(default = "default_fields")]
    pub fields: Vec<ProductField>,
    pub updated_at: DateTime<Utc>,
}

fn default_fields() -> Vec<ProductField> {
    vec![ProductField::Description]
}

impl CheckpointEntry {
    pub fn new(handle: &str, outcome: &ProcessingOutcome, attempts: u32) -> Self {
        let (status, new_description, error) = match outcome {
            ProcessingOutcome::Pending => (EntryStatus::Pending, None, None),
            ProcessingOutcome::Succeeded { generated } => {
                (EntryStatus::Succeeded, Some(generated.clone()), None)
            }
            ProcessingOutcome::Failed { reason } => {
                (EntryStatus::Failed, None, Some(reason.clone()))
            }
        };
        Self {
            handle: handle.to_string(),
            status,
            new_description,
            error,
            attempts,
            fields: default_fields(),
            updated_at: Utc::now(),
        }
    }

    /// Set the fields the outcome was generated for.
    pub fn with_fields(mut self, fields: Vec<ProductField>) -> Self {
        self.fields = fields;
        self
    }

    pub fn outcome(&self) -> ProcessingOutcome {
        match self.status {
            EntryStatus::Pending => ProcessingOutcome::Pending,
            EntryStatus::Succeeded => ProcessingOutcome::Succeeded {
                generated: self.new_description.clone().unwrap_or_default(),
            },
            EntryStatus::Failed => ProcessingOutcome::Failed {
                reason: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
        }
    }
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Latest outcome per handle.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    entries: IndexMap<String, CheckpointEntry>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an entry, replacing any earlier entry for the same handle.
    pub fn apply(&mut self, entry: CheckpointEntry) {
        self.entries.shift_remove(&entry.handle);
        self.entries.insert(entry.handle.clone(), entry);
    }

    pub fn get(&self, handle: &str) -> Option<&CheckpointEntry> {
        self.entries.get(handle)
    }

    pub fn outcome(&self, handle: &str) -> Option<ProcessingOutcome> {
        self.get(handle).map(CheckpointEntry::outcome)
    }

    pub fn has_outcome(&self, handle: &str) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn is_succeeded(&self, handle: &str) -> bool {
        self.get(handle)
            .is_some_and(|e| e.status == EntryStatus::Succeeded)
    }

    pub fn is_failed(&self, handle: &str) -> bool {
        self.get(handle)
            .is_some_and(|e| e.status == EntryStatus::Failed)
    }

    /// Entries in processing order.
    pub fn entries(&self) -> impl Iterator<Item = &CheckpointEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failed entries in processing order.
    pub fn failures(&self) -> impl Iterator<Item = &CheckpointEntry> {
        self.entries
            .values()
            .filter(|e| e.status == EntryStatus::Failed)
    }

    /// Counts over `records`; handles without a terminal outcome are pending.
    pub fn stats(&self, records: &[Record]) -> CheckpointStats {
        let mut stats = CheckpointStats::default();
        for record in records {
            match self.get(&record.handle).map(|e| e.status) {
                Some(EntryStatus::Succeeded) => stats.succeeded += 1,
                Some(EntryStatus::Failed) => stats.failed += 1,
                Some(EntryStatus::Pending) | None => stats.pending += 1,
            }
        }
        stats
    }

    /// Records without any successful outcome yet, in input order.
    pub fn unfinished<'a>(&'a self, records: &'a [Record]) -> impl Iterator<Item = &'a Record> {
        records.iter().filter(|r| !self.is_succeeded(&r.handle))
    }
}
