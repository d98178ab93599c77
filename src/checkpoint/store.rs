//! Durable checkpoint log.
//!
//! One JSON object per line, appended and fsynced after every record. A
//! crash can only tear the final line; loading drops a torn tail and
//! compacts the log (write-then-rename, previous log kept as `.bak`).

use crate::checkpoint::{Checkpoint, CheckpointEntry};
use crate::models::{ProcessingOutcome, Result, ShopscribeError};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Append-only checkpoint store for one run key.
pub struct CheckpointStore {
    /// Directory for checkpoint files
    dir: PathBuf,
    /// Path to the log
    log_path: PathBuf,
    /// Path to the copy kept across compaction
    backup_path: PathBuf,
    /// Latest outcome per handle
    checkpoint: Checkpoint,
    /// Append handle
    log: File,
}

/// Result of reading a log from disk.
struct LoadedLog {
    checkpoint: Checkpoint,
    /// Parsed lines, including superseded ones
    lines: usize,
    /// Last line was torn or missing its newline
    dirty_tail: bool,
}

impl CheckpointStore {
    /// Derive the run key for an input file.
    ///
    /// `<file-stem>-<first 16 hex chars of SHA-256 of the canonical path>`.
    pub fn run_key(input: &Path) -> Result<String> {
        let canonical = input
            .canonicalize()
            .map_err(|e| ShopscribeError::io("resolving input path", e))?;
        let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
        let hash = format!("{digest:x}");

        let stem: String = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
            .collect();

        Ok(format!("{stem}-{}", &hash[..16]))
    }

    /// Path of the log for a run key.
    pub fn log_path(dir: &Path, run_key: &str) -> PathBuf {
        dir.join(format!("{run_key}.jsonl"))
    }

    /// Read a checkpoint without opening it for writing.
    ///
    /// Returns an empty checkpoint if none exists. Never creates or modifies
    /// files, so it is safe to call while a run is in progress.
    pub fn load(dir: &Path, run_key: &str) -> Result<Checkpoint> {
        let path = Self::log_path(dir, run_key);
        if !path.exists() {
            return Ok(Checkpoint::new());
        }
        Ok(read_log(&path)?.checkpoint)
    }

    /// Load the checkpoint for `run_key` and open it for appending.
    pub fn open(dir: &Path, run_key: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| ShopscribeError::checkpoint_io("creating checkpoint dir", e))?;

        let log_path = Self::log_path(dir, run_key);
        let backup_path = dir.join(format!("{run_key}.jsonl.bak"));

        let loaded = if log_path.exists() {
            read_log(&log_path)?
        } else {
            LoadedLog {
                checkpoint: Checkpoint::new(),
                lines: 0,
                dirty_tail: false,
            }
        };

        let needs_compaction = loaded.dirty_tail || loaded.lines > loaded.checkpoint.len();
        if loaded.checkpoint.is_empty() {
            info!(path = %log_path.display(), "Starting new checkpoint");
        } else {
            info!(
                entries = loaded.checkpoint.len(),
                path = %log_path.display(),
                "Resuming from checkpoint"
            );
        }

        let log = open_append(&log_path)?;
        let mut store = Self {
            dir: dir.to_path_buf(),
            log_path,
            backup_path,
            checkpoint: loaded.checkpoint,
            log,
        };

        if needs_compaction {
            store.compact()?;
        }

        Ok(store)
    }

    /// Append an entry and make it durable before returning.
    pub fn record(&mut self, entry: CheckpointEntry) -> Result<()> {
        let mut line = serde_json::to_vec(&entry)
            .map_err(|e| ShopscribeError::Internal(format!("Serializing checkpoint entry: {e}")))?;
        line.push(b'\n');

        self.log
            .write_all(&line)
            .map_err(|e| ShopscribeError::checkpoint_io("appending checkpoint entry", e))?;
        self.log
            .sync_data()
            .map_err(|e| ShopscribeError::checkpoint_io("syncing checkpoint", e))?;

        debug!(handle = %entry.handle, status = ?entry.status, "Checkpoint entry written");
        self.checkpoint.apply(entry);
        Ok(())
    }

    pub fn has_outcome(&self, handle: &str) -> bool {
        self.checkpoint.has_outcome(handle)
    }

    pub fn outcome(&self, handle: &str) -> Option<ProcessingOutcome> {
        self.checkpoint.outcome(handle)
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Rewrite the log with one line per handle (atomic write).
    pub fn compact(&mut self) -> Result<()> {
        // Backup existing log
        if self.log_path.exists() {
            fs::copy(&self.log_path, &self.backup_path)
                .map_err(|e| ShopscribeError::checkpoint_io("backing up checkpoint", e))?;
        }

        // Write to temp file
        let temp_path = self.log_path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&temp_path)
                .map_err(|e| ShopscribeError::checkpoint_io("creating temp checkpoint", e))?;
            for entry in self.checkpoint.entries() {
                let mut line = serde_json::to_vec(entry).map_err(|e| {
                    ShopscribeError::Internal(format!("Serializing checkpoint entry: {e}"))
                })?;
                line.push(b'\n');
                file.write_all(&line)
                    .map_err(|e| ShopscribeError::checkpoint_io("writing temp checkpoint", e))?;
            }
            file.sync_all()
                .map_err(|e| ShopscribeError::checkpoint_io("syncing temp checkpoint", e))?;
        }

        // Atomic rename
        fs::rename(&temp_path, &self.log_path)
            .map_err(|e| ShopscribeError::checkpoint_io("renaming checkpoint", e))?;
        sync_dir(&self.dir)?;

        self.log = open_append(&self.log_path)?;
        info!(entries = self.checkpoint.len(), "Checkpoint compacted");
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ShopscribeError::checkpoint_io("opening checkpoint log", e))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| ShopscribeError::checkpoint_io("syncing checkpoint dir", e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn read_log(path: &Path) -> Result<LoadedLog> {
    let bytes = fs::read(path).map_err(|e| ShopscribeError::checkpoint_io("reading checkpoint", e))?;
    let ends_clean = bytes.is_empty() || bytes.ends_with(b"\n");
    let segments: Vec<&[u8]> = bytes.split(|b| *b == b'\n').collect();
    let last = segments.len() - 1;

    let mut checkpoint = Checkpoint::new();
    let mut lines = 0;
    let mut dirty_tail = !ends_clean;

    for (i, segment) in segments.iter().enumerate() {
        if segment.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<CheckpointEntry>(segment) {
            Ok(entry) => {
                checkpoint.apply(entry);
                lines += 1;
            }
            Err(e) if i == last && !ends_clean => {
                warn!(line = i + 1, error = %e, "Dropping torn checkpoint line");
                dirty_tail = true;
            }
            Err(e) => {
                return Err(ShopscribeError::CheckpointCorrupt {
                    line: i + 1,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(LoadedLog {
        checkpoint,
        lines,
        dirty_tail,
    })
}
