//! Resumable batch loop.
//!
//! Flow per record:
//! Checkpoint lookup → Retry Policy → Generator → UpdateMode check → Checkpoint append

use crate::checkpoint::{CheckpointEntry, CheckpointStore};
use crate::client::{DescriptionGenerator, GenerationRequest, SchemaMarkup};
use crate::models::{ProcessingOutcome, ProductField, Record, Result, UpdateMode};
use crate::retry::{seed_for, CallOutcome, RetryPolicy};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What to do with records whose latest outcome is `Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Process failed records again along with pending ones
    #[default]
    RetryFailed,
    /// Leave failed records alone
    SkipFailed,
    /// Process only records that failed before
    FailedOnly,
}

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub resume_policy: ResumePolicy,
    /// Maximum records to process in this run
    pub limit: Option<usize>,
    /// Pause between processed records
    pub inter_record_delay: Duration,
    /// Only process products that already have a description
    pub only_with_description: bool,
    pub show_progress: bool,
    /// Append schema.org Product markup to generated descriptions
    pub schema_markup: Option<SchemaMarkup>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resume_policy: ResumePolicy::default(),
            limit: None,
            inter_record_delay: Duration::from_secs(2),
            only_with_description: false,
            show_progress: true,
            schema_markup: None,
        }
    }
}

/// Statistics for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Records handed to the run
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Records skipped because of the checkpoint or a filter
    pub skipped: usize,
    /// Generation calls made, retries included
    pub calls: u32,
    /// Stopped early by the stop flag
    pub interrupted: bool,
    pub runtime_secs: f64,
}

impl RunSummary {
    /// Records processed in this run.
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Why a record is not processed in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    AlreadySucceeded,
    PreviouslyFailed,
    NotFailed,
    NoDescription,
}

/// Processes records one at a time, checkpointing each outcome.
pub struct BatchProcessor {
    generator: Arc<dyn DescriptionGenerator>,
    retry: RetryPolicy,
    mode: UpdateMode,
    language: String,
    options: RunOptions,
    stop: Option<Arc<AtomicBool>>,
}

impl BatchProcessor {
    pub fn new(
        generator: Arc<dyn DescriptionGenerator>,
        retry: RetryPolicy,
        mode: UpdateMode,
        language: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            retry,
            mode,
            language: language.into(),
            options: RunOptions::default(),
            stop: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Flag checked between records; once set the run stops cleanly.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn skip_reason(&self, record: &Record, store: &CheckpointStore) -> Option<SkipReason> {
        let checkpoint = store.checkpoint();
        if checkpoint.is_succeeded(&record.handle) {
            return Some(SkipReason::AlreadySucceeded);
        }
        let failed = checkpoint.is_failed(&record.handle);
        match self.options.resume_policy {
            ResumePolicy::SkipFailed if failed => return Some(SkipReason::PreviouslyFailed),
            ResumePolicy::FailedOnly if !failed => return Some(SkipReason::NotFailed),
            _ => {}
        }
        if self.options.only_with_description && !record.has_description() {
            return Some(SkipReason::NoDescription);
        }
        None
    }

    /// Run the batch over `records` in order.
    ///
    /// Per-record failures are recorded and never abort the run; a
    /// checkpoint write error does.
    pub async fn run(&self, records: &[Record], store: &mut CheckpointStore) -> Result<RunSummary> {
        let start = Instant::now();
        let total = records.len();

        info!(
            total_records = total,
            already_done = store.checkpoint().stats(records).succeeded,
            max_attempts = self.retry.max_attempts(),
            checkpoint = %store.path().display(),
            "Starting batch"
        );

        let pb = if self.options.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }

        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };
        let mut processed = 0usize;

        for record in records {
            if self.stop_requested() {
                summary.interrupted = true;
                break;
            }

            if let Some(reason) = self.skip_reason(record, store) {
                debug!(handle = %record.handle, reason = ?reason, "Skipping record");
                summary.skipped += 1;
                pb.inc(1);
                continue;
            }

            if self.options.limit.is_some_and(|limit| processed >= limit) {
                info!(limit = processed, "Record limit reached");
                break;
            }

            if processed > 0 && !self.options.inter_record_delay.is_zero() {
                tokio::time::sleep(self.options.inter_record_delay).await;
                if self.stop_requested() {
                    summary.interrupted = true;
                    break;
                }
            }

            let (outcome, attempts) = self.process_record(record).await;
            summary.calls += attempts;
            match &outcome {
                ProcessingOutcome::Succeeded { .. } => summary.succeeded += 1,
                ProcessingOutcome::Failed { reason } => {
                    summary.failed += 1;
                    warn!(handle = %record.handle, attempts = attempts, reason = %reason, "Record failed");
                }
                ProcessingOutcome::Pending => {}
            }
            store.record(
                CheckpointEntry::new(&record.handle, &outcome, attempts)
                    .with_fields(self.mode.target_fields()),
            )?;
            processed += 1;

            pb.inc(1);
            pb.set_message(format!(
                "ok: {}, failed: {}",
                summary.succeeded, summary.failed
            ));
        }

        summary.runtime_secs = start.elapsed().as_secs_f64();
        if summary.interrupted {
            pb.abandon_with_message("Interrupted");
        } else {
            pb.finish_with_message(format!(
                "Done! {} ok, {} failed",
                summary.succeeded, summary.failed
            ));
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            calls = summary.calls,
            interrupted = summary.interrupted,
            runtime_secs = summary.runtime_secs,
            "Batch finished"
        );

        Ok(summary)
    }

    /// Generate for one record and turn the result into an outcome.
    async fn process_record(&self, record: &Record) -> (ProcessingOutcome, u32) {
        let request =
            GenerationRequest::from_record(record, &self.language, self.mode.target_fields());
        let generator = &self.generator;
        let request = &request;

        let attempted = self
            .retry
            .execute(seed_for(&record.handle), move |attempt| {
                debug!(handle = %request.handle, attempt = attempt, "Generating");
                generator.generate(request)
            })
            .await;

        let outcome = match attempted.outcome {
            CallOutcome::Succeeded(generated) => match self.mode.apply(record, &generated) {
                Ok(_) => {
                    debug!(handle = %record.handle, chars = generated.len(), "Generated");
                    let generated = match &self.options.schema_markup {
                        Some(schema) if self.mode.target_fields() == [ProductField::Description] => {
                            schema.append_to(record, &generated)
                        }
                        _ => generated,
                    };
                    ProcessingOutcome::Succeeded { generated }
                }
                Err(e) => ProcessingOutcome::Failed {
                    reason: e.to_string(),
                },
            },
            CallOutcome::Failed(e) => ProcessingOutcome::Failed {
                reason: e.to_string(),
            },
        };
        (outcome, attempted.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Returns `"<p>{handle}</p>"`, failing for handles listed in `fail`.
    struct EchoGenerator {
        fail: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl EchoGenerator {
        fn new(fail: &[&str]) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DescriptionGenerator for EchoGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> std::result::Result<String, GenerationError> {
            self.calls.lock().unwrap().push(request.handle.clone());
            if self.fail.contains(&request.handle) {
                return Err(GenerationError::Rejected {
                    status: 400,
                    message: "bad request".to_string(),
                });
            }
            Ok(format!("<p>{}</p>", request.handle))
        }
    }

    fn records(handles: &[&str]) -> Vec<Record> {
        handles
            .iter()
            .map(|h| Record::new(*h).with_title(h.to_uppercase()).with_description("old"))
            .collect()
    }

    fn processor(generator: Arc<EchoGenerator>, options: RunOptions) -> BatchProcessor {
        BatchProcessor::new(generator, RetryPolicy::new(3), UpdateMode::Replace, "English")
            .with_options(options)
    }

    fn quiet() -> RunOptions {
        RunOptions {
            inter_record_delay: Duration::ZERO,
            show_progress: false,
            ..RunOptions::default()
        }
    }

    #[tokio::test]
    async fn test_skip_failed_policy() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "run").unwrap();
        let recs = records(&["a", "b"]);

        let generator = Arc::new(EchoGenerator::new(&["b"]));
        processor(generator.clone(), quiet()).run(&recs, &mut store).await.unwrap();
        assert!(store.checkpoint().is_failed("b"));

        let generator = Arc::new(EchoGenerator::new(&[]));
        let options = RunOptions {
            resume_policy: ResumePolicy::SkipFailed,
            ..quiet()
        };
        let summary = processor(generator.clone(), options).run(&recs, &mut store).await.unwrap();
        assert_eq!(summary.skipped, 2);
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_only_policy() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "run").unwrap();
        let recs = records(&["a", "b", "c"]);

        let generator = Arc::new(EchoGenerator::new(&["b"]));
        let first = processor(generator, RunOptions { limit: Some(2), ..quiet() })
            .run(&recs, &mut store)
            .await
            .unwrap();
        assert_eq!(first.processed(), 2);

        let generator = Arc::new(EchoGenerator::new(&[]));
        let options = RunOptions {
            resume_policy: ResumePolicy::FailedOnly,
            ..quiet()
        };
        let summary = processor(generator.clone(), options).run(&recs, &mut store).await.unwrap();
        assert_eq!(generator.calls(), vec!["b"]);
        assert_eq!(summary.succeeded, 1);
        assert!(!store.checkpoint().has_outcome("c"));
    }

    #[tokio::test]
    async fn test_limit_caps_processed_records() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "run").unwrap();
        let generator = Arc::new(EchoGenerator::new(&[]));

        let summary = processor(generator.clone(), RunOptions { limit: Some(2), ..quiet() })
            .run(&records(&["a", "b", "c", "d"]), &mut store)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(generator.calls(), vec!["a", "b"]);
        assert_eq!(store.checkpoint().len(), 2);
    }

    #[tokio::test]
    async fn test_only_with_description_filter() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "run").unwrap();
        let generator = Arc::new(EchoGenerator::new(&[]));
        let recs = vec![
            Record::new("bare").with_title("Bare"),
            Record::new("full").with_title("Full").with_description("<p>x</p>"),
        ];

        let options = RunOptions {
            only_with_description: true,
            ..quiet()
        };
        let summary = processor(generator.clone(), options).run(&recs, &mut store).await.unwrap();

        assert_eq!(generator.calls(), vec!["full"]);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_stop_flag_interrupts_between_records() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "run").unwrap();
        let generator = Arc::new(EchoGenerator::new(&[]));
        let stop = Arc::new(AtomicBool::new(true));

        let summary = processor(generator.clone(), quiet())
            .with_stop_flag(stop)
            .run(&records(&["a", "b"]), &mut store)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.processed(), 0);
        assert!(store.checkpoint().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_processed_records() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "run").unwrap();
        store
            .record(CheckpointEntry::new(
                "a",
                &ProcessingOutcome::Succeeded {
                    generated: "<p>a</p>".to_string(),
                },
                1,
            ))
            .unwrap();
        let generator = Arc::new(EchoGenerator::new(&[]));
        let options = RunOptions {
            inter_record_delay: Duration::from_secs(2),
            ..quiet()
        };

        let start = tokio::time::Instant::now();
        processor(generator, options)
            .run(&records(&["a", "b", "c"]), &mut store)
            .await
            .unwrap();

        // Two processed records, one pause.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_unmergeable_output_is_recorded_as_failure() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "run").unwrap();
        let generator = Arc::new(EchoGenerator::new(&[]));
        let mode = UpdateMode::FieldsOnly(vec![
            crate::models::ProductField::Title,
            crate::models::ProductField::Vendor,
        ]);

        let summary = BatchProcessor::new(generator, RetryPolicy::new(3), mode, "English")
            .with_options(quiet())
            .run(&records(&["a"]), &mut store)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.calls, 1);
        assert!(store.checkpoint().is_failed("a"));
    }

    #[tokio::test]
    async fn test_entries_record_target_fields() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "run").unwrap();
        let generator = Arc::new(EchoGenerator::new(&[]));

        BatchProcessor::new(
            generator,
            RetryPolicy::new(1),
            UpdateMode::FieldsOnly(vec![ProductField::Title]),
            "English",
        )
        .with_options(quiet())
        .run(&records(&["a"]), &mut store)
        .await
        .unwrap();

        let entry = store.checkpoint().get("a").unwrap();
        assert_eq!(entry.fields, vec![ProductField::Title]);
    }

    #[tokio::test]
    async fn test_schema_markup_appended_to_descriptions_only() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "run").unwrap();
        let options = RunOptions {
            schema_markup: Some(SchemaMarkup::new(None, "USD")),
            ..quiet()
        };

        processor(Arc::new(EchoGenerator::new(&[])), options.clone())
            .run(&records(&["a"]), &mut store)
            .await
            .unwrap();
        let generated = store.checkpoint().get("a").unwrap().new_description.clone().unwrap();
        assert!(generated.starts_with("<p>a</p>"));
        assert!(generated.contains("application/ld+json"));

        BatchProcessor::new(
            Arc::new(EchoGenerator::new(&[])),
            RetryPolicy::new(1),
            UpdateMode::FieldsOnly(vec![ProductField::Title]),
            "English",
        )
        .with_options(options)
        .run(&records(&["b"]), &mut store)
        .await
        .unwrap();
        let entry = store.checkpoint().get("b").unwrap();
        assert_eq!(entry.new_description.as_deref(), Some("<p>b</p>"));
    }
}
