//! shopscribe - Resumable LLM rewriting of Shopify product descriptions.
//!
//! ## Architecture
//!
//! A run walks the products of a Shopify export CSV one at a time:
//! - **Catalog**: Loads the CSV and derives one record per product handle
//! - **Generation Client**: Calls an OpenAI-compatible chat endpoint
//! - **Retry Policy**: Retries transient failures with capped backoff
//! - **Checkpoint Store**: Appends every outcome to a durable log
//! - **Exporter**: Merges outcomes back into a copy of the CSV
//!
//! ## Failure Model
//!
//! - Per-product failures are values (`ProcessingOutcome::Failed`) and
//!   never stop a run
//! - Checkpoint I/O failures are fatal; nothing is processed that cannot
//!   be recorded
//! - Rerunning skips every product that already succeeded

pub mod catalog;
pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod retry;

// Re-exports for convenience
pub use catalog::ProductTable;
pub use checkpoint::{Checkpoint, CheckpointEntry, CheckpointStore};
pub use client::{DescriptionGenerator, GenerationRequest, LlmClient, PromptBuilder, SchemaMarkup};
pub use models::{
    Config, GenerationError, ProcessingOutcome, ProductField, Record, Result, ShopscribeError,
    UpdateMode,
};
pub use pipeline::{BatchProcessor, ExportSummary, Exporter, ResumePolicy, RunOptions, RunSummary};
pub use retry::{Attempted, CallOutcome, RetryPolicy};
