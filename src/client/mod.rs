//! Description generation client module.
//!
//! `DescriptionGenerator` is the seam between the batch loop and the model
//! API; `LlmClient` implements it for OpenAI-compatible endpoints.

mod llm_client;
mod prompt;
mod rate_limiter;
mod sanitize;
mod schema;

pub use llm_client::*;
pub use prompt::*;
pub use rate_limiter::*;
pub use sanitize::*;
pub use schema::*;

use crate::models::{GenerationError, ProductField, Record};
use async_trait::async_trait;

/// Input for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub handle: String,
    pub title: Option<String>,
    /// Existing description HTML
    pub existing_description: Option<String>,
    pub vendor: Option<String>,
    pub category: Option<String>,
    pub product_type: Option<String>,
    /// Output language
    pub language: String,
    /// Fields to produce; `[Description]` for description rewrites
    pub targets: Vec<ProductField>,
}

impl GenerationRequest {
    pub fn from_record(record: &Record, language: &str, targets: Vec<ProductField>) -> Self {
        Self {
            handle: record.handle.clone(),
            title: record.title.clone(),
            existing_description: record.description.clone(),
            vendor: record.vendor.clone(),
            category: record.category.clone(),
            product_type: record.product_type.clone(),
            language: language.to_string(),
            targets,
        }
    }

    /// Whether the call rewrites only the description.
    pub fn is_description_only(&self) -> bool {
        self.targets == [ProductField::Description]
    }
}

/// Produces text for a product.
///
/// Implementations make a single attempt per call and classify failures;
/// retrying is the caller's concern.
#[async_trait]
pub trait DescriptionGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}
