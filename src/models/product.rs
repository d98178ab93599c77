//! Product records, processing outcomes and update modes.

use crate::models::GenerationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Separator placed between the existing and generated description in
/// `UpdateMode::Append`.
pub const APPEND_SEPARATOR: &str = "\n\n";

/// Shopify export column names.
pub mod columns {
    pub const HANDLE: &str = "Handle";
    pub const TITLE: &str = "Title";
    pub const BODY_HTML: &str = "Body (HTML)";
    pub const VENDOR: &str = "Vendor";
    pub const PRODUCT_CATEGORY: &str = "Product Category";
    pub const TYPE: &str = "Type";
    pub const VARIANT_SKU: &str = "Variant SKU";
    pub const VARIANT_PRICE: &str = "Variant Price";
    pub const IMAGE_SRC: &str = "Image Src";
}

/// A product field that generation may rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductField {
    Title,
    Description,
    Vendor,
    Category,
    #[serde(rename = "type")]
    ProductType,
}

impl ProductField {
    pub const ALL: [ProductField; 5] = [
        Self::Title,
        Self::Description,
        Self::Vendor,
        Self::Category,
        Self::ProductType,
    ];

    /// Key used in prompts, config and JSON field maps.
    pub fn key(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Vendor => "vendor",
            Self::Category => "category",
            Self::ProductType => "type",
        }
    }

    /// Column in the Shopify export holding this field.
    pub fn column(self) -> &'static str {
        match self {
            Self::Title => columns::TITLE,
            Self::Description => columns::BODY_HTML,
            Self::Vendor => columns::VENDOR,
            Self::Category => columns::PRODUCT_CATEGORY,
            Self::ProductType => columns::TYPE,
        }
    }
}

impl fmt::Display for ProductField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ProductField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.key() == key || f.column().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown field '{s}' (expected one of: title, description, vendor, category, type)")
            })
    }
}

/// One product, identified by its handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Stable product identifier
    pub handle: String,
    pub title: Option<String>,
    /// Existing HTML body
    pub description: Option<String>,
    pub vendor: Option<String>,
    pub category: Option<String>,
    pub product_type: Option<String>,
    /// Read-only listing details of the product row
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    /// Index of the table row this record was read from
    #[serde(default)]
    pub row_index: usize,
}

impl Record {
    /// Create a record with only a handle set.
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            title: None,
            description: None,
            vendor: None,
            category: None,
            product_type: None,
            sku: None,
            price: None,
            image: None,
            row_index: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn field(&self, field: ProductField) -> Option<&str> {
        match field {
            ProductField::Title => self.title.as_deref(),
            ProductField::Description => self.description.as_deref(),
            ProductField::Vendor => self.vendor.as_deref(),
            ProductField::Category => self.category.as_deref(),
            ProductField::ProductType => self.product_type.as_deref(),
        }
    }

    pub fn set_field(&mut self, field: ProductField, value: String) {
        let slot = match field {
            ProductField::Title => &mut self.title,
            ProductField::Description => &mut self.description,
            ProductField::Vendor => &mut self.vendor,
            ProductField::Category => &mut self.category,
            ProductField::ProductType => &mut self.product_type,
        };
        *slot = Some(value);
    }

    /// Whether the record already carries a non-blank description.
    pub fn has_description(&self) -> bool {
        self.description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty())
    }
}

/// Outcome of processing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Not yet processed (or failed and re-queued)
    Pending,
    /// Generation succeeded; holds the raw generated text
    Succeeded { generated: String },
    /// Generation failed after retries or with a permanent error
    Failed { reason: String },
}

impl ProcessingOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// How generated text is merged into a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Generated text replaces the description
    #[default]
    Replace,
    /// Generated text is appended after the existing description
    Append,
    /// Only the listed fields are rewritten
    FieldsOnly(Vec<ProductField>),
}

impl UpdateMode {
    /// Fields a generation call should produce under this mode.
    pub fn target_fields(&self) -> Vec<ProductField> {
        match self {
            Self::Replace | Self::Append => vec![ProductField::Description],
            Self::FieldsOnly(fields) => {
                let mut fields = fields.clone();
                fields.sort();
                fields.dedup();
                fields
            }
        }
    }

    /// Apply generated text to a record, returning the updated record.
    ///
    /// Fails with a permanent `GenerationError` when the generated text
    /// cannot be mapped onto the requested fields.
    pub fn apply(&self, record: &Record, generated: &str) -> Result<Record, GenerationError> {
        let mut updated = record.clone();
        match self {
            Self::Replace => {
                updated.description = Some(generated.to_string());
            }
            Self::Append => {
                let merged = match record.description.as_deref() {
                    Some(existing) if !existing.trim().is_empty() => {
                        format!("{existing}{APPEND_SEPARATOR}{generated}")
                    }
                    _ => generated.to_string(),
                };
                updated.description = Some(merged);
            }
            Self::FieldsOnly(_) => {
                for (field, value) in parse_field_values(&self.target_fields(), generated)? {
                    updated.set_field(field, value);
                }
            }
        }
        Ok(updated)
    }
}

/// Map generated text onto the requested fields.
///
/// A single field takes the whole text. Several fields expect a JSON object
/// keyed by field name, optionally wrapped in a markdown code fence.
pub fn parse_field_values(
    fields: &[ProductField],
    generated: &str,
) -> Result<BTreeMap<ProductField, String>, GenerationError> {
    if fields.is_empty() {
        return Err(GenerationError::InvalidInput(
            "no fields selected for update".to_string(),
        ));
    }

    if let [field] = fields {
        let value = generated.trim();
        if value.is_empty() {
            return Err(GenerationError::InvalidResponse(format!(
                "empty value for field '{field}'"
            )));
        }
        return Ok(BTreeMap::from([(*field, value.to_string())]));
    }

    let body = generated
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| GenerationError::InvalidResponse(format!("expected JSON object of fields: {e}")))?;

    let mut values = BTreeMap::new();
    for field in fields {
        let value = object
            .get(field.key())
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                GenerationError::InvalidResponse(format!("missing value for field '{field}'"))
            })?;
        values.insert(*field, value.to_string());
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new("rose-oil")
            .with_title("Rose Oil")
            .with_description("A")
    }

    #[test]
    fn test_replace_mode() {
        let updated = UpdateMode::Replace.apply(&record(), "B").unwrap();
        assert_eq!(updated.description.as_deref(), Some("B"));
        assert_eq!(updated.title.as_deref(), Some("Rose Oil"));
    }

    #[test]
    fn test_append_mode_uses_separator() {
        let updated = UpdateMode::Append.apply(&record(), "B").unwrap();
        assert_eq!(updated.description.as_deref(), Some("A\n\nB"));
    }

    #[test]
    fn test_append_to_empty_description() {
        let updated = UpdateMode::Append
            .apply(&Record::new("blank"), "B")
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("B"));
    }

    #[test]
    fn test_fields_only_title_keeps_description() {
        let mode = UpdateMode::FieldsOnly(vec![ProductField::Title]);
        let updated = mode.apply(&record(), "B").unwrap();
        assert_eq!(updated.description.as_deref(), Some("A"));
        assert_eq!(updated.title.as_deref(), Some("B"));
    }

    #[test]
    fn test_fields_only_multiple_fields_from_json() {
        let mode = UpdateMode::FieldsOnly(vec![ProductField::Title, ProductField::Vendor]);
        let generated = "```json\n{\"title\": \"Rose Elixir\", \"vendor\": \"Atelier\"}\n```";
        let updated = mode.apply(&record(), generated).unwrap();
        assert_eq!(updated.title.as_deref(), Some("Rose Elixir"));
        assert_eq!(updated.vendor.as_deref(), Some("Atelier"));
        assert_eq!(updated.description.as_deref(), Some("A"));
    }

    #[test]
    fn test_fields_only_rejects_missing_field() {
        let mode = UpdateMode::FieldsOnly(vec![ProductField::Title, ProductField::Vendor]);
        let err = mode.apply(&record(), r#"{"title": "x"}"#).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_field_parsing() {
        assert_eq!("Title".parse::<ProductField>(), Ok(ProductField::Title));
        assert_eq!("type".parse::<ProductField>(), Ok(ProductField::ProductType));
        assert_eq!(
            "Body (HTML)".parse::<ProductField>(),
            Ok(ProductField::Description)
        );
        assert!("price".parse::<ProductField>().is_err());
    }

    #[test]
    fn test_update_mode_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: UpdateMode,
        }
        let w: Wrapper = toml::from_str(r#"mode = "append""#).unwrap();
        assert_eq!(w.mode, UpdateMode::Append);
        let w: Wrapper = toml::from_str(r#"mode = { fields_only = ["title", "type"] }"#).unwrap();
        assert_eq!(
            w.mode,
            UpdateMode::FieldsOnly(vec![ProductField::Title, ProductField::ProductType])
        );
    }
}
