//! Hidden schema.org Product markup for rewritten descriptions.
//!
//! AI shopping surfaces read JSON-LD from the product body, so each new
//! description carries a `display: none` block describing the product.
//! Only columns present in the export are emitted.

use crate::client::html_to_text;
use crate::models::Record;
use serde_json::{json, Map, Value};

/// Characters of description text carried into the markup.
const DESCRIPTION_CHARS: usize = 200;

/// Class of the wrapper `div`; also marks text that already has markup.
const MARKER_CLASS: &str = "schema-markup";

/// Builds the JSON-LD block appended to generated descriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMarkup {
    /// Storefront base URL used for the offer link
    store_url: Option<String>,
    currency: String,
}

impl SchemaMarkup {
    pub fn new(store_url: Option<String>, currency: impl Into<String>) -> Self {
        Self {
            store_url: store_url.map(|url| url.trim_end_matches('/').to_string()),
            currency: currency.into(),
        }
    }

    /// schema.org `Product` object for `record` with `description_html` as
    /// its new body.
    pub fn product(&self, record: &Record, description_html: &str) -> Value {
        let mut product = Map::new();
        product.insert("@context".into(), json!("https://schema.org"));
        product.insert("@type".into(), json!("Product"));
        product.insert(
            "name".into(),
            json!(record.title.as_deref().unwrap_or(&record.handle)),
        );
        if let Some(vendor) = &record.vendor {
            product.insert("brand".into(), json!({ "@type": "Brand", "name": vendor }));
        }

        let text = html_to_text(description_html);
        if !text.is_empty() {
            product.insert("description".into(), json!(summary(&text)));
        }
        if let Some(sku) = &record.sku {
            product.insert("sku".into(), json!(sku));
        }
        if let Some(image) = &record.image {
            product.insert("image".into(), json!(image));
        }

        if let Some(price) = &record.price {
            let mut offer = Map::new();
            offer.insert("@type".into(), json!("Offer"));
            offer.insert("price".into(), json!(price));
            offer.insert("priceCurrency".into(), json!(self.currency));
            offer.insert("availability".into(), json!("https://schema.org/InStock"));
            if let Some(base) = &self.store_url {
                offer.insert(
                    "url".into(),
                    json!(format!("{base}/products/{}", record.handle)),
                );
            }
            product.insert("offers".into(), Value::Object(offer));
        }

        Value::Object(product)
    }

    /// The hidden `div` wrapping the JSON-LD script.
    pub fn render(&self, record: &Record, description_html: &str) -> String {
        // `</` inside the script body would close the script tag early.
        let json = self
            .product(record, description_html)
            .to_string()
            .replace("</", "<\\/");
        format!(
            "<div class=\"{MARKER_CLASS}\" style=\"display: none;\">\n\
             <script type=\"application/ld+json\">{json}</script>\n\
             </div>"
        )
    }

    /// `generated` followed by its markup block. Text that already carries
    /// a block is returned unchanged.
    pub fn append_to(&self, record: &Record, generated: &str) -> String {
        if generated.contains(MARKER_CLASS) {
            return generated.to_string();
        }
        format!("{generated}\n\n{}", self.render(record, generated))
    }
}

/// First sentences of `text` within the character budget.
fn summary(text: &str) -> String {
    match text.char_indices().nth(DESCRIPTION_CHARS) {
        None => text.to_string(),
        Some((idx, _)) => {
            let head = &text[..idx];
            match head.rfind(". ") {
                Some(end) => head[..=end].to_string(),
                None => format!("{}...", head.trim_end()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp() -> Record {
        let mut record = Record::new("brass-lamp")
            .with_title("Brass Desk Lamp")
            .with_vendor("Lumen");
        record.sku = Some("BL-1".to_string());
        record.price = Some("49.00".to_string());
        record.image = Some("https://cdn.example.com/lamp.jpg".to_string());
        record
    }

    #[test]
    fn test_product_object() {
        let schema = SchemaMarkup::new(Some("https://shop.example.com/".to_string()), "EUR");
        let product = schema.product(&lamp(), "<p>A warm <strong>brass</strong> lamp.</p>");

        assert_eq!(product["@type"], "Product");
        assert_eq!(product["name"], "Brass Desk Lamp");
        assert_eq!(product["brand"]["name"], "Lumen");
        assert_eq!(product["description"], "A warm brass lamp.");
        assert_eq!(product["sku"], "BL-1");
        assert_eq!(product["offers"]["price"], "49.00");
        assert_eq!(product["offers"]["priceCurrency"], "EUR");
        assert_eq!(
            product["offers"]["url"],
            "https://shop.example.com/products/brass-lamp"
        );
    }

    #[test]
    fn test_missing_columns_are_omitted() {
        let schema = SchemaMarkup::new(None, "USD");
        let product = schema.product(&Record::new("mug"), "<p>Mug</p>");

        assert_eq!(product["name"], "mug");
        let keys: Vec<&str> = product.as_object().unwrap().keys().map(String::as_str).collect();
        for absent in ["brand", "sku", "image", "offers"] {
            assert!(!keys.contains(&absent), "{absent} should be omitted");
        }
    }

    #[test]
    fn test_long_description_is_summarized() {
        let sentence = "This lamp glows. ".repeat(30);
        let schema = SchemaMarkup::new(None, "USD");
        let product = schema.product(&lamp(), &sentence);

        let description = product["description"].as_str().unwrap();
        assert!(description.chars().count() <= DESCRIPTION_CHARS);
        assert!(description.ends_with("glows."));
    }

    #[test]
    fn test_render_is_hidden_and_cannot_close_script() {
        let record = Record::new("x").with_title("</script><b>x");
        let block = SchemaMarkup::new(None, "USD").render(&record, "<p>x</p>");

        assert!(block.starts_with("<div class=\"schema-markup\" style=\"display: none;\">"));
        assert_eq!(block.matches("</script>").count(), 1);

        let start = block.find('{').unwrap();
        let end = block.rfind('}').unwrap();
        let parsed: Value = serde_json::from_str(&block[start..=end]).unwrap();
        assert_eq!(parsed["name"], "</script><b>x");
    }

    #[test]
    fn test_append_is_idempotent() {
        let schema = SchemaMarkup::new(None, "USD");
        let once = schema.append_to(&lamp(), "<p>Lamp</p>");
        assert!(once.starts_with("<p>Lamp</p>\n\n<div class=\"schema-markup\""));
        assert_eq!(schema.append_to(&lamp(), &once), once);
    }
}
