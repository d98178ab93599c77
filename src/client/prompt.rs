//! Prompt construction.

use crate::client::GenerationRequest;
use crate::models::{GenerationConfig, ProductField};
use regex::Regex;
use std::sync::OnceLock;

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert e-commerce copywriter specializing in \
product descriptions that read well to shoppers and rank well in AI search and shopping \
assistants. Always focus on the specific product provided. Do not invent specifications you \
were not given. Do not use emojis or special characters; keep the content clean and professional.";

const FRAGRANCE_KEYWORDS: [&str; 7] = [
    "perfume",
    "fragrance",
    "cologne",
    "eau de",
    "parfum",
    "scent",
    "attar",
];

/// Builds system and user prompts for generation requests.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    tone: String,
    max_input_chars: usize,
}

impl PromptBuilder {
    pub fn new(config: &GenerationConfig, system_prompt: Option<String>) -> Self {
        Self {
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            tone: config.tone.clone(),
            max_input_chars: config.max_input_chars,
        }
    }

    pub fn system(&self) -> &str {
        &self.system_prompt
    }

    /// User prompt for a request.
    pub fn user(&self, request: &GenerationRequest) -> String {
        let mut prompt = String::new();
        prompt.push_str(&self.product_block(request));
        prompt.push('\n');

        if request.is_description_only() {
            if is_fragrance(request) {
                prompt.push_str(FRAGRANCE_BRIEF);
            } else {
                prompt.push_str(GENERAL_BRIEF);
            }
            prompt.push_str(
                "\nReturn only the HTML fragment (no markdown fences, no <html> or <body> tags).\n",
            );
        } else {
            prompt.push_str(&fields_brief(&request.targets));
        }

        prompt.push_str(&format!(
            "Write in {}. Tone: {}.\n",
            request.language, self.tone
        ));
        prompt
    }

    fn product_block(&self, request: &GenerationRequest) -> String {
        let line = |label: &str, value: &Option<String>| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(|v| format!("{label}: {}\n", v.trim()))
                .unwrap_or_default()
        };

        let current = request
            .existing_description
            .as_deref()
            .map(|html| truncate_chars(&html_to_text(html), self.max_input_chars))
            .filter(|text| !text.is_empty());

        let mut block = String::from("Product details:\n");
        block.push_str(&format!("Handle: {}\n", request.handle));
        block.push_str(&line("Product", &request.title));
        block.push_str(&line("Brand", &request.vendor));
        block.push_str(&line("Category", &request.category));
        block.push_str(&line("Type", &request.product_type));
        block.push_str(&line("Current description", &current));
        block
    }
}

const FRAGRANCE_BRIEF: &str = "Write an HTML product description for this fragrance with:
1. A compelling opening paragraph
2. Fragrance notes (top, heart, base) as a list, only where they can be stated with confidence
3. Characteristics: longevity, sillage, best seasons and occasions
4. Who it is for
5. How to apply it for best results
Use <h3> section headings, <p> and <ul>/<li> elements.
";

const GENERAL_BRIEF: &str = "Write an HTML product description with:
1. An overview that starts with what the product does
2. Key features and benefits
3. How to use it
4. Who it is perfect for
5. Three short frequently asked questions with answers
Use <h3> section headings, <p> and <ul>/<li> elements. Avoid keyword stuffing.
";

fn fields_brief(fields: &[ProductField]) -> String {
    let describe = |field: &ProductField| match field {
        ProductField::Title => "title: a concise, descriptive product title",
        ProductField::Description => "description: an HTML product description",
        ProductField::Vendor => "vendor: the brand name, correctly capitalized",
        ProductField::Category => "category: a Shopify product category path",
        ProductField::ProductType => "type: a short product type",
    };

    match fields {
        [field] => format!(
            "Produce a new {}.\nReturn only the value itself, with no label, quotes or commentary.\n",
            describe(field)
        ),
        _ => {
            let mut brief = String::from("Produce new values for these fields:\n");
            for field in fields {
                brief.push_str(&format!("- {}\n", describe(field)));
            }
            let keys: Vec<_> = fields.iter().map(|f| format!("\"{}\"", f.key())).collect();
            brief.push_str(&format!(
                "Return only a JSON object with the keys {}.\n",
                keys.join(", ")
            ));
            brief
        }
    }
}

/// Whether the product looks like a fragrance.
pub fn is_fragrance(request: &GenerationRequest) -> bool {
    let haystack = [&request.title, &request.category, &request.product_type]
        .iter()
        .filter_map(|v| v.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    FRAGRANCE_KEYWORDS.iter().any(|k| haystack.contains(k))
}

/// Reduce HTML to plain text: strip tags, decode common entities, collapse
/// whitespace.
pub fn html_to_text(html: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").expect("space pattern is valid"));

    let stripped = tag.replace_all(html, " ");
    let decoded = decode_entities(&stripped);
    space.replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&ndash;", "-")
        .replace("&mdash;", "—")
        .replace("&amp;", "&")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
