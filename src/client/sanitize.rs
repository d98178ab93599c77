//! Cleanup of model output before it is stored.

use regex::Regex;
use std::sync::OnceLock;

/// Common UTF-8-read-as-Windows-1252 sequences and their repairs.
const MOJIBAKE: [(&str, &str); 6] = [
    ("â€™", "'"),
    ("â€˜", "'"),
    ("â€œ", "\""),
    ("â€\u{9d}", "\""),
    ("â€“", "-"),
    ("â€”", "—"),
];

struct Patterns {
    fence: Regex,
    doctype: Regex,
    wrapper: Regex,
    head: Regex,
    emoji: Regex,
    blank_lines: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        fence: Regex::new(r"```[a-zA-Z]*[ \t]*\n?").expect("fence pattern is valid"),
        doctype: Regex::new(r"(?i)<!DOCTYPE[^>]*>").expect("doctype pattern is valid"),
        wrapper: Regex::new(r"(?i)</?(html|body)\b[^>]*>").expect("wrapper pattern is valid"),
        head: Regex::new(r"(?is)<head\b[^>]*>.*?</head>").expect("head pattern is valid"),
        emoji: Regex::new(
            r"[\x{1F600}-\x{1F64F}\x{1F300}-\x{1F5FF}\x{1F680}-\x{1F6FF}\x{1F1E0}-\x{1F1FF}\x{1F900}-\x{1F9FF}\x{2702}-\x{27B0}\x{FE0F}]",
        )
        .expect("emoji pattern is valid"),
        blank_lines: Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("blank line pattern is valid"),
    })
}

/// Strip markdown fences, document wrappers and emojis from generated HTML,
/// repair common mojibake and collapse runs of blank lines.
pub fn clean_generated_html(content: &str) -> String {
    let p = patterns();

    let mut cleaned = p.fence.replace_all(content, "").into_owned();
    cleaned = p.head.replace_all(&cleaned, "").into_owned();
    cleaned = p.doctype.replace_all(&cleaned, "").into_owned();
    cleaned = p.wrapper.replace_all(&cleaned, "").into_owned();
    cleaned = p.emoji.replace_all(&cleaned, "").into_owned();

    for (broken, fixed) in MOJIBAKE {
        cleaned = cleaned.replace(broken, fixed);
    }

    cleaned = p.blank_lines.replace_all(&cleaned, "\n\n").into_owned();
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_fences_and_wrappers() {
        let raw = "```html\n<!DOCTYPE html>\n<html lang=\"en\"><head><title>x</title></head><body>\n<p>Hi</p>\n</body></html>\n```";
        assert_eq!(clean_generated_html(raw), "<p>Hi</p>");
    }

    #[test]
    fn test_removes_emojis_and_fixes_mojibake() {
        let raw = "<p>Great gift 🎉 for everyone âœ</p><p>Itâ€™s lovely 🌿</p>";
        let cleaned = clean_generated_html(raw);
        assert!(!cleaned.contains('🎉'));
        assert!(!cleaned.contains('🌿'));
        assert!(cleaned.contains("It's lovely"));
    }

    #[test]
    fn test_collapses_blank_lines() {
        assert_eq!(clean_generated_html("<p>a</p>\n\n\n\n<p>b</p>"), "<p>a</p>\n\n<p>b</p>");
    }

    #[test]
    fn test_keeps_non_latin_text() {
        assert_eq!(clean_generated_html("<p>香水 — Duft</p>"), "<p>香水 — Duft</p>");
    }
}
