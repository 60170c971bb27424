// crates/recall-server/src/service/extraction.rs
// Heuristic preference extraction from free text
//
// Keyword-triggered regex templates over normalized text. Best-effort by
// contract: candidates carry low-to-medium confidence and are stored as
// analysis-suggestion memories until confirmed by an explicit
// store_preferences call.

use std::sync::LazyLock;

use regex::Regex;

/// A candidate preference pulled out of free text.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPreference {
    /// Stable slug derived from the matched text.
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub reasoning: String,
}

struct Template {
    pattern: Regex,
    confidence: f64,
    label: &'static str,
}

/// Cheap trigger words; text without any of them skips the regex pass.
const TRIGGERS: [&str; 7] = [
    "always", "never", "prefer", "use", "don't", "dont", "want",
];

static TEMPLATES: LazyLock<Vec<Template>> = LazyLock::new(|| {
    vec![
        Template {
            pattern: Regex::new(r"(?i)\balways\s+(?:use|prefer|write|run)\s+([^.!?\n]{3,80})")
                .expect("static regex"),
            confidence: 0.6,
            label: "always-directive",
        },
        Template {
            pattern: Regex::new(r"(?i)\bnever\s+(?:use|do|write|add|commit)\s+([^.!?\n]{3,80})")
                .expect("static regex"),
            confidence: 0.6,
            label: "never-directive",
        },
        Template {
            pattern: Regex::new(r"(?i)\bprefer\s+(\S+(?:\s+\S+){0,5}?)\s+over\s+(\S+)")
                .expect("static regex"),
            confidence: 0.7,
            label: "preference-pair",
        },
        Template {
            pattern: Regex::new(r"(?i)\buse\s+(tabs|spaces)\b").expect("static regex"),
            confidence: 0.8,
            label: "indentation",
        },
        Template {
            pattern: Regex::new(r"(?i)\bdon'?t\s+(?:use|add|write|include)\s+([^.!?\n]{3,80})")
                .expect("static regex"),
            confidence: 0.5,
            label: "negative-directive",
        },
        Template {
            pattern: Regex::new(r"(?i)\bi\s+(?:like|want|prefer)\s+([^.!?\n]{3,80})")
                .expect("static regex"),
            confidence: 0.5,
            label: "stated-preference",
        },
    ]
});

/// Extract candidate preferences from free text. Returns an empty list for
/// text that carries no trigger words; results are deduplicated by key.
pub fn extract_preferences(text: &str) -> Vec<ExtractedPreference> {
    let normalized = text.trim();
    if normalized.is_empty() {
        return Vec::new();
    }

    let lowered = normalized.to_lowercase();
    if !TRIGGERS.iter().any(|t| lowered.contains(t)) {
        return Vec::new();
    }

    let mut found: Vec<ExtractedPreference> = Vec::new();
    for template in TEMPLATES.iter() {
        for caps in template.pattern.captures_iter(normalized) {
            let Some(whole) = caps.get(0) else { continue };
            let value = whole.as_str().trim().to_string();
            let key = slugify(&value);
            if key.is_empty() || found.iter().any(|p| p.key == key) {
                continue;
            }
            found.push(ExtractedPreference {
                key,
                value,
                confidence: template.confidence,
                reasoning: format!("matched {} pattern", template.label),
            });
        }
    }
    found
}

/// Lowercased, dash-joined alphanumeric words, capped at 6 words.
fn slugify(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(6)
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}
