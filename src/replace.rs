// Whole-word vocabulary replacements applied after reflow

use eyre::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

/// Mapping of misrecognized word -> correct word.
pub type Replacements = HashMap<String, String>;

const LIST_PREFIX_CHARS: &str = "-*0123456789. )";

/// Replace whole-word occurrences of every key in `replacements`.
///
/// Longer keys are tried first so a phrase wins over a word it contains.
pub fn apply_replacements(text: &str, replacements: &Replacements) -> String {
    if replacements.is_empty() {
        return text.to_string();
    }

    let mut keys: Vec<&str> = replacements
        .keys()
        .map(String::as_str)
        .filter(|k| !k.is_empty())
        .collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let alternation = keys.iter().map(|k| regex::escape(k)).collect::<Vec<_>>().join("|");
    let pattern = match Regex::new(&format!(r"\b({})\b", alternation)) {
        Ok(re) => re,
        Err(e) => {
            warn!(error = %e, count = keys.len(), "Could not compile replacements, leaving text unchanged");
            return text.to_string();
        }
    };

    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let word = &caps[0];
            replacements.get(word).cloned().unwrap_or_else(|| word.to_string())
        })
        .into_owned()
}

/// Parse the Markdown-note format.
///
/// One `wrong -> right` pair per line. Leading list markers are ignored,
/// blank lines and lines starting with `#` are comments.
pub fn parse_note_format(content: &str) -> Replacements {
    let mut replacements = Replacements::new();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.trim_start_matches(|c| LIST_PREFIX_CHARS.contains(c)).trim();
        let Some((wrong, right)) = line.split_once("->") else {
            continue;
        };

        let wrong = wrong.trim();
        if !wrong.is_empty() {
            replacements.insert(wrong.to_string(), right.trim().to_string());
        }
    }

    replacements
}

/// Parse the JSON-object format: `{"wrong": "right", ...}`.
pub fn parse_json_format(content: &str) -> Result<Replacements> {
    serde_json::from_str(content).context("Failed to parse replacements JSON")
}
