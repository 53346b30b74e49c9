//! Label normalization shared by the write and lookup paths.

use regex::Regex;
use std::sync::OnceLock;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

/// Case-fold `label` and collapse every run of whitespace to a single space,
/// trimming both ends.
///
/// Entities are matched on this form only, so it must stay deterministic:
/// changing it silently splits existing entities from new rows.
pub fn normalize_label(label: &str) -> String {
    if label.is_empty() {
        return String::new();
    }
    let folded = label.to_lowercase();
    whitespace_re().replace_all(&folded, " ").trim().to_string()
}
