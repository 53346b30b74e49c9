use crate::catalog::normalize::normalize_label;
use crate::models::Selector;
use serde::{Deserialize, Serialize};

/// Per-entity set of selectors, unique by normalized text.
///
/// Insertion order is preserved for display but carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorSet {
    items: Vec<Selector>,
}

impl SelectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a selector with the same normalized text is already present.
    pub fn has(&self, text: &str) -> bool {
        let normalized = normalize_label(text);
        !normalized.is_empty() && self.items.iter().any(|s| s.normalized == normalized)
    }

    /// Adds `text` unless it is blank or already present. Returns whether a
    /// selector was created.
    pub fn add(&mut self, text: &str) -> bool {
        let Some(selector) = Selector::new(text) else {
            return false;
        };
        if self.items.iter().any(|s| s.normalized == selector.normalized) {
            return false;
        }
        self.items.push(selector);
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Selector> {
        self.items.iter()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.items.iter().map(|s| s.text.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a SelectorSet {
    type Item = &'a Selector;
    type IntoIter = std::slice::Iter<'a, Selector>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Selector> for SelectorSet {
    fn from_iter<I: IntoIterator<Item = Selector>>(iter: I) -> Self {
        let mut set = Self::default();
        for sel in iter {
            if !set.items.iter().any(|s| s.normalized == sel.normalized) {
                set.items.push(sel);
            }
        }
        set
    }
}
