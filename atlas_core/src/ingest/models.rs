use crate::models::{Category, Scope, ScopeId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One raw input row: field name -> text value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::default();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// Which record fields carry the label, category and selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldMapping {
    /// Field holding the entity label. Default `label`.
    pub label: String,
    /// Field holding the category. Default `category`.
    pub category: String,
    /// Field holding an extra selector (alias, external id). Default `selector`.
    pub selector: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            label: "label".to_string(),
            category: "category".to_string(),
            selector: "selector".to_string(),
        }
    }
}

impl FieldMapping {
    pub fn validate(&self) -> Result<()> {
        for (key, field) in [
            ("label", &self.label),
            ("category", &self.category),
            ("selector", &self.selector),
        ] {
            if field.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "mapping.{key} must name a field"
                )));
            }
        }
        Ok(())
    }
}

/// Describes one fixture-style load: the target list, its visibility, the
/// field mapping and the category used when a row carries none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadDescriptor {
    pub list: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub mapping: FieldMapping,
    pub default_category: Option<String>,
}

impl LoadDescriptor {
    pub fn new(list: impl Into<String>, default_category: Category) -> Self {
        Self {
            list: Some(list.into()),
            public: false,
            mapping: FieldMapping::default(),
            default_category: Some(default_category.as_str().to_string()),
        }
    }

    #[tracing::instrument(level = "debug", skip(s))]
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s)
            .map_err(|e| Error::Validation(format!("malformed load descriptor: {e}")))
    }

    #[tracing::instrument(level = "debug", skip(value))]
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Validation(format!("malformed load descriptor: {e}")))
    }

    /// Check everything that must hold before any row is read.
    pub fn validate(&self) -> Result<ValidatedDescriptor> {
        let list = self
            .list
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::Validation("load descriptor is missing 'list'".to_string()))?;
        let default_category = parse_default_category(self.default_category.as_deref())?;
        self.mapping.validate()?;

        Ok(ValidatedDescriptor {
            list: list.to_string(),
            public: self.public,
            mapping: self.mapping.clone(),
            default_category,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDescriptor {
    pub list: String,
    pub public: bool,
    pub mapping: FieldMapping,
    pub default_category: Category,
}

/// The batch default must be an exact member of the category vocabulary.
pub fn parse_default_category(text: Option<&str>) -> Result<Category> {
    let text = text.ok_or_else(|| {
        Error::Validation("load descriptor is missing 'default_category'".to_string())
    })?;
    text.parse()
}

/// Whether a re-matched entity takes the category of the latest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryPolicy {
    /// Every matching row overwrites the category; the last row in a batch wins.
    #[default]
    LastWriteWins,
    /// The category is only assigned when the entity is created.
    KeepExisting,
}

impl std::str::FromStr for CategoryPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "last_write_wins" => Ok(Self::LastWriteWins),
            "keep_existing" => Ok(Self::KeepExisting),
            other => Err(Error::Validation(format!(
                "unknown category policy '{other}'"
            ))),
        }
    }
}

/// Counters for one committed ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub scope_id: ScopeId,
    pub records_seen: u64,
    pub records_skipped: u64,
    pub entities_created: u64,
    /// Rows that matched an existing entity (including ones created earlier in the batch).
    pub entities_matched: u64,
    pub selectors_created: u64,
}

impl IngestSummary {
    pub fn new(scope_id: ScopeId) -> Self {
        Self {
            scope_id,
            ..Default::default()
        }
    }
}

/// Result of `IngestPipeline::load`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub scope: Scope,
    pub scope_created: bool,
    pub summary: IngestSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_parses_from_yaml_with_mapping_defaults() {
        let yaml = r#"
list: Sanctions
public: true
mapping:
  label: name
default_category: person
"#;
        let desc = LoadDescriptor::from_yaml_str(yaml).unwrap();
        let valid = desc.validate().unwrap();
        assert_eq!(valid.list, "Sanctions");
        assert!(valid.public);
        assert_eq!(valid.mapping.label, "name");
        assert_eq!(valid.mapping.category, "category");
        assert_eq!(valid.mapping.selector, "selector");
        assert_eq!(valid.default_category, Category::Person);
    }

    #[test]
    fn unknown_mapping_key_is_malformed() {
        let yaml = "list: X\ndefault_category: person\nmapping:\n  lable: name\n";
        assert!(LoadDescriptor::from_yaml_str(yaml).unwrap_err().is_validation());
    }

    #[test]
    fn bad_default_category_fails_validation() {
        let mut desc = LoadDescriptor::new("Sanctions", Category::Person);
        desc.default_category = Some("not-a-real-category".to_string());
        assert!(desc.validate().unwrap_err().is_validation());

        desc.default_category = None;
        assert!(desc.validate().unwrap_err().is_validation());
    }

    #[test]
    fn default_category_must_match_exactly() {
        assert!(parse_default_category(Some("PERSON")).unwrap_err().is_validation());
        assert!(parse_default_category(Some(" person")).unwrap_err().is_validation());
        assert_eq!(
            parse_default_category(Some("person")).unwrap(),
            Category::Person
        );
    }

    #[test]
    fn missing_list_fails_validation() {
        let mut desc = LoadDescriptor::new("  ", Category::Company);
        assert!(desc.validate().unwrap_err().is_validation());
        desc.list = None;
        assert!(desc.validate().unwrap_err().is_validation());
    }

    #[test]
    fn raw_record_collects_from_pairs() {
        let rec: RawRecord = [("name", "John Smith"), ("category", "person")]
            .into_iter()
            .collect();
        assert_eq!(rec.get("name"), Some("John Smith"));
        assert_eq!(rec.get("missing"), None);
    }
}
