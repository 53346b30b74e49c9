use crate::catalog::normalize::normalize_label;
use crate::catalog::selectors::SelectorSet;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
}

/// Collection (list) identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub Uuid);

impl ScopeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for ScopeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for ScopeId {
    type Err = IdParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| IdParseError::InvalidUuid(s.to_string()))?;
        Ok(Self(id))
    }
}

/// Entity identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for EntityId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for EntityId {
    type Err = IdParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| IdParseError::InvalidUuid(s.to_string()))?;
        Ok(Self(id))
    }
}

/// The closed vocabulary of entity categories.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Person,
    Company,
    Organization,
    Vessel,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Person,
        Category::Company,
        Category::Organization,
        Category::Vessel,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Person => "person",
            Category::Company => "company",
            Category::Organization => "organization",
            Category::Vessel => "vessel",
            Category::Other => "other",
        }
    }

    /// Exact membership: `text` must equal one of the lowercase names.
    /// Padding or different case means "not a category".
    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == text)
    }

    /// Opt-in lenient lookup that ignores surrounding whitespace and ASCII
    /// case. Only bulk payloads use it, since their `schema` alias carries
    /// capitalized names such as `Company`.
    pub fn parse_ignore_case(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(text))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            Error::Validation(format!(
                "'{s}' is not a valid category (expected one of: {})",
                Self::ALL.map(|c| c.as_str()).join(", ")
            ))
        })
    }
}

/// A named, access-scoped grouping of entities (a "collection" or "list").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    pub label: String,
    /// Stable external key; request bodies for mapping jobs are keyed by it.
    pub foreign_id: String,
    pub public: bool,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scope {
    #[tracing::instrument(level = "debug")]
    pub fn new(
        label: impl Into<String> + std::fmt::Debug,
        foreign_id: impl Into<String> + std::fmt::Debug,
        public: bool,
        now: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let label = label.into().trim().to_string();
        if label.is_empty() {
            return Err(Error::Validation("scope label is empty".to_string()));
        }
        let foreign_id = foreign_id.into().trim().to_string();
        if foreign_id.is_empty() {
            return Err(Error::Validation("scope foreign_id is empty".to_string()));
        }

        let now = now.unwrap_or_else(Utc::now);
        Ok(Self {
            id: ScopeId::new(),
            label,
            foreign_id,
            public,
            summary: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn normalized_label(&self) -> String {
        normalize_label(&self.label)
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// An alternate identifying string attached to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub text: String,
    pub normalized: String,
}

impl Selector {
    /// Returns `None` when the text normalizes to nothing.
    pub fn new(text: &str) -> Option<Self> {
        let normalized = normalize_label(text);
        if normalized.is_empty() {
            return None;
        }
        Some(Self {
            text: text.trim().to_string(),
            normalized,
        })
    }
}

/// A canonical entity owned by exactly one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub scope_id: ScopeId,
    pub label: String,
    pub category: Category,
    pub selectors: SelectorSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    #[tracing::instrument(level = "debug")]
    pub fn new(
        scope_id: ScopeId,
        label: impl Into<String> + std::fmt::Debug,
        category: Category,
        now: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let label = label.into().trim().to_string();
        if label.is_empty() {
            return Err(Error::Validation("entity label is empty".to_string()));
        }

        let now = now.unwrap_or_else(Utc::now);
        Ok(Self {
            id: EntityId::new(),
            scope_id,
            label,
            category,
            selectors: SelectorSet::default(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn normalized_label(&self) -> String {
        normalize_label(&self.label)
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_requires_exact_member() {
        assert_eq!(Category::parse("company"), Some(Category::Company));
        assert_eq!(Category::parse("  person "), None);
        assert_eq!(Category::parse("Person"), None);
        assert_eq!(Category::parse("bogus"), None);
        assert_eq!(Category::parse(""), None);
    }

    #[test]
    fn category_parse_ignore_case_is_opt_in() {
        assert_eq!(
            Category::parse_ignore_case("  Person "),
            Some(Category::Person)
        );
        assert_eq!(Category::parse_ignore_case("VESSEL"), Some(Category::Vessel));
        assert_eq!(Category::parse_ignore_case("bogus"), None);
    }

    #[test]
    fn category_from_str_is_exact() {
        assert_eq!("vessel".parse::<Category>().unwrap(), Category::Vessel);
        assert!("PERSON".parse::<Category>().unwrap_err().is_validation());
    }

    #[test]
    fn category_from_str_reports_validation_error() {
        let err = "not-a-real-category".parse::<Category>().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn entity_rejects_blank_label() {
        let err = Entity::new(ScopeId::new(), "   ", Category::Other, None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn selector_trims_text_and_keeps_normalized_form() {
        let sel = Selector::new("  ACME   Corp ").unwrap();
        assert_eq!(sel.text, "ACME   Corp");
        assert_eq!(sel.normalized, "acme corp");
        assert!(Selector::new(" \t ").is_none());
    }
}
