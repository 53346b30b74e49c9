use crate::catalog::resolver::resolve;
use crate::models::{Category, Entity, EntityId, ScopeId};
use crate::store::finish;
use crate::store::traits::{EntityStore, StoreTx};
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One pre-shaped entity in a direct bulk write.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct RawEntityPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "name")]
    label: String,
    #[serde(default, alias = "schema")]
    category: Option<String>,
    #[serde(default)]
    selectors: Vec<String>,
}

/// A validated bulk-write item.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPayload {
    pub id: Option<EntityId>,
    pub label: String,
    pub category: Option<Category>,
    pub selectors: Vec<String>,
}

impl EntityPayload {
    /// Parse the object at position `index` of a bulk payload.
    pub fn from_value(index: usize, value: &serde_json::Value) -> Result<Self> {
        let raw: RawEntityPayload = serde_json::from_value(value.clone()).map_err(|e| {
            Error::Validation(format!("bulk entity at index {index} is malformed: {e}"))
        })?;

        let label = raw.label.trim().to_string();
        if label.is_empty() {
            return Err(Error::Validation(format!(
                "bulk entity at index {index} has an empty label"
            )));
        }

        let id = raw
            .id
            .as_deref()
            .map(|s| {
                s.parse::<EntityId>().map_err(|e| {
                    Error::Validation(format!("bulk entity at index {index}: {e}"))
                })
            })
            .transpose()?;

        let category = raw
            .category
            .as_deref()
            .map(|c| {
                Category::parse_ignore_case(c).ok_or_else(|| {
                    Error::Validation(format!(
                        "bulk entity at index {index} has unknown category '{c}'"
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            id,
            label,
            category,
            selectors: raw.selectors,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkWriteSummary {
    pub scope_id: ScopeId,
    pub entities_created: u64,
    pub entities_updated: u64,
}

/// Direct bulk write of entity-shaped payloads into one scope.
///
/// With `merge`, a matching entity keeps its label and existing selectors and
/// gains the payload's; a category is only changed when the payload names one.
/// Without `merge`, a matching entity is replaced: label, category (default
/// `other`) and the selector set are rebuilt from the payload.
///
/// Matching is by `id` within the scope when given, else by normalized label.
#[derive(Clone)]
pub struct BulkWriter {
    store: Arc<dyn EntityStore>,
}

impl BulkWriter {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(level = "info", skip(self, payloads), fields(count = payloads.len()))]
    pub async fn write(
        &self,
        scope_id: ScopeId,
        payloads: &[serde_json::Value],
        merge: bool,
    ) -> Result<BulkWriteSummary> {
        let items = payloads
            .iter()
            .enumerate()
            .map(|(i, v)| EntityPayload::from_value(i, v))
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self.store.begin().await?;
        let result = Self::apply(tx.as_mut(), scope_id, items, merge).await;
        let summary = finish(tx, result).await?;

        tracing::info!(
            scope_id = %summary.scope_id,
            created = summary.entities_created,
            updated = summary.entities_updated,
            merge,
            "bulk write committed"
        );
        Ok(summary)
    }

    async fn apply(
        tx: &mut dyn StoreTx,
        scope_id: ScopeId,
        items: Vec<EntityPayload>,
        merge: bool,
    ) -> Result<BulkWriteSummary> {
        if tx.get_scope(scope_id).await?.is_none() {
            return Err(Error::NotFound(format!("scope '{scope_id}' not found")));
        }

        let mut summary = BulkWriteSummary {
            scope_id,
            ..Default::default()
        };

        for item in items {
            let now = Utc::now();
            let existing = match item.id {
                Some(id) => match tx.get_entity(id).await? {
                    Some(found) if found.scope_id != scope_id => {
                        return Err(Error::Conflict(format!(
                            "entity '{id}' belongs to another scope"
                        )));
                    }
                    found => found,
                },
                None => resolve(tx, &item.label, scope_id).await?,
            };

            let entity = match existing {
                Some(mut entity) => {
                    if merge {
                        if let Some(category) = item.category {
                            entity.category = category;
                        }
                    } else {
                        entity.label = item.label.clone();
                        entity.category = item.category.unwrap_or(Category::Other);
                        entity.selectors.clear();
                    }
                    add_selectors(&mut entity, &item);
                    entity.touch(now);
                    summary.entities_updated += 1;
                    entity
                }
                None => {
                    let mut entity = Entity::new(
                        scope_id,
                        item.label.clone(),
                        item.category.unwrap_or(Category::Other),
                        Some(now),
                    )?;
                    if let Some(id) = item.id {
                        entity.id = id;
                    }
                    add_selectors(&mut entity, &item);
                    summary.entities_created += 1;
                    entity
                }
            };

            tx.put_entity(&entity).await?;
        }

        Ok(summary)
    }
}

fn add_selectors(entity: &mut Entity, item: &EntityPayload) {
    entity.selectors.add(&item.label);
    for text in &item.selectors {
        entity.selectors.add(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scope;
    use crate::store::memory::MemoryEntityStore;
    use serde_json::json;

    async fn seeded() -> (MemoryEntityStore, BulkWriter, Scope) {
        let store = MemoryEntityStore::new();
        let scope = Scope::new("Leaks", "leaks", false, None).unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.put_scope(&scope).await.unwrap();
        let mut acme = Entity::new(scope.id, "Acme Corp", Category::Company, None).unwrap();
        acme.selectors.add("Acme Corp");
        acme.selectors.add("ACME-001");
        tx.put_entity(&acme).await.unwrap();
        tx.commit().await.unwrap();
        let writer = BulkWriter::new(Arc::new(store.clone()));
        (store, writer, scope)
    }

    #[tokio::test]
    async fn merge_keeps_existing_selectors_and_adds_new_ones() {
        let (store, writer, scope) = seeded().await;

        let summary = writer
            .write(
                scope.id,
                &[json!({"name": "acme corp", "selectors": ["Acme Holdings"]})],
                true,
            )
            .await
            .unwrap();

        assert_eq!(summary.entities_updated, 1);
        let entities = store.all_entities().await;
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label, "Acme Corp");
        assert_eq!(entities[0].category, Category::Company);
        assert_eq!(
            entities[0].selectors.texts(),
            vec!["Acme Corp", "ACME-001", "Acme Holdings"]
        );
    }

    #[tokio::test]
    async fn replace_rebuilds_label_category_and_selectors() {
        let (store, writer, scope) = seeded().await;

        writer
            .write(
                scope.id,
                &[json!({"label": "ACME CORP", "schema": "Organization"})],
                false,
            )
            .await
            .unwrap();

        let entities = store.all_entities().await;
        assert_eq!(entities[0].label, "ACME CORP");
        assert_eq!(entities[0].category, Category::Organization);
        assert_eq!(entities[0].selectors.texts(), vec!["ACME CORP"]);
    }

    #[tokio::test]
    async fn malformed_item_rejects_whole_payload_before_storage() {
        let (store, writer, scope) = seeded().await;
        let before = store.stats().transactions_begun;

        let err = writer
            .write(
                scope.id,
                &[
                    json!({"label": "Globex"}),
                    json!({"label": "Initech", "category": "spaceship"}),
                ],
                true,
            )
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(store.stats().transactions_begun, before);
        assert_eq!(store.all_entities().await.len(), 1);
    }

    #[tokio::test]
    async fn explicit_id_is_kept_for_new_entities() {
        let (store, writer, scope) = seeded().await;
        let id = EntityId::new();

        writer
            .write(
                scope.id,
                &[json!({"id": id.to_string(), "label": "Globex", "category": "company"})],
                true,
            )
            .await
            .unwrap();

        let entities = store.all_entities().await;
        assert!(entities.iter().any(|e| e.id == id && e.label == "Globex"));
    }
}
