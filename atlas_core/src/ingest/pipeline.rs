use crate::catalog::resolver::resolve;
use crate::catalog::scopes::get_or_create_scope;
use crate::ingest::models::{
    CategoryPolicy, FieldMapping, IngestSummary, LoadDescriptor, LoadOutcome, RawRecord,
    parse_default_category,
};
use crate::models::{Category, Entity, Scope, ScopeId};
use crate::store::finish;
use crate::store::traits::{EntityStore, StoreTx};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;

/// Record ingestion: resolves each row against the scope's entities and
/// upserts entity + selectors, committing the whole batch at once.
///
/// Rows are processed strictly in order on a single transaction, so a label
/// repeated within one batch resolves to the entity created for its first
/// occurrence.
#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn EntityStore>,
    category_policy: CategoryPolicy,
}

impl IngestPipeline {
    #[tracing::instrument(level = "debug", skip(store))]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            category_policy: CategoryPolicy::default(),
        }
    }

    pub fn with_category_policy(mut self, policy: CategoryPolicy) -> Self {
        self.category_policy = policy;
        self
    }

    pub fn category_policy(&self) -> CategoryPolicy {
        self.category_policy
    }

    /// Ingest `records` into an existing scope.
    ///
    /// `default_category` and `mapping` are checked before a transaction is
    /// opened. Any error after that aborts the whole batch.
    #[tracing::instrument(level = "info", skip(self, records, mapping), fields(scope_id = %scope_id))]
    pub async fn ingest<I>(
        &self,
        scope_id: ScopeId,
        records: I,
        mapping: &FieldMapping,
        default_category: &str,
    ) -> Result<IngestSummary>
    where
        I: IntoIterator<Item = Result<RawRecord>> + Send,
        I::IntoIter: Send,
    {
        let default_category = parse_default_category(Some(default_category))?;
        mapping.validate()?;

        let mut tx = self.store.begin().await?;
        let result: Result<IngestSummary> = async {
            let scope = tx
                .get_scope(scope_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("scope '{scope_id}' not found")))?;
            self.ingest_rows(tx.as_mut(), &scope, records, mapping, default_category)
                .await
        }
        .await;
        let summary = finish(tx, result).await?;

        tracing::info!(
            scope_id = %summary.scope_id,
            records_seen = summary.records_seen,
            records_skipped = summary.records_skipped,
            entities_created = summary.entities_created,
            entities_matched = summary.entities_matched,
            selectors_created = summary.selectors_created,
            "ingest committed"
        );
        Ok(summary)
    }

    /// Validate `descriptor`, get-or-create its list and ingest `records`
    /// into it, all in one transaction.
    #[tracing::instrument(level = "info", skip(self, descriptor, records), fields(list = ?descriptor.list))]
    pub async fn load<I>(&self, descriptor: &LoadDescriptor, records: I) -> Result<LoadOutcome>
    where
        I: IntoIterator<Item = Result<RawRecord>> + Send,
        I::IntoIter: Send,
    {
        let valid = descriptor.validate()?;

        let mut tx = self.store.begin().await?;
        let result: Result<LoadOutcome> = async {
            let (scope, scope_created) =
                get_or_create_scope(tx.as_mut(), &valid.list, valid.public).await?;
            let summary = self
                .ingest_rows(
                    tx.as_mut(),
                    &scope,
                    records,
                    &valid.mapping,
                    valid.default_category,
                )
                .await?;
            Ok(LoadOutcome {
                scope,
                scope_created,
                summary,
            })
        }
        .await;
        let outcome = finish(tx, result).await?;

        tracing::info!(
            scope_id = %outcome.scope.id,
            scope_created = outcome.scope_created,
            entities_created = outcome.summary.entities_created,
            selectors_created = outcome.summary.selectors_created,
            "load committed"
        );
        Ok(outcome)
    }

    async fn ingest_rows<I>(
        &self,
        tx: &mut dyn StoreTx,
        scope: &Scope,
        records: I,
        mapping: &FieldMapping,
        default_category: Category,
    ) -> Result<IngestSummary>
    where
        I: IntoIterator<Item = Result<RawRecord>> + Send,
        I::IntoIter: Send,
    {
        let mut summary = IngestSummary::new(scope.id);

        for (index, record) in records.into_iter().enumerate() {
            let record = record.inspect_err(|e| {
                tracing::warn!(index, error = %e, "record source failed; aborting batch");
            })?;
            summary.records_seen += 1;

            let Some(label) = record
                .get(&mapping.label)
                .map(str::trim)
                .filter(|l| !l.is_empty())
            else {
                summary.records_skipped += 1;
                continue;
            };

            let category = record
                .get(&mapping.category)
                .and_then(Category::parse)
                .unwrap_or(default_category);

            let now = Utc::now();
            let (mut entity, created) = match resolve(tx, label, scope.id).await? {
                Some(existing) => (existing, false),
                None => (Entity::new(scope.id, label, category, Some(now))?, true),
            };

            let selector = record.get(&mapping.selector);
            for text in [Some(label), selector].into_iter().flatten() {
                if entity.selectors.add(text) {
                    summary.selectors_created += 1;
                }
            }

            if created || self.category_policy == CategoryPolicy::LastWriteWins {
                entity.category = category;
            }
            entity.touch(now);
            tx.put_entity(&entity).await?;

            if created {
                summary.entities_created += 1;
            } else {
                summary.entities_matched += 1;
            }
        }

        Ok(summary)
    }
}
