use crate::Result;
use crate::catalog::normalize::normalize_label;
use crate::models::{Entity, ScopeId};
use crate::store::traits::StoreTx;

/// Find the entity in `scope_id` whose normalized label equals the normalized
/// form of `label`.
///
/// Read-only. Runs on the caller's transaction so entities staged earlier in
/// the same batch are visible. Never matches across scopes and never matches
/// fuzzily.
#[tracing::instrument(level = "debug", skip(tx))]
pub async fn resolve(
    tx: &mut dyn StoreTx,
    label: &str,
    scope_id: ScopeId,
) -> Result<Option<Entity>> {
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return Ok(None);
    }
    tx.find_entity_by_normalized_label(scope_id, &normalized)
        .await
}
