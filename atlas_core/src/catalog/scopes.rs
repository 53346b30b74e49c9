use crate::models::Scope;
use crate::store::traits::StoreTx;
use crate::{Error, Result};

/// Look up a scope by (normalized) label, creating it when absent.
///
/// Returns the scope and whether it was created by this call. A newly created
/// scope uses its label as foreign id unless that foreign id is already taken.
#[tracing::instrument(level = "debug", skip(tx))]
pub async fn get_or_create_scope(
    tx: &mut dyn StoreTx,
    label: &str,
    public: bool,
) -> Result<(Scope, bool)> {
    if label.trim().is_empty() {
        return Err(Error::Validation("scope label is required".to_string()));
    }

    if let Some(existing) = tx.find_scope_by_label(label).await? {
        return Ok((existing, false));
    }

    let mut scope = Scope::new(label, label, public, None)?;
    if tx.find_scope_by_foreign_id(&scope.foreign_id).await?.is_some() {
        scope.foreign_id = scope.id.to_string();
    }
    tx.put_scope(&scope).await?;
    tracing::info!(scope_id = %scope.id, label = %scope.label, public, "created scope");
    Ok((scope, true))
}
