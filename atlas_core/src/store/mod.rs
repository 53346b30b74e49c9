//! Transactional storage for scopes, entities and selectors.

pub mod memory;
pub mod sqlite;
pub mod traits;

use crate::Result;
use traits::StoreTx;

/// Commit `tx` when `result` is `Ok`, otherwise roll it back and hand the
/// original error back to the caller.
pub async fn finish<T>(tx: Box<dyn StoreTx>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed after aborted batch");
            }
            Err(err)
        }
    }
}
