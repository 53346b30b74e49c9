use std::error::Error as StdError;

/// Common error type for `atlas_core`.
///
/// Storage and source backends should preserve the underlying error chain
/// via `Error::backend`. Enqueue failures keep theirs via `Error::scheduling`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Fatal for the whole batch; raised before any storage is touched.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("scheduling error: {context}")]
    Scheduling {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "atlas.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[tracing::instrument(level = "debug", name = "atlas.error.scheduling", skip(source))]
    pub fn scheduling(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Scheduling {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
