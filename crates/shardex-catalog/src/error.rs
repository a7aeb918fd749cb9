//! Error types for the catalog store.

use thiserror::Error;

/// Result alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors raised by the catalog store.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The requested row does not exist.
    #[error("catalog row not found")]
    NotFound {
        /// Entity kind that was looked up.
        entity: &'static str,
    },
    /// A database operation failed.
    #[error("database operation failed")]
    Query {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        #[source]
        source: sqlx::Error,
    },
    /// The per-request work budget elapsed before the query finished.
    #[error("query interrupted")]
    QueryInterrupted,
    /// A stored value could not be decoded into its model form.
    #[error("stored value could not be decoded")]
    Codec {
        /// Column the value came from.
        field: &'static str,
    },
}

impl CatalogError {
    pub(crate) fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Query { operation, source }
    }
}
