//! Error types for seed management.

use thiserror::Error;

/// Errors raised by the seed control operations.
#[derive(Debug, Error)]
pub enum SeederError {
    /// The record is missing state a seed request depends on.
    #[error("record cannot be seeded")]
    Precondition {
        /// MD5 of the offending record.
        md5: String,
        /// Which prerequisite is missing.
        missing: &'static str,
    },
    /// A catalog operation failed.
    #[error("catalog operation failed")]
    Catalog {
        /// Underlying catalog error.
        #[from]
        source: shardex_catalog::CatalogError,
    },
}
