//! Error types for configuration handling.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("configuration file unreadable")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file was not valid YAML for the expected shape.
    #[error("configuration file malformed")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
    /// A configuration value violates its constraints.
    #[error("configuration value invalid")]
    Invalid {
        /// Option that failed validation.
        option: &'static str,
        /// Static description of the constraint.
        reason: &'static str,
    },
}
