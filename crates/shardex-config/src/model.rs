//! The configuration model.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::ConfigError;

/// All recognized configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShardexConfig {
    /// Where all torrent payload and sidecar blobs are stored.
    pub downloads_root: PathBuf,
    /// The catalog database file.
    pub catalog_db_path: PathBuf,
    /// Ordered IPFS gateway URL prefixes; empty disables substitution.
    pub ipfs_gateways: Vec<String>,
    /// Per-torrent metadata arrival bound.
    pub metadata_timeout_seconds: u64,
    /// Per-search work bound.
    pub query_timeout_seconds: u64,
    /// Commit granularity for bulk ingest.
    pub ingest_batch_size: usize,
    /// Upstream torrent index URL.
    pub torrent_index_url: String,
    /// Base URL individual `.torrent` files are fetched under.
    pub torrent_file_base_url: String,
}

impl Default for ShardexConfig {
    fn default() -> Self {
        Self {
            downloads_root: PathBuf::from(defaults::DOWNLOADS_ROOT),
            catalog_db_path: PathBuf::from(defaults::CATALOG_DB_PATH),
            ipfs_gateways: Vec::new(),
            metadata_timeout_seconds: defaults::METADATA_TIMEOUT_SECONDS,
            query_timeout_seconds: defaults::QUERY_TIMEOUT_SECONDS,
            ingest_batch_size: defaults::INGEST_BATCH_SIZE,
            torrent_index_url: defaults::TORRENT_INDEX_URL.to_owned(),
            torrent_file_base_url: defaults::TORRENT_FILE_BASE_URL.to_owned(),
        }
    }
}

impl ShardexConfig {
    /// Check every option against its constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.downloads_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                option: "downloads_root",
                reason: "must not be empty",
            });
        }
        if self.catalog_db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                option: "catalog_db_path",
                reason: "must not be empty",
            });
        }
        if self.metadata_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                option: "metadata_timeout_seconds",
                reason: "must be positive",
            });
        }
        if self.query_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                option: "query_timeout_seconds",
                reason: "must be positive",
            });
        }
        if self.ingest_batch_size == 0 {
            return Err(ConfigError::Invalid {
                option: "ingest_batch_size",
                reason: "must be positive",
            });
        }
        if self
            .ipfs_gateways
            .iter()
            .any(|gateway| gateway.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                option: "ipfs_gateways",
                reason: "entries must not be blank",
            });
        }
        Ok(())
    }

    /// Metadata bound as a [`Duration`].
    #[must_use]
    pub const fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_seconds)
    }

    /// Search budget as a [`Duration`].
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        ShardexConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = ShardexConfig {
            ingest_batch_size: 0,
            ..ShardexConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                option: "ingest_batch_size",
                ..
            })
        ));
    }

    #[test]
    fn blank_gateway_entries_are_rejected() {
        let config = ShardexConfig {
            ipfs_gateways: vec!["https://ipfs.io".to_owned(), "  ".to_owned()],
            ..ShardexConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
