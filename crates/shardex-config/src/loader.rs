//! Configuration loading: YAML file plus environment override.

use std::path::Path;

use crate::error::ConfigError;
use crate::model::ShardexConfig;

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "SHARDEX_CONFIG";

/// Load configuration.
///
/// Resolution order: an explicit `path` argument, then the
/// `SHARDEX_CONFIG` environment variable, then built-in defaults when no
/// file is named. A named file that does not exist is an error; relying on
/// defaults is not.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or when the
/// resulting configuration fails validation.
pub fn load(path: Option<&Path>) -> Result<ShardexConfig, ConfigError> {
    let env_path = std::env::var_os(CONFIG_PATH_ENV).map(std::path::PathBuf::from);
    let selected = path.map(Path::to_path_buf).or(env_path);

    let config = match selected {
        Some(path) => {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?
        }
        None => ShardexConfig::default(),
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_path_yields_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.ingest_batch_size, 1_000);
        assert!(config.ipfs_gateways.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shardex.yaml");
        std::fs::write(
            &path,
            "downloads_root: /srv/shards\nipfs_gateways:\n  - https://ipfs.io\nquery_timeout_seconds: 5\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.downloads_root, Path::new("/srv/shards"));
        assert_eq!(config.ipfs_gateways, vec!["https://ipfs.io".to_owned()]);
        assert_eq!(config.query_timeout_seconds, 5);
        // Untouched options keep their defaults.
        assert_eq!(config.metadata_timeout_seconds, 60);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shardex.yaml");
        std::fs::write(&path, "downloads_roots: typo\n").unwrap();
        assert!(matches!(
            load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn named_but_missing_file_is_an_error() {
        assert!(matches!(
            load(Some(Path::new("/nonexistent/shardex.yaml"))),
            Err(ConfigError::Io { .. })
        ));
    }
}
