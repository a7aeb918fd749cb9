//! Client for the upstream torrent repository: the JSON torrent index and
//! individual `.torrent` payloads addressed by relative path.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::FetchError;

/// Bound for downloading the full torrent index.
pub const INDEX_TIMEOUT: Duration = Duration::from_secs(120);
/// Bound for downloading one `.torrent` file.
pub const TORRENT_TIMEOUT: Duration = Duration::from_secs(20);

/// One entry of the upstream torrent index.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TorrentIndexEntry {
    /// Download URL of the `.torrent` file.
    #[serde(default)]
    pub url: Option<String>,
    /// Magnet URI for the same torrent.
    #[serde(default)]
    pub magnet_link: Option<String>,
    /// Opaque upstream timestamp.
    #[serde(default)]
    pub added_to_torrents_list_at: Option<String>,
    /// Total payload size in bytes.
    #[serde(default)]
    pub data_size: Option<i64>,
    /// Number of files in the torrent.
    #[serde(default)]
    pub num_files: Option<i64>,
    /// Upstream obsolete marker.
    #[serde(default)]
    pub obsolete: Option<bool>,
    /// Upstream embargo marker.
    #[serde(default)]
    pub embargo: Option<bool>,
}

/// HTTP client for the upstream torrent repository.
#[derive(Debug, Clone)]
pub struct TorrentIndexClient {
    client: reqwest::Client,
    index_url: String,
    file_base_url: String,
}

impl TorrentIndexClient {
    /// Build a client from the index URL and the `.torrent` base URL.
    #[must_use]
    pub fn new(index_url: impl Into<String>, file_base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            index_url: index_url.into(),
            file_base_url: file_base_url.into(),
        }
    }

    /// Download and decode the full torrent index.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, or a
    /// payload that is not the expected JSON array.
    pub async fn list(&self) -> Result<Vec<TorrentIndexEntry>, FetchError> {
        let response = self
            .client
            .get(&self.index_url)
            .timeout(INDEX_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: self.index_url.clone(),
            });
        }
        let body = response.bytes().await?;
        let entries: Vec<TorrentIndexEntry> =
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode { source })?;
        info!(entries = entries.len(), "fetched upstream torrent index");
        Ok(entries)
    }

    /// Download one `.torrent` payload by its repository-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn fetch_torrent(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}{path}", self.file_base_url);
        let response = self
            .client
            .get(&url)
            .timeout(TORRENT_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Strip the repository base from an absolute `.torrent` URL, yielding
    /// the relative path the catalog stores.
    #[must_use]
    pub fn relative_path<'a>(&self, url: &'a str) -> &'a str {
        url.strip_prefix(&self.file_base_url).unwrap_or(url)
    }
}
