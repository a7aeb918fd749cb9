//! IPFS gateway retrieval: first successful gateway × CID wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::FetchError;

/// Default per-request bound for gateway downloads.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retrieves file payloads through public IPFS HTTP gateways.
#[derive(Debug, Clone)]
pub struct IpfsFetcher {
    client: reqwest::Client,
    gateways: Vec<String>,
    timeout: Duration,
}

impl IpfsFetcher {
    /// Build a fetcher over an ordered list of gateway URL prefixes.
    ///
    /// An empty list disables the fetcher; [`IpfsFetcher::fetch`] then fails
    /// immediately with zero attempts.
    #[must_use]
    pub fn new(gateways: Vec<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateways,
            timeout,
        }
    }

    /// Whether any gateway is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.gateways.is_empty()
    }

    /// Try every CID against every gateway until one streams a body.
    ///
    /// CIDs are tried in sorted order with CIDv1 (`ba…`) forms first. The
    /// body is streamed to `downloads_root/.ipfs.<cid>`; the staging path
    /// and the winning CID are returned.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ExhaustedSources`] when every combination
    /// fails, or an I/O error when the staging file cannot be written.
    pub async fn fetch(
        &self,
        cids: &[String],
        downloads_root: &Path,
    ) -> Result<(String, PathBuf), FetchError> {
        let mut ordered: Vec<&String> = cids.iter().collect();
        ordered.sort_by_key(|cid| (!cid.starts_with("ba"), (*cid).clone()));

        let mut attempts = 0_usize;
        for cid in ordered {
            for gateway in &self.gateways {
                attempts += 1;
                let url = format!("{}/ipfs/{}", gateway.trim_end_matches('/'), cid);
                match self.stream_to_staging(&url, cid, downloads_root).await {
                    Ok(path) => {
                        info!(cid = %cid, gateway = %gateway, "ipfs retrieval succeeded");
                        return Ok((cid.clone(), path));
                    }
                    Err(err) => {
                        debug!(cid = %cid, gateway = %gateway, error = %err, "ipfs attempt failed");
                    }
                }
            }
        }
        Err(FetchError::ExhaustedSources { attempts })
    }

    async fn stream_to_staging(
        &self,
        url: &str,
        cid: &str,
        downloads_root: &Path,
    ) -> Result<PathBuf, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: url.to_owned(),
            });
        }

        let staging = downloads_root.join(format!(".ipfs.{cid}"));
        let mut file = File::create(&staging).await?;
        let mut response = response;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(staging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use tempfile::TempDir;

    #[tokio::test]
    async fn first_successful_combination_wins() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/ipfs/bafkA");
                then.status(200).body("payload-bytes");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = IpfsFetcher::new(vec![server.base_url()], DEFAULT_TIMEOUT);
        let (cid, path) = fetcher
            .fetch(&["QmA".to_owned(), "bafkA".to_owned()], dir.path())
            .await
            .unwrap();

        // CIDv1 sorts ahead of the legacy form.
        assert_eq!(cid, "bafkA");
        assert_eq!(path, dir.path().join(".ipfs.bafkA"));
        assert_eq!(std::fs::read(path).unwrap(), b"payload-bytes");
    }

    #[tokio::test]
    async fn failing_gateway_falls_through_to_the_next() {
        let broken = MockServer::start_async().await;
        broken
            .mock_async(|when, then| {
                when.method("GET").path_includes("/ipfs/");
                then.status(504);
            })
            .await;
        let working = MockServer::start_async().await;
        working
            .mock_async(|when, then| {
                when.method("GET").path("/ipfs/QmA");
                then.status(200).body("ok");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = IpfsFetcher::new(vec![broken.base_url(), working.base_url()], DEFAULT_TIMEOUT);
        let (cid, _path) = fetcher.fetch(&["QmA".to_owned()], dir.path()).await.unwrap();
        assert_eq!(cid, "QmA");
    }

    #[tokio::test]
    async fn exhausting_all_sources_reports_attempt_count() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path_includes("/ipfs/");
                then.status(404);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = IpfsFetcher::new(vec![server.base_url()], DEFAULT_TIMEOUT);
        let err = fetcher
            .fetch(&["QmA".to_owned(), "QmB".to_owned()], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ExhaustedSources { attempts: 2 }));
    }

    #[tokio::test]
    async fn no_gateways_means_no_attempts() {
        let dir = TempDir::new().unwrap();
        let fetcher = IpfsFetcher::new(Vec::new(), DEFAULT_TIMEOUT);
        assert!(!fetcher.is_enabled());
        let err = fetcher.fetch(&["QmA".to_owned()], dir.path()).await.unwrap_err();
        assert!(matches!(err, FetchError::ExhaustedSources { attempts: 0 }));
    }
}
