//! Logging setup and component wiring.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use shardex_catalog::CatalogStore;
use shardex_config::ShardexConfig;
use shardex_fetch::{IpfsFetcher, TorrentIndexClient, ipfs};
use shardex_torrent::{DriverConfig, TorrentDriver, create_session};

/// Install the global tracing subscriber: `RUST_LOG`-driven filtering,
/// human-readable output in debug builds, JSON in release builds.
pub(crate) fn init_logging() {
    if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(default_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(default_filter())
            .json()
            .init();
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Owned handles to every service the commands drive.
pub(crate) struct AppContext {
    pub(crate) config: ShardexConfig,
    pub(crate) catalog: CatalogStore,
    pub(crate) driver: TorrentDriver,
    pub(crate) upstream: TorrentIndexClient,
    pub(crate) ipfs: IpfsFetcher,
}

/// Open the catalog and spawn the torrent driver per the configuration.
pub(crate) async fn build(config: ShardexConfig) -> Result<AppContext> {
    let catalog = CatalogStore::open(&config.catalog_db_path, config.query_timeout())
        .await
        .context("failed to open the catalog database")?;

    let driver = TorrentDriver::spawn(
        create_session(),
        DriverConfig {
            downloads_root: config.downloads_root.clone(),
            metadata_timeout: config.metadata_timeout(),
        },
    )
    .context("failed to start the torrent driver")?;

    let upstream = TorrentIndexClient::new(
        config.torrent_index_url.clone(),
        config.torrent_file_base_url.clone(),
    );
    let ipfs = IpfsFetcher::new(config.ipfs_gateways.clone(), ipfs::DEFAULT_TIMEOUT);

    Ok(AppContext {
        config,
        catalog,
        driver,
        upstream,
        ipfs,
    })
}
