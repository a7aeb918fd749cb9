//! Default values for configuration options.

/// Directory all torrent payload and sidecar blobs live under.
pub const DOWNLOADS_ROOT: &str = "./downloads";
/// Catalog database file.
pub const CATALOG_DB_PATH: &str = "./catalog.db";
/// Per-torrent metadata arrival bound, in seconds.
pub const METADATA_TIMEOUT_SECONDS: u64 = 60;
/// Per-search work bound, in seconds.
pub const QUERY_TIMEOUT_SECONDS: u64 = 15;
/// Commit granularity for bulk ingest.
pub const INGEST_BATCH_SIZE: usize = 1_000;
/// Upstream torrent index URL.
pub const TORRENT_INDEX_URL: &str = "https://annas-archive.org/dyn/torrents.json";
/// Base URL individual `.torrent` files are fetched under.
pub const TORRENT_FILE_BASE_URL: &str = "https://annas-archive.org/dyn/small_file/torrents/";
