//! Error types for the torrent driver.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::InfoHash;

/// Errors raised by the torrent driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Metadata did not arrive within the configured bound.
    #[error("torrent metadata did not arrive in time")]
    MetadataTimeout {
        /// Torrent that was waiting for metadata.
        hash: InfoHash,
    },
    /// A wanted basename does not exist in the torrent's file table.
    #[error("wanted file not present in torrent")]
    FileNotFound {
        /// The basename that was requested.
        filename: String,
    },
    /// No file of the torrent covers the requested stream offset.
    #[error("no file at the requested offset")]
    NoFileAtOffset {
        /// The absolute offset that was probed.
        offset: u64,
    },
    /// The torrent is not registered with the session.
    #[error("torrent not registered")]
    TorrentNotFound {
        /// The infohash that was looked up.
        hash: InfoHash,
    },
    /// A magnet URI carried no recognizable infohash.
    #[error("magnet uri carries no infohash")]
    MalformedMagnet,
    /// The underlying engine rejected or failed an operation.
    #[error("engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Opaque engine failure.
        #[source]
        source: anyhow::Error,
    },
    /// Persisting or removing a blob under the downloads root failed.
    #[error("downloads-root io failed")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The driver worker task is gone; no further commands can complete.
    #[error("driver worker unavailable")]
    WorkerGone,
}
