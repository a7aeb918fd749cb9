//! Error types for extraction.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while extracting a payload.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The record is missing the state extraction depends on (byteoffset,
    /// torrent reference, or magnet link).
    #[error("record not extractable")]
    PreconditionViolated {
        /// MD5 of the offending record.
        md5: String,
        /// Which prerequisite is missing.
        missing: &'static str,
    },
    /// The referenced torrent row does not exist.
    #[error("torrent record not found")]
    TorrentNotFound {
        /// The dangling torrent reference.
        torrent_id: i64,
    },
    /// The shard path maps to no supported container format.
    #[error("unknown container format")]
    UnknownContainer {
        /// In-torrent path of the shard.
        path: String,
    },
    /// Container framing failed.
    #[error(transparent)]
    Framing(#[from] shardex_archive::FramingError),
    /// A catalog operation failed.
    #[error("catalog operation failed")]
    Catalog {
        /// Underlying catalog error.
        #[from]
        source: shardex_catalog::CatalogError,
    },
    /// A driver operation failed.
    #[error("torrent driver operation failed")]
    Driver {
        /// Underlying driver error.
        #[from]
        source: shardex_torrent::DriverError,
    },
    /// Fetching torrent metadata from the upstream repository failed.
    #[error("upstream metadata fetch failed")]
    Fetch {
        /// Underlying fetch error.
        #[from]
        source: shardex_fetch::FetchError,
    },
    /// Reading the on-disk archive failed.
    #[error("archive io failed")]
    Io {
        /// Path of the archive involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
