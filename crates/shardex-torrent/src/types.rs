//! Driver-facing torrent types shared with the rest of the system.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Piece/file priority meaning "do not download".
pub const PRIORITY_SKIP: u8 = 0;
/// Highest piece/file priority the engine recognises.
pub const PRIORITY_HIGH: u8 = 7;

/// Stable torrent identity: the infohash in its canonical textual form
/// (40 hex characters or 32 base32 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InfoHash(String);

impl InfoHash {
    /// Wrap a canonical infohash string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The textual form, suitable for filesystem keys.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InfoHash {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// How a torrent is handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentSource {
    /// A magnet URI resolved through the DHT.
    Magnet {
        /// The magnet URI.
        uri: String,
    },
    /// A `.torrent` file already on disk.
    TorrentFile {
        /// Path to the metainfo file.
        path: PathBuf,
    },
}

impl TorrentSource {
    /// Convenience constructor for magnet sources.
    #[must_use]
    pub fn magnet(uri: impl Into<String>) -> Self {
        Self::Magnet { uri: uri.into() }
    }

    /// Convenience constructor for on-disk metainfo sources.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::TorrentFile { path: path.into() }
    }
}

/// One file of a torrent's metadata, with its position in the logical
/// concatenated data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFileEntry {
    /// Index within the torrent's file table.
    pub index: usize,
    /// Relative path inside the torrent payload.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Absolute offset of the file's first byte in the logical stream.
    pub offset: u64,
}

impl TorrentFileEntry {
    /// Whether an absolute stream offset falls inside this file.
    #[must_use]
    pub const fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.offset + self.size
    }

    /// Basename of the in-torrent path.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Transfer snapshot reported by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TorrentStatus {
    /// Overall completion in `[0, 1]` over the wanted file set.
    pub progress: f64,
    /// Current download rate in bytes per second.
    pub download_rate: u64,
    /// Current upload rate in bytes per second.
    pub upload_rate: u64,
    /// Bytes completed per file, in file-table order.
    pub file_progress: Vec<u64>,
}

impl TorrentStatus {
    /// Whether the wanted payload finished downloading.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        (self.progress - 1.0).abs() < f64::EPSILON || self.progress >= 1.0
    }
}

/// Alerts drained from the engine's queue.
#[derive(Debug, Clone)]
pub enum EngineAlert {
    /// A requested piece read completed with the raw piece buffer.
    ReadPiece {
        /// Torrent the piece belongs to.
        hash: InfoHash,
        /// Piece index.
        piece: u32,
        /// Raw piece bytes.
        data: Vec<u8>,
    },
    /// The engine serialized resume data for a torrent.
    ResumeData {
        /// Torrent the blob belongs to.
        hash: InfoHash,
        /// Opaque engine-defined resume payload.
        payload: Vec<u8>,
    },
    /// Torrent metadata became available (magnet resolution finished).
    MetadataReceived {
        /// Torrent whose metadata arrived.
        hash: InfoHash,
    },
    /// The engine reported an error condition.
    Error {
        /// Torrent associated with the error, when known.
        hash: Option<InfoHash>,
        /// Human-readable failure description.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_entry_offset_containment() {
        let entry = TorrentFileEntry {
            index: 0,
            path: "shard/a.zip".to_owned(),
            size: 100,
            offset: 1_000,
        };
        assert!(!entry.contains_offset(999));
        assert!(entry.contains_offset(1_000));
        assert!(entry.contains_offset(1_099));
        assert!(!entry.contains_offset(1_100));
        assert_eq!(entry.basename(), "a.zip");
    }

    #[test]
    fn status_completion_threshold() {
        assert!(
            TorrentStatus {
                progress: 1.0,
                ..TorrentStatus::default()
            }
            .is_complete()
        );
        assert!(
            !TorrentStatus {
                progress: 0.999,
                ..TorrentStatus::default()
            }
            .is_complete()
        );
    }
}
