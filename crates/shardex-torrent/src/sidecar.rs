//! Per-torrent byte-offset sidecar: `<infohash>_byteoffsets.json`.
//!
//! The sidecar maps known absolute payload offsets to the in-torrent file
//! containing them, so the extractor's fast path can reconstruct a payload
//! straight from the on-disk archive without piece-level I/O. The planner
//! is the only producer and the extractor's fast path the only consumer;
//! writes go through a temporary file and an atomic rename, and the
//! consumer tolerates the file's absence.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::InfoHash;

const SIDECAR_SUFFIX: &str = "_byteoffsets.json";

/// Where a known payload offset lives inside the torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarEntry {
    /// In-torrent path of the archive shard containing the payload.
    pub path: String,
    /// Absolute offset of that file's first byte in the logical stream.
    pub start_offset: u64,
}

/// The decoded sidecar map for one torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteOffsetMap {
    entries: BTreeMap<u64, SidecarEntry>,
}

impl ByteOffsetMap {
    /// Path of the sidecar file for a torrent.
    #[must_use]
    pub fn file_path(downloads_root: &Path, hash: &InfoHash) -> PathBuf {
        downloads_root.join(format!("{hash}{SIDECAR_SUFFIX}"))
    }

    /// Load the sidecar for a torrent, `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or decoded.
    pub fn load(downloads_root: &Path, hash: &InfoHash) -> io::Result<Option<Self>> {
        let path = Self::file_path(downloads_root, hash);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let decoded: BTreeMap<String, SidecarEntry> =
            serde_json::from_str(&raw).map_err(io::Error::other)?;
        let mut entries = BTreeMap::new();
        for (key, entry) in decoded {
            let offset = key.parse::<u64>().map_err(io::Error::other)?;
            entries.insert(offset, entry);
        }
        Ok(Some(Self { entries }))
    }

    /// Write the sidecar atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary file cannot be written or the
    /// rename fails.
    pub fn store(&self, downloads_root: &Path, hash: &InfoHash) -> io::Result<()> {
        let encoded: BTreeMap<String, &SidecarEntry> = self
            .entries
            .iter()
            .map(|(offset, entry)| (offset.to_string(), entry))
            .collect();
        let json = serde_json::to_string_pretty(&encoded).map_err(io::Error::other)?;

        let path = Self::file_path(downloads_root, hash);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)
    }

    /// Look up the entry for a payload offset.
    #[must_use]
    pub fn get(&self, offset: u64) -> Option<&SidecarEntry> {
        self.entries.get(&offset)
    }

    /// Record (or overwrite) the entry for a payload offset.
    pub fn insert(&mut self, offset: u64, entry: SidecarEntry) {
        self.entries.insert(offset, entry);
    }

    /// Whether the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_sidecar_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let hash = InfoHash::new("c".repeat(40));
        assert_eq!(ByteOffsetMap::load(dir.path(), &hash).unwrap(), None);
    }

    #[test]
    fn store_and_load_round_trip_with_string_keys() {
        let dir = TempDir::new().unwrap();
        let hash = InfoHash::new("d".repeat(40));

        let mut map = ByteOffsetMap::default();
        map.insert(
            1_000,
            SidecarEntry {
                path: "shard.zip".to_owned(),
                start_offset: 0,
            },
        );
        map.store(dir.path(), &hash).unwrap();

        // Keys persist as strings, matching the documented layout.
        let raw = std::fs::read_to_string(ByteOffsetMap::file_path(dir.path(), &hash)).unwrap();
        assert!(raw.contains("\"1000\""));

        let loaded = ByteOffsetMap::load(dir.path(), &hash).unwrap().unwrap();
        assert_eq!(loaded.get(1_000).unwrap().path, "shard.zip");
        assert_eq!(loaded.get(1_000).unwrap().start_offset, 0);
    }

    #[test]
    fn rewrite_preserves_existing_entries() {
        let dir = TempDir::new().unwrap();
        let hash = InfoHash::new("e".repeat(40));

        let mut map = ByteOffsetMap::default();
        map.insert(
            10,
            SidecarEntry {
                path: "a.tar".to_owned(),
                start_offset: 0,
            },
        );
        map.store(dir.path(), &hash).unwrap();

        let mut reloaded = ByteOffsetMap::load(dir.path(), &hash).unwrap().unwrap();
        reloaded.insert(
            20,
            SidecarEntry {
                path: "a.tar".to_owned(),
                start_offset: 0,
            },
        );
        reloaded.store(dir.path(), &hash).unwrap();

        let last = ByteOffsetMap::load(dir.path(), &hash).unwrap().unwrap();
        assert!(last.get(10).is_some());
        assert!(last.get(20).is_some());
    }
}
