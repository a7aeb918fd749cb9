//! Infohash-keyed persistence under the downloads root: engine resume
//! blobs (`<infohash>.fastresume`) and cached metainfo
//! (`<infohash>.torrent`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::InfoHash;

const FASTRESUME_SUFFIX: &str = ".fastresume";
const TORRENT_SUFFIX: &str = ".torrent";

/// File manager for resume blobs and cached `.torrent` metadata.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    downloads_root: PathBuf,
}

impl ResumeStore {
    /// Construct a store rooted at the downloads directory.
    #[must_use]
    pub fn new(downloads_root: impl Into<PathBuf>) -> Self {
        Self {
            downloads_root: downloads_root.into(),
        }
    }

    /// The downloads root this store writes under.
    #[must_use]
    pub fn downloads_root(&self) -> &Path {
        &self.downloads_root
    }

    /// Ensure the downloads root exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn ensure_initialized(&self) -> io::Result<()> {
        if !self.downloads_root.exists() {
            fs::create_dir_all(&self.downloads_root)?;
        }
        Ok(())
    }

    /// Path of the resume blob for a torrent.
    #[must_use]
    pub fn fastresume_path(&self, hash: &InfoHash) -> PathBuf {
        self.downloads_root
            .join(format!("{hash}{FASTRESUME_SUFFIX}"))
    }

    /// Path of the cached metainfo file for a torrent.
    #[must_use]
    pub fn torrent_path(&self, hash: &InfoHash) -> PathBuf {
        self.downloads_root.join(format!("{hash}{TORRENT_SUFFIX}"))
    }

    /// Persist a resume blob.
    ///
    /// # Errors
    ///
    /// Returns an error when the blob cannot be written.
    pub fn write_fastresume(&self, hash: &InfoHash, payload: &[u8]) -> io::Result<()> {
        self.ensure_initialized()?;
        fs::write(self.fastresume_path(hash), payload)
    }

    /// Remove a resume blob; absent blobs are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing blob cannot be deleted.
    pub fn remove_fastresume(&self, hash: &InfoHash) -> io::Result<()> {
        match fs::remove_file(self.fastresume_path(hash)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Cache metainfo bytes, returning the cached path.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write_torrent(&self, hash: &InfoHash, bytes: &[u8]) -> io::Result<PathBuf> {
        self.ensure_initialized()?;
        let path = self.torrent_path(hash);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Whether the metainfo for a torrent is already cached.
    #[must_use]
    pub fn has_torrent(&self, hash: &InfoHash) -> bool {
        self.torrent_path(hash).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn blob_paths_are_keyed_by_infohash() {
        let store = ResumeStore::new("/downloads");
        let hash = InfoHash::new("a".repeat(40));
        assert_eq!(
            store.fastresume_path(&hash),
            PathBuf::from(format!("/downloads/{}.fastresume", "a".repeat(40)))
        );
        assert_eq!(
            store.torrent_path(&hash),
            PathBuf::from(format!("/downloads/{}.torrent", "a".repeat(40)))
        );
    }

    #[test]
    fn write_and_remove_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ResumeStore::new(dir.path());
        let hash = InfoHash::new("b".repeat(40));

        store.write_fastresume(&hash, b"resume-blob").unwrap();
        assert_eq!(
            std::fs::read(store.fastresume_path(&hash)).unwrap(),
            b"resume-blob"
        );

        store.remove_fastresume(&hash).unwrap();
        assert!(!store.fastresume_path(&hash).exists());
        // Removing again is a no-op.
        store.remove_fastresume(&hash).unwrap();
    }

    #[test]
    fn torrent_cache_reports_presence() {
        let dir = TempDir::new().unwrap();
        let store = ResumeStore::new(dir.path());
        let hash = InfoHash::new("c".repeat(40));

        assert!(!store.has_torrent(&hash));
        let path = store.write_torrent(&hash, b"d0:e").unwrap();
        assert!(store.has_torrent(&hash));
        assert_eq!(std::fs::read(path).unwrap(), b"d0:e");
    }
}
