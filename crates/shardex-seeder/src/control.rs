//! Write-side seed operations.
//!
//! These edit the catalog only; the reconcile loop picks the changes up on
//! its next tick. Registering and withdrawing a file commit atomically with
//! the torrent's seeding flag, so no loop schedule can observe half of a
//! request.

use shardex_catalog::{CatalogStore, FileRecord};
use tracing::info;

use crate::error::SeederError;

/// Edits the persistent "should be seeding" set.
#[derive(Debug, Clone)]
pub struct SeedControl {
    catalog: CatalogStore,
}

impl SeedControl {
    /// Build a control handle over the catalog.
    #[must_use]
    pub const fn new(catalog: CatalogStore) -> Self {
        Self { catalog }
    }

    /// Request targeted seeding of one file.
    ///
    /// The filename registered is the basename of the record's first
    /// server path.
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::Precondition`] when the record lacks an id,
    /// torrent reference, magnet link, or server path.
    pub async fn add(&self, record: &FileRecord) -> Result<(), SeederError> {
        let file_id = record
            .id
            .ok_or_else(|| precondition(record, "file id"))?;
        let torrent_id = record
            .torrent_id
            .ok_or_else(|| precondition(record, "torrent_id"))?;
        if record.magnet_link.is_none() {
            return Err(precondition(record, "magnet_link"));
        }
        let filename = record
            .server_paths
            .first()
            .map(|path| basename(path))
            .ok_or_else(|| precondition(record, "server_path"))?;

        self.catalog.add_seed(torrent_id, file_id, filename).await?;
        info!(md5 = %record.md5, torrent_id, filename, "file registered for seeding");
        Ok(())
    }

    /// Withdraw a file from targeted seeding; the torrent stops seeding
    /// when its last file is withdrawn.
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::Precondition`] when the record lacks an id
    /// or torrent reference.
    pub async fn remove(&self, record: &FileRecord) -> Result<(), SeederError> {
        let file_id = record
            .id
            .ok_or_else(|| precondition(record, "file id"))?;
        let torrent_id = record
            .torrent_id
            .ok_or_else(|| precondition(record, "torrent_id"))?;

        self.catalog.remove_seed(torrent_id, file_id).await?;
        info!(md5 = %record.md5, torrent_id, "file withdrawn from seeding");
        Ok(())
    }

    /// Seed a whole torrent, ignoring targeted file selection.
    ///
    /// # Errors
    ///
    /// Returns a catalog error when the torrent does not exist.
    pub async fn seed_all(&self, torrent_id: i64) -> Result<(), SeederError> {
        self.catalog.set_seeding(torrent_id, true, true).await?;
        info!(torrent_id, "torrent switched to seed-all");
        Ok(())
    }

    /// Stop seeding a torrent entirely.
    ///
    /// # Errors
    ///
    /// Returns a catalog error when the torrent does not exist.
    pub async fn stop(&self, torrent_id: i64) -> Result<(), SeederError> {
        self.catalog.set_seeding(torrent_id, false, false).await?;
        info!(torrent_id, "torrent seeding stopped");
        Ok(())
    }
}

pub(crate) fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn precondition(record: &FileRecord, missing: &'static str) -> SeederError {
    SeederError::Precondition {
        md5: record.md5.clone(),
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_strips_directories() {
        assert_eq!(basename("a/b/c.pdf"), "c.pdf");
        assert_eq!(basename("plain.pdf"), "plain.pdf");
    }
}
