//! Torrent and torrent-file bookkeeping operations.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::{CatalogError, Result};
use crate::model::{TorrentFileRecord, TorrentRecord, TorrentUpsert};
use crate::store::CatalogStore;

const SELECT_TORRENT: &str = r"
    SELECT id, path, magnet_link, added_to_torrents_list_at, data_size,
           num_files, obsolete, embargo, is_seeding, is_seed_all
    FROM torrents
";

pub(crate) const INSERT_TORRENT_PATH: &str = "INSERT OR IGNORE INTO torrents (path) VALUES (?)";

const UPDATE_TORRENT: &str = r"
    UPDATE torrents SET
        magnet_link = ?,
        added_to_torrents_list_at = ?,
        data_size = ?,
        obsolete = ?,
        embargo = ?,
        num_files = ?
    WHERE id = ?
";

const INSERT_TORRENT: &str = r"
    INSERT INTO torrents (
        path, magnet_link, added_to_torrents_list_at, data_size,
        obsolete, embargo, num_files
    ) VALUES (?, ?, ?, ?, ?, ?, ?)
";

const SET_SEEDING: &str = "UPDATE torrents SET is_seeding = ?, is_seed_all = ? WHERE id = ?";

const INSERT_TORRENT_FILE: &str = r"
    INSERT OR IGNORE INTO torrent_files (torrent_id, filename, file_id)
    VALUES (?, ?, ?)
";

const SELECT_TORRENT_FILES: &str = r"
    SELECT id, torrent_id, file_id, filename, is_complete, local_path
    FROM torrent_files
";

const SET_TORRENT_FILE_COMPLETE: &str = r"
    UPDATE torrent_files SET is_complete = 1, local_path = ? WHERE id = ?
";

impl CatalogStore {
    /// Ensure a torrent row exists for `path` and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error when the insert or the id lookup fails.
    pub async fn insert_torrent_by_path(&self, path: &str) -> Result<i64> {
        sqlx::query(INSERT_TORRENT_PATH)
            .bind(path)
            .execute(self.pool())
            .await
            .map_err(CatalogError::query("insert_torrent_by_path"))?;
        let row = sqlx::query("SELECT id FROM torrents WHERE path = ?")
            .bind(path)
            .fetch_one(self.pool())
            .await
            .map_err(CatalogError::query("insert_torrent_by_path"))?;
        row.try_get("id")
            .map_err(|_| CatalogError::Codec { field: "torrents.id" })
    }

    /// Upsert one entry of the upstream torrent list, keyed by `path`.
    ///
    /// Operational flags survive updates untouched. Returns the rowid.
    ///
    /// # Errors
    ///
    /// Returns an error when a statement fails.
    pub async fn upsert_torrent(&self, upsert: &TorrentUpsert) -> Result<i64> {
        let existing = sqlx::query("SELECT id FROM torrents WHERE path = ?")
            .bind(&upsert.path)
            .fetch_optional(self.pool())
            .await
            .map_err(CatalogError::query("upsert_torrent"))?;

        if let Some(row) = existing {
            let id: i64 = row
                .try_get("id")
                .map_err(|_| CatalogError::Codec { field: "torrents.id" })?;
            sqlx::query(UPDATE_TORRENT)
                .bind(upsert.magnet_link.as_deref())
                .bind(upsert.added_to_torrents_list_at.as_deref())
                .bind(upsert.data_size)
                .bind(upsert.obsolete)
                .bind(upsert.embargo)
                .bind(upsert.num_files)
                .bind(id)
                .execute(self.pool())
                .await
                .map_err(CatalogError::query("upsert_torrent"))?;
            Ok(id)
        } else {
            let outcome = sqlx::query(INSERT_TORRENT)
                .bind(&upsert.path)
                .bind(upsert.magnet_link.as_deref())
                .bind(upsert.added_to_torrents_list_at.as_deref())
                .bind(upsert.data_size)
                .bind(upsert.obsolete)
                .bind(upsert.embargo)
                .bind(upsert.num_files)
                .execute(self.pool())
                .await
                .map_err(CatalogError::query("upsert_torrent"))?;
            Ok(outcome.last_insert_rowid())
        }
    }

    /// Upsert one page of the upstream torrent list inside a single
    /// transaction.
    ///
    /// Returns the number of entries applied. Upserts are keyed by `path`
    /// and leave operational flags untouched, so a page is safe to replay.
    ///
    /// # Errors
    ///
    /// Returns an error when any statement in the transaction fails.
    pub async fn upsert_torrent_batch(&self, upserts: &[TorrentUpsert]) -> Result<u64> {
        if upserts.is_empty() {
            return Ok(0);
        }
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(CatalogError::query("upsert_torrent_batch"))?;
        let mut applied = 0_u64;

        for upsert in upserts {
            let existing = sqlx::query("SELECT id FROM torrents WHERE path = ?")
                .bind(&upsert.path)
                .fetch_optional(&mut *tx)
                .await
                .map_err(CatalogError::query("upsert_torrent_batch"))?;

            if let Some(row) = existing {
                let id: i64 = row
                    .try_get("id")
                    .map_err(|_| CatalogError::Codec { field: "torrents.id" })?;
                sqlx::query(UPDATE_TORRENT)
                    .bind(upsert.magnet_link.as_deref())
                    .bind(upsert.added_to_torrents_list_at.as_deref())
                    .bind(upsert.data_size)
                    .bind(upsert.obsolete)
                    .bind(upsert.embargo)
                    .bind(upsert.num_files)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(CatalogError::query("upsert_torrent_batch"))?;
            } else {
                sqlx::query(INSERT_TORRENT)
                    .bind(&upsert.path)
                    .bind(upsert.magnet_link.as_deref())
                    .bind(upsert.added_to_torrents_list_at.as_deref())
                    .bind(upsert.data_size)
                    .bind(upsert.obsolete)
                    .bind(upsert.embargo)
                    .bind(upsert.num_files)
                    .execute(&mut *tx)
                    .await
                    .map_err(CatalogError::query("upsert_torrent_batch"))?;
            }
            applied += 1;
        }

        tx.commit()
            .await
            .map_err(CatalogError::query("upsert_torrent_batch"))?;
        Ok(applied)
    }

    /// Fetch one torrent row.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or the row cannot be decoded.
    pub async fn find_torrent_by_id(&self, torrent_id: i64) -> Result<Option<TorrentRecord>> {
        let sql = format!("{SELECT_TORRENT} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(torrent_id)
            .fetch_optional(self.pool())
            .await
            .map_err(CatalogError::query("find_torrent_by_id"))?;
        row.as_ref().map(row_to_torrent).transpose()
    }

    /// Flip the seeding flags of a torrent.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] when the torrent does not exist.
    pub async fn set_seeding(
        &self,
        torrent_id: i64,
        is_seeding: bool,
        is_seed_all: bool,
    ) -> Result<()> {
        let outcome = sqlx::query(SET_SEEDING)
            .bind(is_seeding)
            .bind(is_seed_all)
            .bind(torrent_id)
            .execute(self.pool())
            .await
            .map_err(CatalogError::query("set_seeding"))?;
        if outcome.rows_affected() == 0 {
            return Err(CatalogError::NotFound { entity: "torrent" });
        }
        Ok(())
    }

    /// Every torrent the seed manager should keep live, with targeted file
    /// rows populated for torrents not in seed-all mode.
    ///
    /// # Errors
    ///
    /// Returns an error when a query fails or a row cannot be decoded.
    pub async fn list_seeding(&self) -> Result<Vec<TorrentRecord>> {
        let sql = format!("{SELECT_TORRENT} WHERE is_seeding = 1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(CatalogError::query("list_seeding"))?;
        let mut torrents: Vec<TorrentRecord> = rows
            .iter()
            .map(row_to_torrent)
            .collect::<Result<Vec<_>>>()?;

        let targeted: Vec<i64> = torrents
            .iter()
            .filter(|torrent| !torrent.is_seed_all)
            .map(|torrent| torrent.id)
            .collect();
        if targeted.is_empty() {
            return Ok(torrents);
        }

        let files = self.list_torrent_files(&targeted).await?;
        for torrent in &mut torrents {
            torrent.files = files
                .iter()
                .filter(|file| file.torrent_id == torrent.id)
                .cloned()
                .collect();
        }
        Ok(torrents)
    }

    /// Register a file for targeted seeding.
    ///
    /// At most one torrent-file row may exist per catalog file; a second
    /// insert for the same `file_id` returns the surviving row's id.
    ///
    /// # Errors
    ///
    /// Returns an error when a statement fails.
    pub async fn insert_torrent_file(
        &self,
        torrent_id: i64,
        file_id: i64,
        filename: &str,
    ) -> Result<i64> {
        let outcome = sqlx::query(INSERT_TORRENT_FILE)
            .bind(torrent_id)
            .bind(filename)
            .bind(file_id)
            .execute(self.pool())
            .await
            .map_err(CatalogError::query("insert_torrent_file"))?;
        if outcome.rows_affected() > 0 {
            return Ok(outcome.last_insert_rowid());
        }
        let row = sqlx::query("SELECT id FROM torrent_files WHERE file_id = ?")
            .bind(file_id)
            .fetch_one(self.pool())
            .await
            .map_err(CatalogError::query("insert_torrent_file"))?;
        row.try_get("id").map_err(|_| CatalogError::Codec {
            field: "torrent_files.id",
        })
    }

    /// Mark a torrent-file row complete and record where the payload lives.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] when the row does not exist.
    pub async fn set_torrent_file_complete(&self, id: i64, local_path: &str) -> Result<()> {
        let outcome = sqlx::query(SET_TORRENT_FILE_COMPLETE)
            .bind(local_path)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(CatalogError::query("set_torrent_file_complete"))?;
        if outcome.rows_affected() == 0 {
            return Err(CatalogError::NotFound {
                entity: "torrent_file",
            });
        }
        Ok(())
    }

    /// Number of torrent-file rows attached to a torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn count_files(&self, torrent_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM torrent_files WHERE torrent_id = ?")
            .bind(torrent_id)
            .fetch_one(self.pool())
            .await
            .map_err(CatalogError::query("count_files"))?;
        row.try_get("n").map_err(|_| CatalogError::Codec {
            field: "torrent_files count",
        })
    }

    /// Remove the torrent-file row for a catalog file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the delete fails.
    pub async fn remove_torrent_file(&self, file_id: i64) -> Result<u64> {
        let outcome = sqlx::query("DELETE FROM torrent_files WHERE file_id = ?")
            .bind(file_id)
            .execute(self.pool())
            .await
            .map_err(CatalogError::query("remove_torrent_file"))?;
        Ok(outcome.rows_affected())
    }

    /// Torrent-file rows for a set of torrents.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or a row cannot be decoded.
    pub async fn list_torrent_files(&self, torrent_ids: &[i64]) -> Result<Vec<TorrentFileRecord>> {
        if torrent_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; torrent_ids.len()].join(",");
        let sql =
            format!("{SELECT_TORRENT_FILES} WHERE torrent_id IN ({placeholders}) ORDER BY id");
        let mut query = sqlx::query(&sql);
        for id in torrent_ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(self.pool())
            .await
            .map_err(CatalogError::query("list_torrent_files"))?;
        rows.iter().map(row_to_torrent_file).collect()
    }

    /// Register a seed request: the torrent-file row and the seeding flag
    /// flip commit together so the reconcile loop never observes half of
    /// the request.
    ///
    /// # Errors
    ///
    /// Returns an error when any statement in the transaction fails.
    pub async fn add_seed(&self, torrent_id: i64, file_id: i64, filename: &str) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(CatalogError::query("add_seed"))?;
        sqlx::query(INSERT_TORRENT_FILE)
            .bind(torrent_id)
            .bind(filename)
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(CatalogError::query("add_seed"))?;
        let outcome = sqlx::query("UPDATE torrents SET is_seeding = 1 WHERE id = ?")
            .bind(torrent_id)
            .execute(&mut *tx)
            .await
            .map_err(CatalogError::query("add_seed"))?;
        if outcome.rows_affected() == 0 {
            return Err(CatalogError::NotFound { entity: "torrent" });
        }
        tx.commit().await.map_err(CatalogError::query("add_seed"))?;
        Ok(())
    }

    /// Withdraw a seed request; the torrent stops seeding when its last
    /// targeted file is removed.
    ///
    /// # Errors
    ///
    /// Returns an error when any statement in the transaction fails.
    pub async fn remove_seed(&self, torrent_id: i64, file_id: i64) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(CatalogError::query("remove_seed"))?;
        sqlx::query("DELETE FROM torrent_files WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(CatalogError::query("remove_seed"))?;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM torrent_files WHERE torrent_id = ?")
            .bind(torrent_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(CatalogError::query("remove_seed"))?;
        let remaining: i64 = row.try_get("n").map_err(|_| CatalogError::Codec {
            field: "torrent_files count",
        })?;
        if remaining == 0 {
            sqlx::query("UPDATE torrents SET is_seeding = 0, is_seed_all = 0 WHERE id = ?")
                .bind(torrent_id)
                .execute(&mut *tx)
                .await
                .map_err(CatalogError::query("remove_seed"))?;
        }
        tx.commit()
            .await
            .map_err(CatalogError::query("remove_seed"))?;
        Ok(())
    }

    /// Insert completed torrent-file rows for one page of a seed-all
    /// torrent. The page commits as its own transaction and is safe to
    /// replay: inserts are idempotent on `file_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when any statement in the transaction fails.
    pub async fn insert_completed_torrent_files(
        &self,
        torrent_id: i64,
        entries: &[(i64, String, String)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(CatalogError::query("insert_completed_torrent_files"))?;
        for (file_id, filename, local_path) in entries {
            sqlx::query(
                "INSERT OR IGNORE INTO torrent_files \
                 (torrent_id, filename, file_id, is_complete, local_path) \
                 VALUES (?, ?, ?, 1, ?)",
            )
            .bind(torrent_id)
            .bind(filename)
            .bind(file_id)
            .bind(local_path)
            .execute(&mut *tx)
            .await
            .map_err(CatalogError::query("insert_completed_torrent_files"))?;
        }
        tx.commit()
            .await
            .map_err(CatalogError::query("insert_completed_torrent_files"))?;
        Ok(())
    }
}

fn row_to_torrent(row: &SqliteRow) -> Result<TorrentRecord> {
    let get_err = |_: sqlx::Error| CatalogError::Codec {
        field: "torrents row",
    };
    Ok(TorrentRecord {
        id: row.try_get("id").map_err(get_err)?,
        path: row.try_get("path").map_err(get_err)?,
        magnet_link: row.try_get("magnet_link").map_err(get_err)?,
        added_to_torrents_list_at: row.try_get("added_to_torrents_list_at").map_err(get_err)?,
        data_size: row.try_get("data_size").map_err(get_err)?,
        num_files: row.try_get("num_files").map_err(get_err)?,
        obsolete: row.try_get("obsolete").map_err(get_err)?,
        embargo: row.try_get("embargo").map_err(get_err)?,
        is_seeding: row.try_get::<i64, _>("is_seeding").map_err(get_err)? != 0,
        is_seed_all: row.try_get::<i64, _>("is_seed_all").map_err(get_err)? != 0,
        files: Vec::new(),
    })
}

fn row_to_torrent_file(row: &SqliteRow) -> Result<TorrentFileRecord> {
    let get_err = |_: sqlx::Error| CatalogError::Codec {
        field: "torrent_files row",
    };
    Ok(TorrentFileRecord {
        id: row.try_get("id").map_err(get_err)?,
        torrent_id: row.try_get("torrent_id").map_err(get_err)?,
        file_id: row.try_get("file_id").map_err(get_err)?,
        filename: row
            .try_get::<Option<String>, _>("filename")
            .map_err(get_err)?
            .unwrap_or_default(),
        is_complete: row.try_get::<i64, _>("is_complete").map_err(get_err)? != 0,
        local_path: row.try_get("local_path").map_err(get_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::open_store;

    fn upsert(path: &str) -> TorrentUpsert {
        TorrentUpsert {
            path: path.to_owned(),
            magnet_link: Some(format!("magnet:?xt=urn:btih:{}", "a".repeat(40))),
            added_to_torrents_list_at: Some("2024-01-01".to_owned()),
            data_size: Some(1_000),
            num_files: Some(3),
            obsolete: Some(false),
            embargo: Some(false),
        }
    }

    #[tokio::test]
    async fn upsert_preserves_operational_flags() {
        let (_dir, store) = open_store().await;
        let id = store.upsert_torrent(&upsert("a.torrent")).await.unwrap();
        store.set_seeding(id, true, true).await.unwrap();

        // Re-import with fresh upstream fields.
        let mut updated = upsert("a.torrent");
        updated.data_size = Some(2_000);
        let same_id = store.upsert_torrent(&updated).await.unwrap();
        assert_eq!(same_id, id);

        let torrent = store.find_torrent_by_id(id).await.unwrap().unwrap();
        assert_eq!(torrent.data_size, Some(2_000));
        assert!(torrent.is_seeding);
        assert!(torrent.is_seed_all);
    }

    #[tokio::test]
    async fn upsert_batch_inserts_and_updates_in_one_page() {
        let (_dir, store) = open_store().await;
        let first = store.upsert_torrent(&upsert("a.torrent")).await.unwrap();
        store.set_seeding(first, true, false).await.unwrap();

        let mut refreshed = upsert("a.torrent");
        refreshed.data_size = Some(9_000);
        let page = vec![refreshed, upsert("b.torrent")];
        assert_eq!(store.upsert_torrent_batch(&page).await.unwrap(), 2);
        // Replaying the page applies cleanly.
        assert_eq!(store.upsert_torrent_batch(&page).await.unwrap(), 2);

        let updated = store.find_torrent_by_id(first).await.unwrap().unwrap();
        assert_eq!(updated.data_size, Some(9_000));
        assert!(updated.is_seeding, "flags survive batched upserts");

        let second = store.upsert_torrent(&upsert("b.torrent")).await.unwrap();
        let inserted = store.find_torrent_by_id(second).await.unwrap().unwrap();
        assert_eq!(inserted.path, "b.torrent");

        assert_eq!(store.upsert_torrent_batch(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_seeding_on_missing_torrent_is_not_found() {
        let (_dir, store) = open_store().await;
        assert!(matches!(
            store.set_seeding(404, true, false).await,
            Err(CatalogError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_seeding_populates_targeted_files_only() {
        let (_dir, store) = open_store().await;
        let targeted = store.upsert_torrent(&upsert("targeted.torrent")).await.unwrap();
        let full = store.upsert_torrent(&upsert("full.torrent")).await.unwrap();
        let idle = store.upsert_torrent(&upsert("idle.torrent")).await.unwrap();

        store.set_seeding(targeted, true, false).await.unwrap();
        store.set_seeding(full, true, true).await.unwrap();
        store.insert_torrent_file(targeted, 11, "x.pdf").await.unwrap();
        let _ = idle;

        let seeding = store.list_seeding().await.unwrap();
        assert_eq!(seeding.len(), 2);
        let by_id = |id: i64| seeding.iter().find(|torrent| torrent.id == id).unwrap();
        assert_eq!(by_id(targeted).files.len(), 1);
        assert_eq!(by_id(targeted).files[0].filename, "x.pdf");
        assert!(by_id(full).files.is_empty());
    }

    #[tokio::test]
    async fn torrent_file_is_unique_per_catalog_file() {
        let (_dir, store) = open_store().await;
        let torrent = store.upsert_torrent(&upsert("t.torrent")).await.unwrap();
        let first = store.insert_torrent_file(torrent, 42, "a.pdf").await.unwrap();
        let second = store.insert_torrent_file(torrent, 42, "a.pdf").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count_files(torrent).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn completion_records_local_path() {
        let (_dir, store) = open_store().await;
        let torrent = store.upsert_torrent(&upsert("t.torrent")).await.unwrap();
        let row_id = store.insert_torrent_file(torrent, 1, "a.pdf").await.unwrap();
        store
            .set_torrent_file_complete(row_id, "shard/a.pdf")
            .await
            .unwrap();

        let rows = store.list_torrent_files(&[torrent]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_complete);
        assert_eq!(rows[0].local_path.as_deref(), Some("shard/a.pdf"));
    }

    #[tokio::test]
    async fn add_and_remove_seed_flip_the_torrent_flags() {
        let (_dir, store) = open_store().await;
        let torrent = store.upsert_torrent(&upsert("t.torrent")).await.unwrap();

        store.add_seed(torrent, 9, "b.pdf").await.unwrap();
        let record = store.find_torrent_by_id(torrent).await.unwrap().unwrap();
        assert!(record.is_seeding);
        assert_eq!(store.count_files(torrent).await.unwrap(), 1);

        store.remove_seed(torrent, 9).await.unwrap();
        let record = store.find_torrent_by_id(torrent).await.unwrap().unwrap();
        assert!(!record.is_seeding);
        assert_eq!(store.count_files(torrent).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn completed_page_insert_is_replay_safe() {
        let (_dir, store) = open_store().await;
        let torrent = store.upsert_torrent(&upsert("t.torrent")).await.unwrap();
        let page = vec![
            (1_i64, "a.pdf".to_owned(), "shard/a.pdf".to_owned()),
            (2_i64, "b.pdf".to_owned(), "shard/b.pdf".to_owned()),
        ];
        store
            .insert_completed_torrent_files(torrent, &page)
            .await
            .unwrap();
        store
            .insert_completed_torrent_files(torrent, &page)
            .await
            .unwrap();

        let rows = store.list_torrent_files(&[torrent]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.is_complete));
    }
}
