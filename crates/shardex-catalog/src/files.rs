//! File record operations: insert, lookup, and full-text search.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::{CatalogError, Result};
use crate::model::{
    FileRecord, SearchQuery, SortKey, compress_description, decode_list, decompress_description,
    encode_list,
};
use crate::store::CatalogStore;

const INSERT_FILE: &str = r"
    INSERT OR IGNORE INTO files (
        md5, server_path, title, description_compressed, cover_url,
        extension, year, author, language, ipfs_cid, torrent_id,
        byteoffset, is_journal
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const INSERT_FTS: &str = "INSERT INTO files_fts (rowid, text) VALUES (?, ?)";

const SET_BYTEOFFSET: &str = "UPDATE files SET byteoffset = ? WHERE md5 = ?";

/// Columns and joins shared by every file query; `tf.is_complete` derives
/// the completion flag from the matching torrent-file row when one exists.
const SELECT_BASE: &str = r"
    SELECT f.id, f.md5, f.server_path, f.title, f.description_compressed,
           f.cover_url, f.extension, f.year, f.author, f.language,
           f.ipfs_cid, f.torrent_id, f.byteoffset, f.is_journal,
           t.path AS torrent_path, t.magnet_link AS torrent_magnet_link,
           tf.is_complete AS is_complete
    FROM files f
    LEFT JOIN torrents t ON t.id = f.torrent_id
";

impl CatalogStore {
    /// Insert a file record, writing the FTS row only on first insert.
    ///
    /// Returns the new rowid, or `None` when a record with the same md5
    /// already exists (the insert is idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error when the insert fails or the byteoffset does not
    /// fit the storage type.
    pub async fn insert_file(&self, record: &FileRecord) -> Result<Option<i64>> {
        let byteoffset = record
            .byteoffset
            .map(i64::try_from)
            .transpose()
            .map_err(|_| CatalogError::Codec { field: "byteoffset" })?;
        let description = record.description.as_deref().map(compress_description);

        let outcome = sqlx::query(INSERT_FILE)
            .bind(&record.md5)
            .bind(encode_list(&record.server_paths))
            .bind(record.title.as_deref())
            .bind(description)
            .bind(record.cover_url.as_deref())
            .bind(&record.extension)
            .bind(record.year.as_deref())
            .bind(record.author.as_deref())
            .bind(encode_list(&record.languages))
            .bind(encode_list(&record.ipfs_cids))
            .bind(record.torrent_id)
            .bind(byteoffset)
            .bind(record.is_journal)
            .execute(self.pool())
            .await
            .map_err(CatalogError::query("insert_file"))?;

        if outcome.rows_affected() == 0 {
            return Ok(None);
        }
        let file_id = outcome.last_insert_rowid();

        sqlx::query(INSERT_FTS)
            .bind(file_id)
            .bind(record.fts_text())
            .execute(self.pool())
            .await
            .map_err(CatalogError::query("insert_file_fts"))?;

        Ok(Some(file_id))
    }

    /// Insert one ingest batch inside a single transaction.
    ///
    /// Records carrying a `torrent_path` get their torrent row created (or
    /// resolved) in the same transaction. Returns how many records were
    /// newly inserted; md5 collisions are skipped silently, so a batch is
    /// safe to replay after a crash.
    ///
    /// # Errors
    ///
    /// Returns an error when any statement in the transaction fails.
    pub async fn ingest_batch(&self, records: &[FileRecord]) -> Result<u64> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(CatalogError::query("ingest_batch"))?;
        let mut inserted = 0_u64;

        for record in records {
            let mut torrent_id = record.torrent_id;
            if torrent_id.is_none()
                && let Some(path) = record.torrent_path.as_deref()
            {
                sqlx::query(crate::torrents::INSERT_TORRENT_PATH)
                    .bind(path)
                    .execute(&mut *tx)
                    .await
                    .map_err(CatalogError::query("ingest_batch"))?;
                let row = sqlx::query("SELECT id FROM torrents WHERE path = ?")
                    .bind(path)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(CatalogError::query("ingest_batch"))?;
                torrent_id = Some(row.try_get("id").map_err(|_| CatalogError::Codec {
                    field: "torrents.id",
                })?);
            }

            let byteoffset = record
                .byteoffset
                .map(i64::try_from)
                .transpose()
                .map_err(|_| CatalogError::Codec { field: "byteoffset" })?;
            let description = record.description.as_deref().map(compress_description);
            let outcome = sqlx::query(INSERT_FILE)
                .bind(&record.md5)
                .bind(encode_list(&record.server_paths))
                .bind(record.title.as_deref())
                .bind(description)
                .bind(record.cover_url.as_deref())
                .bind(&record.extension)
                .bind(record.year.as_deref())
                .bind(record.author.as_deref())
                .bind(encode_list(&record.languages))
                .bind(encode_list(&record.ipfs_cids))
                .bind(torrent_id)
                .bind(byteoffset)
                .bind(record.is_journal)
                .execute(&mut *tx)
                .await
                .map_err(CatalogError::query("ingest_batch"))?;
            if outcome.rows_affected() == 0 {
                continue;
            }
            inserted += 1;
            sqlx::query(INSERT_FTS)
                .bind(outcome.last_insert_rowid())
                .bind(record.fts_text())
                .execute(&mut *tx)
                .await
                .map_err(CatalogError::query("ingest_batch"))?;
        }

        tx.commit()
            .await
            .map_err(CatalogError::query("ingest_batch"))?;
        Ok(inserted)
    }

    /// Record the payload offset for a file identified by md5.
    ///
    /// Returns the number of rows updated (zero when the md5 is unknown).
    ///
    /// # Errors
    ///
    /// Returns an error when the update fails.
    pub async fn set_byteoffset_by_md5(&self, md5: &str, byteoffset: u64) -> Result<u64> {
        let byteoffset = i64::try_from(byteoffset)
            .map_err(|_| CatalogError::Codec { field: "byteoffset" })?;
        let outcome = sqlx::query(SET_BYTEOFFSET)
            .bind(byteoffset)
            .bind(md5)
            .execute(self.pool())
            .await
            .map_err(CatalogError::query("set_byteoffset"))?;
        Ok(outcome.rows_affected())
    }

    /// Apply one page of `(md5, byteoffset)` updates inside a single
    /// transaction.
    ///
    /// Returns how many rows matched an existing md5; unknown digests are
    /// skipped silently, so a page is safe to replay.
    ///
    /// # Errors
    ///
    /// Returns an error when any statement in the transaction fails or an
    /// offset does not fit the storage type.
    pub async fn set_byteoffsets_by_md5(&self, updates: &[(String, u64)]) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(CatalogError::query("set_byteoffsets"))?;
        let mut updated = 0_u64;

        for (md5, byteoffset) in updates {
            let byteoffset = i64::try_from(*byteoffset)
                .map_err(|_| CatalogError::Codec { field: "byteoffset" })?;
            let outcome = sqlx::query(SET_BYTEOFFSET)
                .bind(byteoffset)
                .bind(md5)
                .execute(&mut *tx)
                .await
                .map_err(CatalogError::query("set_byteoffsets"))?;
            updated += outcome.rows_affected();
        }

        tx.commit()
            .await
            .map_err(CatalogError::query("set_byteoffsets"))?;
        Ok(updated)
    }

    /// Fetch records by rowid, joined with torrent and completion state.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or a row cannot be decoded.
    pub async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<FileRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "{SELECT_BASE} LEFT JOIN torrent_files tf ON f.id = tf.file_id \
             WHERE f.id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(self.pool())
            .await
            .map_err(CatalogError::query("find_by_ids"))?;
        rows.iter().map(row_to_record).collect()
    }

    /// Fetch a single record by md5.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or the row cannot be decoded.
    pub async fn find_by_md5(&self, md5: &str) -> Result<Option<FileRecord>> {
        let sql = format!(
            "{SELECT_BASE} LEFT JOIN torrent_files tf ON f.id = tf.file_id WHERE f.md5 = ?"
        );
        let row = sqlx::query(&sql)
            .bind(md5)
            .fetch_optional(self.pool())
            .await
            .map_err(CatalogError::query("find_by_md5"))?;
        row.as_ref().map(row_to_record).transpose()
    }

    /// Page through the files mirrored by one torrent, in rowid order.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or a row cannot be decoded.
    pub async fn files_for_torrent(
        &self,
        torrent_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "{SELECT_BASE} LEFT JOIN torrent_files tf ON f.id = tf.file_id \
             WHERE f.torrent_id = ? ORDER BY f.id LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(torrent_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(CatalogError::query("files_for_torrent"))?;
        rows.iter().map(row_to_record).collect()
    }

    /// Run a catalog search under the per-request work budget.
    ///
    /// When the raw query text trips the FTS parser (user punctuation such
    /// as `"`, `*`, `:`), the search is retried once with every token
    /// quoted before the failure is surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::QueryInterrupted`] when the budget elapses,
    /// or a query error when both the raw and quoted forms fail.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<FileRecord>> {
        tokio::time::timeout(self.query_timeout(), self.search_inner(query))
            .await
            .map_err(|_| CatalogError::QueryInterrupted)?
    }

    async fn search_inner(&self, query: &SearchQuery) -> Result<Vec<FileRecord>> {
        let text = query.text.as_deref().filter(|text| !text.trim().is_empty());
        match self.run_search(query, text).await {
            Ok(rows) => rows.iter().map(row_to_record).collect(),
            Err(sqlx::Error::Database(cause)) if text.is_some() => {
                let Some(quoted) = text.and_then(quote_fts_query) else {
                    return Err(CatalogError::Query {
                        operation: "search",
                        source: sqlx::Error::Database(cause),
                    });
                };
                tracing::debug!(error = %cause, "retrying search with quoted query form");
                let rows = self
                    .run_search(query, Some(&quoted))
                    .await
                    .map_err(CatalogError::query("search_quoted"))?;
                rows.iter().map(row_to_record).collect()
            }
            Err(source) => Err(CatalogError::Query {
                operation: "search",
                source,
            }),
        }
    }

    async fn run_search(
        &self,
        query: &SearchQuery,
        text: Option<&str>,
    ) -> std::result::Result<Vec<SqliteRow>, sqlx::Error> {
        let mut sql = String::from(SELECT_BASE);
        if text.is_some() {
            sql.push_str(" JOIN files_fts ON files_fts.rowid = f.id");
        }
        if query.local_only {
            sql.push_str(" INNER JOIN torrent_files tf ON f.id = tf.file_id");
        } else {
            sql.push_str(" LEFT JOIN torrent_files tf ON f.id = tf.file_id");
        }

        let mut filters: Vec<&str> = Vec::new();
        if text.is_some() {
            filters.push("files_fts MATCH ?");
        }
        if query.language.is_some() {
            // Languages persist `;`-joined; match the delimited form.
            filters.push("(';' || f.language || ';') LIKE '%;' || ? || ';%'");
        }
        if query.year.is_some() {
            filters.push("f.year = ?");
        }
        if query.torrent_id.is_some() {
            filters.push("f.torrent_id = ?");
        }
        if !filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filters.join(" AND "));
        }

        let order_by = query.order_by.filter(|order| {
            // Rank without a text query has nothing to rank against.
            !(order.key == SortKey::Rank && text.is_none())
        });
        if let Some(order) = order_by {
            let column = match order.key {
                SortKey::Rank => "files_fts.rank",
                SortKey::Year => "f.year",
                SortKey::Title => "f.title",
            };
            sql.push_str(" ORDER BY ");
            sql.push_str(column);
            sql.push(' ');
            sql.push_str(order.direction.as_sql());
            sql.push_str(" NULLS FIRST");
        }
        sql.push_str(" LIMIT ? OFFSET ?");

        let mut prepared = sqlx::query(&sql);
        if let Some(text) = text {
            prepared = prepared.bind(text.to_owned());
        }
        if let Some(language) = query.language.as_deref() {
            prepared = prepared.bind(language.to_owned());
        }
        if let Some(year) = query.year.as_deref() {
            prepared = prepared.bind(year.to_owned());
        }
        if let Some(torrent_id) = query.torrent_id {
            prepared = prepared.bind(torrent_id);
        }
        prepared = prepared.bind(query.limit).bind(query.offset);

        prepared.fetch_all(self.pool()).await
    }
}

/// Quote every token of a raw query so FTS treats it as plain terms.
fn quote_fts_query(raw: &str) -> Option<String> {
    let quoted: Vec<String> = raw
        .split_whitespace()
        .map(|token| token.replace('"', ""))
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{token}\""))
        .collect();
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" "))
    }
}

fn row_to_record(row: &SqliteRow) -> Result<FileRecord> {
    let get_err = |_: sqlx::Error| CatalogError::Codec { field: "files row" };

    let description = row
        .try_get::<Option<Vec<u8>>, _>("description_compressed")
        .map_err(get_err)?
        .as_deref()
        .map(decompress_description)
        .transpose()?;
    let byteoffset = row
        .try_get::<Option<i64>, _>("byteoffset")
        .map_err(get_err)?
        .map(u64::try_from)
        .transpose()
        .map_err(|_| CatalogError::Codec { field: "byteoffset" })?;

    Ok(FileRecord {
        id: row.try_get("id").map_err(get_err)?,
        md5: row.try_get("md5").map_err(get_err)?,
        title: row.try_get("title").map_err(get_err)?,
        author: row.try_get("author").map_err(get_err)?,
        year: row.try_get("year").map_err(get_err)?,
        extension: row
            .try_get::<Option<String>, _>("extension")
            .map_err(get_err)?
            .unwrap_or_default(),
        server_paths: decode_list(
            row.try_get::<Option<String>, _>("server_path")
                .map_err(get_err)?
                .as_deref(),
        ),
        description,
        cover_url: row.try_get("cover_url").map_err(get_err)?,
        languages: decode_list(
            row.try_get::<Option<String>, _>("language")
                .map_err(get_err)?
                .as_deref(),
        ),
        ipfs_cids: decode_list(
            row.try_get::<Option<String>, _>("ipfs_cid")
                .map_err(get_err)?
                .as_deref(),
        ),
        torrent_id: row.try_get("torrent_id").map_err(get_err)?,
        byteoffset,
        is_journal: row.try_get::<i64, _>("is_journal").map_err(get_err)? != 0,
        torrent_path: row.try_get("torrent_path").map_err(get_err)?,
        magnet_link: row.try_get("torrent_magnet_link").map_err(get_err)?,
        is_complete: row
            .try_get::<Option<bool>, _>("is_complete")
            .map_err(get_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderBy, SortDirection};
    use crate::store::tests::open_store;

    fn sample_record(md5_byte: char, title: &str) -> FileRecord {
        FileRecord {
            md5: md5_byte.to_string().repeat(32),
            title: Some(title.to_owned()),
            author: Some("Test Author".to_owned()),
            year: Some("2001".to_owned()),
            extension: "pdf".to_owned(),
            server_paths: vec![format!("shard/{title}.pdf")],
            description: Some("a reference text".to_owned()),
            languages: vec!["en".to_owned()],
            ipfs_cids: vec!["bafkexample".to_owned()],
            ..FileRecord::default()
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_md5() {
        let (_dir, store) = open_store().await;
        let record = sample_record('a', "dup");
        let first = store.insert_file(&record).await.unwrap();
        assert!(first.is_some());
        let second = store.insert_file(&record).await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn round_trip_preserves_all_attributes() {
        let (_dir, store) = open_store().await;
        let mut record = sample_record('b', "roundtrip");
        record.byteoffset = Some(123_456);
        record.is_journal = true;

        let id = store.insert_file(&record).await.unwrap().unwrap();
        let loaded = store.find_by_ids(&[id]).await.unwrap().remove(0);

        assert_eq!(loaded.md5, record.md5);
        assert_eq!(loaded.title, record.title);
        assert_eq!(loaded.author, record.author);
        assert_eq!(loaded.year, record.year);
        assert_eq!(loaded.extension, record.extension);
        assert_eq!(loaded.server_paths, record.server_paths);
        assert_eq!(loaded.description, record.description);
        assert_eq!(loaded.languages, record.languages);
        assert_eq!(loaded.ipfs_cids, record.ipfs_cids);
        assert_eq!(loaded.byteoffset, record.byteoffset);
        assert!(loaded.is_journal);
        assert_eq!(loaded.is_complete, None);
    }

    #[tokio::test]
    async fn byteoffset_update_targets_md5() {
        let (_dir, store) = open_store().await;
        let record = sample_record('c', "offsets");
        store.insert_file(&record).await.unwrap();

        assert_eq!(
            store.set_byteoffset_by_md5(&record.md5, 987).await.unwrap(),
            1
        );
        assert_eq!(
            store
                .set_byteoffset_by_md5(&"f".repeat(32), 987)
                .await
                .unwrap(),
            0
        );
        let loaded = store.find_by_md5(&record.md5).await.unwrap().unwrap();
        assert_eq!(loaded.byteoffset, Some(987));
    }

    #[tokio::test]
    async fn byteoffset_page_commits_in_one_transaction() {
        let (_dir, store) = open_store().await;
        let known = sample_record('9', "paged offsets");
        store.insert_file(&known).await.unwrap();

        let page = vec![(known.md5.clone(), 111_u64), ("1".repeat(32), 222)];
        // Only the known md5 matches a row.
        assert_eq!(store.set_byteoffsets_by_md5(&page).await.unwrap(), 1);
        let loaded = store.find_by_md5(&known.md5).await.unwrap().unwrap();
        assert_eq!(loaded.byteoffset, Some(111));

        assert_eq!(store.set_byteoffsets_by_md5(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_matches_title_text() {
        let (_dir, store) = open_store().await;
        store
            .insert_file(&sample_record('d', "distributed systems"))
            .await
            .unwrap();
        store
            .insert_file(&sample_record('e', "gardening almanac"))
            .await
            .unwrap();

        let hits = store
            .search(&SearchQuery {
                text: Some("distributed".to_owned()),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title.as_deref(), Some("distributed systems"));
    }

    #[tokio::test]
    async fn search_without_text_filters_by_year() {
        let (_dir, store) = open_store().await;
        let mut old = sample_record('f', "older");
        old.year = Some("1987".to_owned());
        store.insert_file(&old).await.unwrap();
        store.insert_file(&sample_record('1', "newer")).await.unwrap();

        let hits = store
            .search(&SearchQuery {
                year: Some("1987".to_owned()),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].year.as_deref(), Some("1987"));
    }

    #[tokio::test]
    async fn search_language_filter_matches_delimited_tokens() {
        let (_dir, store) = open_store().await;
        let mut multi = sample_record('2', "multilingual");
        multi.languages = vec!["en".to_owned(), "ru".to_owned()];
        store.insert_file(&multi).await.unwrap();
        let mut other = sample_record('3', "other");
        other.languages = vec!["enm".to_owned()];
        store.insert_file(&other).await.unwrap();

        let hits = store
            .search(&SearchQuery {
                language: Some("en".to_owned()),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title.as_deref(), Some("multilingual"));
    }

    #[tokio::test]
    async fn hostile_punctuation_falls_back_to_quoted_form() {
        let (_dir, store) = open_store().await;
        store
            .insert_file(&sample_record('4', "colon heavy treatise"))
            .await
            .unwrap();

        // `:` makes the raw form an FTS column filter and fails to parse.
        let hits = store
            .search(&SearchQuery {
                text: Some("colon: \"heavy* treatise".to_owned()),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn rank_order_is_dropped_without_text() {
        let (_dir, store) = open_store().await;
        store.insert_file(&sample_record('5', "ranked")).await.unwrap();

        let hits = store
            .search(&SearchQuery {
                order_by: Some(OrderBy {
                    key: SortKey::Rank,
                    direction: SortDirection::Ascending,
                }),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn local_only_requires_a_torrent_file_row() {
        let (_dir, store) = open_store().await;
        let torrent_id = store.insert_torrent_by_path("shard.torrent").await.unwrap();
        let mut tracked = sample_record('6', "tracked");
        tracked.torrent_id = Some(torrent_id);
        let tracked_id = store.insert_file(&tracked).await.unwrap().unwrap();
        store.insert_file(&sample_record('7', "untracked")).await.unwrap();
        store
            .insert_torrent_file(torrent_id, tracked_id, "tracked.pdf")
            .await
            .unwrap();

        let hits = store
            .search(&SearchQuery {
                local_only: true,
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title.as_deref(), Some("tracked"));
    }

    #[tokio::test]
    async fn ingest_batch_resolves_torrent_paths_and_replays_safely() {
        let (_dir, store) = open_store().await;
        let mut with_torrent = sample_record('8', "batched");
        with_torrent.torrent_path = Some("shard_0001.torrent".to_owned());
        let plain = sample_record('0', "plain");

        let batch = vec![with_torrent.clone(), plain];
        assert_eq!(store.ingest_batch(&batch).await.unwrap(), 2);
        // Replaying the batch inserts nothing new.
        assert_eq!(store.ingest_batch(&batch).await.unwrap(), 0);

        let loaded = store.find_by_md5(&with_torrent.md5).await.unwrap().unwrap();
        assert!(loaded.torrent_id.is_some());
        assert_eq!(loaded.torrent_path.as_deref(), Some("shard_0001.torrent"));

        // The FTS row was written exactly once.
        let hits = store
            .search(&SearchQuery {
                text: Some("batched".to_owned()),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn quoting_strips_embedded_quotes() {
        assert_eq!(
            quote_fts_query("a \"b\" c:d").as_deref(),
            Some("\"a\" \"b\" \"c:d\"")
        );
        assert_eq!(quote_fts_query("\"\""), None);
    }
}
