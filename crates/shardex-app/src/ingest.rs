//! Bulk NDJSON ingest of upstream catalog dumps.
//!
//! A blocking parser feeds a bounded channel; a single writer owns the
//! database connection and commits one transaction per batch. The parser's
//! first fatal error surfaces only after the writer has drained everything
//! already queued, and ingest runs in relaxed-durability mode because a
//! replay is idempotent on md5.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use shardex_catalog::{CatalogStore, FileRecord};

/// Upstream descriptions are capped at this many bytes before storage.
const DESCRIPTION_CAP: usize = 500;

/// Outcome counters for one ingest run.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IngestReport {
    /// Records decoded from the input stream.
    pub(crate) read: u64,
    /// Records dropped as non-downloadable or unidentifiable.
    pub(crate) skipped: u64,
    /// Records newly inserted into the catalog.
    pub(crate) inserted: u64,
}

/// The `import-files` pipeline.
pub(crate) struct ImportFilesTool {
    catalog: CatalogStore,
    batch_size: usize,
}

impl ImportFilesTool {
    pub(crate) const fn new(catalog: CatalogStore, batch_size: usize) -> Self {
        Self {
            catalog,
            batch_size,
        }
    }

    /// Drain `input` into the catalog.
    pub(crate) async fn run(
        &self,
        input: impl std::io::BufRead + Send + 'static,
        journals: bool,
    ) -> Result<IngestReport> {
        let (sender, mut receiver) = tokio::sync::mpsc::channel::<FileRecord>(self.batch_size * 2);
        let parser = tokio::task::spawn_blocking(move || -> Result<(u64, u64)> {
            let mut read = 0_u64;
            let mut skipped = 0_u64;
            for line in input.lines() {
                let line = line.context("failed to read ingest input")?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let value: Value =
                    serde_json::from_str(line).context("malformed ingest record")?;
                read += 1;
                let Some(record) = record_from_upstream(&value, journals) else {
                    skipped += 1;
                    continue;
                };
                // Records reachable neither by torrent nor by IPFS cannot
                // ever be downloaded; reject them at the door.
                if record.torrent_path.is_none() && record.ipfs_cids.is_empty() {
                    skipped += 1;
                    continue;
                }
                if sender.blocking_send(record).is_err() {
                    break;
                }
            }
            Ok((read, skipped))
        });

        self.catalog.set_bulk_write_mode().await?;

        let mut buffer = Vec::with_capacity(self.batch_size);
        let mut inserted = 0_u64;
        while let Some(record) = receiver.recv().await {
            buffer.push(record);
            if buffer.len() >= self.batch_size {
                inserted += self.catalog.ingest_batch(&buffer).await?;
                debug!(inserted, "ingest batch committed");
                buffer.clear();
            }
        }
        inserted += self.catalog.ingest_batch(&buffer).await?;
        info!(inserted, "final ingest batch committed");

        let (read, skipped) = parser.await.context("ingest parser panicked")??;
        Ok(IngestReport {
            read,
            skipped,
            inserted,
        })
    }
}

/// Map one upstream dump record into a catalog record.
///
/// Returns `None` when the record carries no md5 identity.
fn record_from_upstream(value: &Value, journals: bool) -> Option<FileRecord> {
    let source = value.get("_source")?;
    let md5 = source
        .get("id")?
        .as_str()?
        .strip_prefix("md5:")?
        .to_owned();
    let unified = source.get("file_unified_data")?;

    let title = unified
        .get("title_best")
        .and_then(Value::as_str)
        .filter(|title| !title.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            unified
                .get("original_filename_additional")
                .and_then(Value::as_array)
                .and_then(|names| names.first())
                .and_then(Value::as_str)
                .map(|name| {
                    let normalized = name.replace('\\', "/");
                    normalized
                        .rsplit('/')
                        .next()
                        .unwrap_or(&normalized)
                        .to_owned()
                })
        })
        .or_else(|| {
            unified
                .get("original_filename_best")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
        });

    let description = unified
        .get("stripped_description_best")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(|text| truncate_to_char_boundary(text, DESCRIPTION_CAP).to_owned());

    let author = unified
        .get("author_best")
        .and_then(Value::as_str)
        .filter(|author| !author.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            unified
                .get("edition_varia_best")
                .and_then(Value::as_str)
                .filter(|varia| !varia.is_empty())
                .map(str::to_owned)
        });

    let languages = unified
        .get("language_codes")
        .and_then(Value::as_array)
        .map(|codes| {
            codes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let mut ipfs_cids: Vec<String> = Vec::new();
    if let Some(infos) = unified.get("ipfs_infos").and_then(Value::as_array) {
        for info in infos {
            if let Some(cid) = info.get("ipfs_cid").and_then(Value::as_str)
                && !cid.is_empty()
                && !ipfs_cids.iter().any(|existing| existing == cid)
            {
                ipfs_cids.push(cid.to_owned());
            }
        }
    }

    let torrent_path = source
        .get("classifications_unified")
        .and_then(|classifications| classifications.get("torrent"))
        .and_then(Value::as_array)
        .and_then(|torrents| torrents.first())
        .and_then(Value::as_str)
        .map(str::to_owned);

    let server_paths = source
        .get("identifiers_unified")
        .and_then(|identifiers| identifiers.get("server_path"))
        .and_then(Value::as_array)
        .map(|paths| {
            paths
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Some(FileRecord {
        md5,
        title,
        author,
        year: year_text(unified.get("year_best")),
        extension: unified
            .get("extension_best")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        server_paths,
        description,
        cover_url: unified
            .get("cover_url_best")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_owned),
        languages,
        ipfs_cids,
        torrent_path,
        is_journal: journals,
        ..FileRecord::default()
    })
}

fn year_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(year)) if !year.is_empty() => Some(year.clone()),
        Some(Value::Number(year)) => Some(year.to_string()),
        _ => None,
    }
}

/// Cut `text` at `max` bytes, rounding down to the nearest UTF-8 code
/// point boundary so the result stays valid.
fn truncate_to_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::TempDir;

    fn upstream_line(md5_digit: char, title: &str, torrent: Option<&str>) -> String {
        let torrents: Vec<&str> = torrent.into_iter().collect();
        serde_json::json!({
            "_source": {
                "id": format!("md5:{}", md5_digit.to_string().repeat(32)),
                "file_unified_data": {
                    "title_best": title,
                    "extension_best": "pdf",
                    "year_best": 2003,
                    "author_best": "An Author",
                    "stripped_description_best": "short description",
                    "language_codes": ["en"],
                    "ipfs_infos": [{"ipfs_cid": "bafkExample"}],
                },
                "classifications_unified": {"torrent": torrents},
                "identifiers_unified": {"server_path": [format!("shards/{title}.pdf")]},
            }
        })
        .to_string()
    }

    #[test]
    fn truncation_respects_code_point_boundaries() {
        assert_eq!(truncate_to_char_boundary("plain ascii", 500), "plain ascii");
        // Cutting inside the two-byte "é" backs off to the boundary.
        let text = "caf\u{e9}";
        assert_eq!(truncate_to_char_boundary(text, 4), "caf");
        assert_eq!(truncate_to_char_boundary(text, 5), text);
    }

    #[test]
    fn upstream_mapping_extracts_the_interesting_fields() {
        let line = upstream_line('a', "mapping", Some("shard_01.torrent"));
        let value: Value = serde_json::from_str(&line).unwrap();
        let record = record_from_upstream(&value, true).unwrap();

        assert_eq!(record.md5, "a".repeat(32));
        assert_eq!(record.title.as_deref(), Some("mapping"));
        assert_eq!(record.year.as_deref(), Some("2003"));
        assert_eq!(record.extension, "pdf");
        assert_eq!(record.torrent_path.as_deref(), Some("shard_01.torrent"));
        assert_eq!(record.server_paths, vec!["shards/mapping.pdf".to_owned()]);
        assert_eq!(record.ipfs_cids, vec!["bafkExample".to_owned()]);
        assert!(record.is_journal);
    }

    #[test]
    fn records_without_an_id_are_dropped() {
        let value: Value = serde_json::json!({"_source": {"id": "not-an-md5"}});
        assert!(record_from_upstream(&value, false).is_none());
    }

    #[tokio::test]
    async fn pipeline_batches_and_skips_non_downloadable_records() {
        let dir = TempDir::new().unwrap();
        let catalog = CatalogStore::open(&dir.path().join("catalog.db"), Duration::from_secs(15))
            .await
            .unwrap();

        let mut input = String::new();
        input.push_str(&upstream_line('b', "first", Some("shard_01.torrent")));
        input.push('\n');
        input.push_str(&upstream_line('c', "second", Some("shard_01.torrent")));
        input.push('\n');
        // No torrent and no IPFS: rejected at the door.
        let mut orphan: Value =
            serde_json::from_str(&upstream_line('d', "orphan", None)).unwrap();
        orphan["_source"]["file_unified_data"]["ipfs_infos"] = serde_json::json!([]);
        input.push_str(&orphan.to_string());
        input.push('\n');

        let tool = ImportFilesTool::new(catalog.clone(), 2);
        let report = tool.run(Cursor::new(input), false).await.unwrap();

        assert_eq!(report.read, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted, 2);
        assert!(catalog.find_by_md5(&"b".repeat(32)).await.unwrap().is_some());
        assert!(catalog.find_by_md5(&"d".repeat(32)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_line_surfaces_after_the_queue_drains() {
        let dir = TempDir::new().unwrap();
        let catalog = CatalogStore::open(&dir.path().join("catalog.db"), Duration::from_secs(15))
            .await
            .unwrap();

        let mut input = String::new();
        input.push_str(&upstream_line('e', "kept", Some("shard_01.torrent")));
        input.push('\n');
        input.push_str("{not json\n");

        let tool = ImportFilesTool::new(catalog.clone(), 10);
        let err = tool.run(Cursor::new(input), false).await.unwrap_err();
        assert!(err.to_string().contains("malformed ingest record"));
        // The record queued before the failure still landed.
        assert!(catalog.find_by_md5(&"e".repeat(32)).await.unwrap().is_some());
    }
}
