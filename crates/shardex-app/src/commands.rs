//! Command implementations behind the CLI surface.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tokio::sync::watch;
use tracing::{info, warn};

use shardex_catalog::{FileRecord, OrderBy, SearchQuery, SortDirection, SortKey, TorrentUpsert};
use shardex_extract::Extractor;
use shardex_fetch::TorrentIndexEntry;
use shardex_seeder::{SeedManager, SeedManagerConfig};

use crate::bootstrap::AppContext;
use crate::ingest::ImportFilesTool;

/// Torrent-list upserts commit in pages of this size.
const TORRENT_IMPORT_BATCH: usize = 100;

/// Run the seed manager loop until ctrl-c.
pub(crate) async fn run_daemon(context: AppContext) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut manager = SeedManager::new(
        context.catalog.clone(),
        context.driver.clone(),
        context.upstream.clone(),
        context.ipfs.clone(),
        SeedManagerConfig::default(),
    );
    manager.run(shutdown_rx).await;
    Ok(())
}

/// One-shot catalog search printed to stdout.
pub(crate) async fn search(
    context: &AppContext,
    query: String,
    language: Option<String>,
    year: Option<String>,
    limit: i64,
) -> Result<()> {
    let results = context
        .catalog
        .search(&SearchQuery {
            text: Some(query),
            language,
            year,
            order_by: Some(OrderBy {
                key: SortKey::Rank,
                direction: SortDirection::Ascending,
            }),
            limit,
            ..SearchQuery::default()
        })
        .await?;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    for record in &results {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &FileRecord) {
    println!("{}", "=".repeat(80));
    println!("Title       : {}", record.title.as_deref().unwrap_or("-"));
    println!("Author      : {}", record.author.as_deref().unwrap_or("-"));
    println!("Year        : {}", record.year.as_deref().unwrap_or("-"));
    if let Some(torrent) = record.torrent_path.as_deref() {
        println!("Torrent     : {torrent}");
    }
    for cid in &record.ipfs_cids {
        println!("IPFS        : {cid}");
    }
    println!("Cover       : {}", record.cover_url.as_deref().unwrap_or("-"));
    println!("md5         : {}", record.md5);
    println!("server_path : {}", record.server_paths.join(";"));
    if let Some(description) = record.description.as_deref() {
        println!("Description : {description}");
    }
    println!();
}

/// Resolve a record by md5 and reconstruct its payload.
pub(crate) async fn extract(context: AppContext, md5: &str, output: Option<PathBuf>) -> Result<()> {
    let record = context
        .catalog
        .find_by_md5(md5)
        .await?
        .ok_or_else(|| anyhow!("no catalog record for md5 {md5}"))?;

    let extractor = Extractor::new(
        context.catalog.clone(),
        context.driver.clone(),
        context.upstream.clone(),
    );
    let extracted = extractor.extract(&record).await?;

    let destination =
        output.unwrap_or_else(|| PathBuf::from(format!("{md5}.{}", record.extension)));
    tokio::fs::write(&destination, &extracted.data)
        .await
        .with_context(|| format!("failed to write {}", destination.display()))?;
    println!(
        "Extracted {} ({} bytes) to {}",
        extracted.filename,
        extracted.data.len(),
        destination.display()
    );
    Ok(())
}

/// Bulk-ingest NDJSON records from stdin.
pub(crate) async fn import_files(context: &AppContext, journals: bool) -> Result<()> {
    let tool = ImportFilesTool::new(context.catalog.clone(), context.config.ingest_batch_size);
    let report = tool
        .run(std::io::BufReader::new(std::io::stdin()), journals)
        .await?;
    info!(
        read = report.read,
        skipped = report.skipped,
        inserted = report.inserted,
        "file ingest finished"
    );
    Ok(())
}

/// Upsert the upstream torrent list into the catalog, one transaction per
/// page of entries.
pub(crate) async fn import_torrents(context: &AppContext, path: Option<PathBuf>) -> Result<()> {
    let entries: Vec<TorrentIndexEntry> = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw).context("torrent list is not valid JSON")?
        }
        None => context.upstream.list().await?,
    };
    info!(entries = entries.len(), "importing torrent list");

    let mut imported = 0_u64;
    let mut batch = Vec::with_capacity(TORRENT_IMPORT_BATCH);
    for entry in &entries {
        let Some(url) = entry.url.as_deref() else {
            warn!("skipping torrent entry without a url");
            continue;
        };
        batch.push(TorrentUpsert {
            path: context.upstream.relative_path(url).to_owned(),
            magnet_link: entry.magnet_link.clone(),
            added_to_torrents_list_at: entry.added_to_torrents_list_at.clone(),
            data_size: entry.data_size,
            num_files: entry.num_files,
            obsolete: entry.obsolete,
            embargo: entry.embargo,
        });
        if batch.len() >= TORRENT_IMPORT_BATCH {
            imported += context.catalog.upsert_torrent_batch(&batch).await?;
            info!(imported, "torrent import progress");
            batch.clear();
        }
    }
    imported += context.catalog.upsert_torrent_batch(&batch).await?;
    info!(imported, "torrent import finished");
    Ok(())
}

/// Apply `{metadata: {md5, byte_start}}` NDJSON records from stdin, one
/// transaction per batch of updates.
pub(crate) async fn import_byteoffsets(context: &AppContext) -> Result<()> {
    let batch_size = context.config.ingest_batch_size;
    let (sender, mut receiver) = tokio::sync::mpsc::channel::<(String, u64)>(batch_size * 2);
    let parser = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut read = 0_u64;
        for line in std::io::stdin().lock().lines() {
            let line = line.context("failed to read stdin")?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: serde_json::Value =
                serde_json::from_str(line).context("malformed byteoffset record")?;
            read += 1;
            let metadata = value.get("metadata");
            let md5 = metadata
                .and_then(|meta| meta.get("md5"))
                .and_then(serde_json::Value::as_str);
            let byte_start = metadata
                .and_then(|meta| meta.get("byte_start"))
                .and_then(serde_json::Value::as_u64);
            if let (Some(md5), Some(byte_start)) = (md5, byte_start) {
                if sender.blocking_send((md5.to_owned(), byte_start)).is_err() {
                    break;
                }
            }
        }
        Ok(read)
    });

    let mut updated = 0_u64;
    let mut batch: Vec<(String, u64)> = Vec::with_capacity(batch_size);
    while let Some(pair) = receiver.recv().await {
        batch.push(pair);
        if batch.len() >= batch_size {
            updated += context.catalog.set_byteoffsets_by_md5(&batch).await?;
            info!(updated, "byteoffset import progress");
            batch.clear();
        }
    }
    updated += context.catalog.set_byteoffsets_by_md5(&batch).await?;
    let read = parser.await.context("byteoffset parser panicked")??;
    info!(read, updated, "byteoffset import finished");
    Ok(())
}
