//! The seed reconciliation loop.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use shardex_catalog::{CatalogStore, TorrentRecord};
use shardex_fetch::{IpfsFetcher, TorrentIndexClient};
use shardex_torrent::{
    DriverError, InfoHash, TorrentDriver, TorrentSource, infohash_from_magnet,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::control::basename;

/// Page size for seed-all completion bookkeeping; each page commits as its
/// own transaction.
const COMPLETION_PAGE_SIZE: i64 = 100;
/// IPFS substitution only applies to targeted torrents at most this large.
const IPFS_MAX_WANTED: usize = 10;
/// Pause between the forced recheck and resuming the torrent.
const RECHECK_SETTLE: Duration = Duration::from_secs(1);
/// How long the shutdown path keeps pumping alerts so the engine flushes.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(2_500);
const SHUTDOWN_DRAIN_STEP: Duration = Duration::from_millis(250);

/// Loop tuning knobs.
#[derive(Debug, Clone)]
pub struct SeedManagerConfig {
    /// Reconciliation period.
    pub poll_interval: Duration,
}

impl Default for SeedManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// A torrent the loop keeps live in the session.
struct SessionTorrent {
    record: TorrentRecord,
    hash: InfoHash,
    /// Sorted wanted basenames; empty means "the whole torrent".
    wanted: Vec<String>,
    complete: bool,
    ipfs_processed: bool,
}

/// Reconciles the catalog's desired seeding set with the live session.
pub struct SeedManager {
    catalog: CatalogStore,
    driver: TorrentDriver,
    upstream: TorrentIndexClient,
    ipfs: IpfsFetcher,
    live: HashMap<i64, SessionTorrent>,
    poll_interval: Duration,
}

impl SeedManager {
    /// Build a manager over its collaborators.
    #[must_use]
    pub fn new(
        catalog: CatalogStore,
        driver: TorrentDriver,
        upstream: TorrentIndexClient,
        ipfs: IpfsFetcher,
        config: SeedManagerConfig,
    ) -> Self {
        Self {
            catalog,
            driver,
            upstream,
            ipfs,
            live: HashMap::new(),
            poll_interval: config.poll_interval,
        }
    }

    /// Run the loop until the shutdown signal flips, then save resume data
    /// and drain the alert queue.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        info!(period = ?self.poll_interval, "seed manager running");
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// One reconciliation pass: pump alerts, record completions, diff the
    /// desired set against the session, then attempt IPFS substitution.
    ///
    /// Per-torrent failures are logged and skipped; the pass continues.
    pub async fn tick(&mut self) {
        if let Err(err) = self.driver.process_alerts().await {
            warn!(error = %err, "alert pump failed");
        }
        self.check_completion().await;
        self.sync_torrents().await;
        self.try_ipfs().await;
    }

    async fn check_completion(&mut self) {
        let ids: Vec<i64> = self.live.keys().copied().collect();
        for id in ids {
            let Some(torrent) = self.live.get(&id) else {
                continue;
            };
            if torrent.complete {
                continue;
            }
            let hash = torrent.hash.clone();
            // A magnet still waiting for metadata has nothing meaningful
            // to report.
            if !matches!(self.driver.has_metadata(&hash).await, Ok(true)) {
                continue;
            }
            let status = match self.driver.status(&hash).await {
                Ok(status) => status,
                Err(err) => {
                    warn!(torrent_id = id, error = %err, "status read failed");
                    continue;
                }
            };
            if !status.is_complete() {
                continue;
            }
            match self.handle_completion(id).await {
                Ok(()) => {
                    if let Some(torrent) = self.live.get_mut(&id) {
                        torrent.complete = true;
                    }
                }
                Err(err) => {
                    warn!(torrent_id = id, error = %err, "completion bookkeeping failed");
                }
            }
        }
    }

    async fn handle_completion(&self, id: i64) -> Result<()> {
        let Some(torrent) = self.live.get(&id) else {
            return Ok(());
        };
        let hash = torrent.hash.clone();
        let record = torrent.record.clone();

        if record.is_seed_all {
            self.complete_seed_all(&record, &hash).await?;
        } else {
            self.complete_targeted(&record, &hash).await?;
        }
        self.driver.save_resume_data(&hash).await?;
        info!(torrent_id = id, torrent = %hash, "torrent completed");
        Ok(())
    }

    async fn complete_targeted(&self, record: &TorrentRecord, hash: &InfoHash) -> Result<()> {
        for file in &record.files {
            if file.is_complete {
                continue;
            }
            let local = self.driver.local_path_for(hash, &file.filename).await?;
            self.catalog
                .set_torrent_file_complete(file.id, &local.to_string_lossy())
                .await?;
        }
        Ok(())
    }

    /// Page through the torrent's catalog files and record a completed
    /// torrent-file row for every record whose server path matches one of
    /// the torrent's actual files. Pages commit independently and are safe
    /// to replay.
    async fn complete_seed_all(&self, record: &TorrentRecord, hash: &InfoHash) -> Result<()> {
        let entries = self.driver.torrent_files(hash).await?;
        let by_basename: HashMap<&str, &str> = entries
            .iter()
            .map(|entry| (entry.basename(), entry.path.as_str()))
            .collect();
        let root = self.driver.resume_store().downloads_root().to_path_buf();

        let mut offset = 0;
        loop {
            let files = self
                .catalog
                .files_for_torrent(record.id, COMPLETION_PAGE_SIZE, offset)
                .await?;
            if files.is_empty() {
                break;
            }
            let mut page = Vec::new();
            for file in &files {
                let Some(file_id) = file.id else { continue };
                for path in &file.server_paths {
                    let name = basename(path);
                    if let Some(in_torrent) = by_basename.get(name) {
                        page.push((
                            file_id,
                            name.to_owned(),
                            root.join(in_torrent).to_string_lossy().into_owned(),
                        ));
                        break;
                    }
                }
            }
            self.catalog
                .insert_completed_torrent_files(record.id, &page)
                .await?;
            offset += COMPLETION_PAGE_SIZE;
        }
        Ok(())
    }

    async fn sync_torrents(&mut self) {
        let desired = match self.catalog.list_seeding().await {
            Ok(desired) => desired,
            Err(err) => {
                warn!(error = %err, "failed to read the desired seeding set");
                return;
            }
        };

        let mut desired_ids = HashSet::new();
        for record in desired {
            let id = record.id;
            let wanted = wanted_files(&record);
            if !record.is_seed_all && wanted.is_empty() {
                // Nothing targeted yet; leave it for a later tick.
                continue;
            }
            desired_ids.insert(id);

            let needs_start = self
                .live
                .get(&id)
                .is_none_or(|torrent| torrent.wanted != wanted);
            if needs_start {
                if let Some(previous) = self.live.remove(&id) {
                    debug!(torrent_id = id, "wanted set drifted; re-adding torrent");
                    if let Err(err) = self.driver.remove(&previous.hash, false).await {
                        warn!(torrent_id = id, error = %err, "failed to remove stale torrent");
                    }
                }
                match self.start_torrent(&record, &wanted).await {
                    Ok(hash) => {
                        info!(
                            torrent_id = id,
                            torrent = %hash,
                            files = wanted.len(),
                            seed_all = record.is_seed_all,
                            "torrent started"
                        );
                        self.live.insert(
                            id,
                            SessionTorrent {
                                record,
                                hash,
                                wanted,
                                complete: false,
                                ipfs_processed: false,
                            },
                        );
                    }
                    Err(err) => {
                        warn!(torrent_id = id, error = %err, "failed to start torrent");
                    }
                }
            } else if let Some(torrent) = self.live.get_mut(&id) {
                torrent.record = record;
            }
        }

        let stale: Vec<i64> = self
            .live
            .keys()
            .filter(|id| !desired_ids.contains(id))
            .copied()
            .collect();
        for id in stale {
            if let Some(torrent) = self.live.remove(&id) {
                info!(torrent_id = id, torrent = %torrent.hash, "torrent no longer desired");
                if let Err(err) = self.driver.remove(&torrent.hash, false).await {
                    warn!(torrent_id = id, error = %err, "failed to remove torrent");
                }
            }
        }
    }

    /// Start a torrent, magnet first; when magnet metadata times out,
    /// fetch the `.torrent` from the upstream repository and retry.
    async fn start_torrent(&self, record: &TorrentRecord, wanted: &[String]) -> Result<InfoHash> {
        let magnet = record
            .magnet_link
            .as_deref()
            .ok_or_else(|| anyhow!("torrent {} has no magnet link", record.path))?;
        let expected = infohash_from_magnet(magnet)?;

        match self.add_with(TorrentSource::magnet(magnet), wanted).await {
            Ok(hash) => Ok(hash),
            Err(DriverError::MetadataTimeout { .. }) => {
                debug!(
                    torrent = %expected,
                    path = %record.path,
                    "magnet metadata timed out; fetching the torrent file"
                );
                let bytes = self.upstream.fetch_torrent(&record.path).await?;
                let metainfo = self.driver.resume_store().write_torrent(&expected, &bytes)?;
                Ok(self.add_with(TorrentSource::file(metainfo), wanted).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Add a torrent and make sure its metadata is in before it counts as
    /// live; a full-torrent add has no selection step, so the metadata
    /// wait happens here.
    async fn add_with(
        &self,
        source: TorrentSource,
        wanted: &[String],
    ) -> Result<InfoHash, DriverError> {
        if wanted.is_empty() {
            let hash = self.driver.add(source, &[], &[]).await?;
            if let Err(err) = self.driver.wait_metadata(&hash).await {
                let _ = self.driver.remove(&hash, false).await;
                return Err(err);
            }
            Ok(hash)
        } else {
            self.driver.add(source, wanted, &[]).await
        }
    }

    async fn try_ipfs(&mut self) {
        if !self.ipfs.is_enabled() {
            return;
        }
        let ids: Vec<i64> = self.live.keys().copied().collect();
        for id in ids {
            let eligible = self.live.get(&id).is_some_and(|torrent| {
                !torrent.complete
                    && !torrent.ipfs_processed
                    && !torrent.record.is_seed_all
                    && !torrent.wanted.is_empty()
                    && torrent.wanted.len() <= IPFS_MAX_WANTED
            });
            if !eligible {
                continue;
            }
            // One attempt per session torrent, whatever its outcome.
            if let Some(torrent) = self.live.get_mut(&id) {
                torrent.ipfs_processed = true;
            }
            if let Err(err) = self.substitute_from_ipfs(id).await {
                warn!(torrent_id = id, error = %err, "ipfs substitution failed");
            }
        }
    }

    /// Retrieve wanted payloads from IPFS gateways, rename them into the
    /// paths the engine expects, and recheck so the pieces count as ours.
    async fn substitute_from_ipfs(&self, id: i64) -> Result<()> {
        let Some(torrent) = self.live.get(&id) else {
            return Ok(());
        };
        let hash = torrent.hash.clone();
        let files = torrent.record.files.clone();

        let file_ids: Vec<i64> = files.iter().map(|file| file.file_id).collect();
        let records = self.catalog.find_by_ids(&file_ids).await?;
        let root = self.driver.resume_store().downloads_root().to_path_buf();

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        for record in &records {
            if record.ipfs_cids.is_empty() {
                continue;
            }
            let Some(file_id) = record.id else { continue };
            let Some(file) = files.iter().find(|file| file.file_id == file_id) else {
                continue;
            };
            if file.is_complete {
                continue;
            }
            match self.ipfs.fetch(&record.ipfs_cids, &root).await {
                Ok((cid, staging)) => match self.driver.local_path_for(&hash, &file.filename).await
                {
                    Ok(destination) => {
                        info!(md5 = %record.md5, cid = %cid, "payload retrieved from ipfs");
                        staged.push((staging, destination));
                    }
                    Err(err) => {
                        warn!(md5 = %record.md5, error = %err, "no in-torrent path for payload");
                    }
                },
                Err(err) => {
                    debug!(md5 = %record.md5, error = %err, "ipfs retrieval failed");
                }
            }
        }
        if staged.is_empty() {
            return Ok(());
        }

        self.driver.pause(&hash).await?;
        for (staging, destination) in &staged {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(staging, destination)?;
        }
        self.driver.force_recheck(&hash).await?;
        tokio::time::sleep(RECHECK_SETTLE).await;
        self.driver.resume(&hash).await?;
        info!(torrent = %hash, files = staged.len(), "substituted payloads from ipfs");
        Ok(())
    }

    /// Save resume data for every live torrent and give the engine a short
    /// window to flush before exit.
    async fn shutdown(&mut self) {
        info!(torrents = self.live.len(), "seed manager shutting down");
        let hashes: Vec<InfoHash> = self
            .live
            .values()
            .map(|torrent| torrent.hash.clone())
            .collect();
        for hash in &hashes {
            if let Err(err) = self.driver.save_resume_data(hash).await {
                warn!(torrent = %hash, error = %err, "failed to request resume data");
            }
        }
        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN;
        while tokio::time::Instant::now() < deadline {
            if let Err(err) = self.driver.process_alerts().await {
                warn!(error = %err, "alert pump failed during shutdown");
                break;
            }
            tokio::time::sleep(SHUTDOWN_DRAIN_STEP).await;
        }
    }
}

fn wanted_files(record: &TorrentRecord) -> Vec<String> {
    if record.is_seed_all {
        return Vec::new();
    }
    let mut wanted: Vec<String> = record
        .files
        .iter()
        .map(|file| file.filename.clone())
        .collect();
    wanted.sort();
    wanted.dedup();
    wanted
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardex_catalog::TorrentFileRecord;

    #[test]
    fn wanted_files_empty_for_seed_all() {
        let record = TorrentRecord {
            is_seed_all: true,
            files: vec![TorrentFileRecord {
                filename: "x.pdf".to_owned(),
                ..TorrentFileRecord::default()
            }],
            ..TorrentRecord::default()
        };
        assert!(wanted_files(&record).is_empty());
    }

    #[test]
    fn wanted_files_sorted_and_deduplicated() {
        let record = TorrentRecord {
            files: vec![
                TorrentFileRecord {
                    filename: "b.pdf".to_owned(),
                    ..TorrentFileRecord::default()
                },
                TorrentFileRecord {
                    filename: "a.pdf".to_owned(),
                    ..TorrentFileRecord::default()
                },
                TorrentFileRecord {
                    filename: "b.pdf".to_owned(),
                    ..TorrentFileRecord::default()
                },
            ],
            ..TorrentRecord::default()
        };
        assert_eq!(wanted_files(&record), vec!["a.pdf", "b.pdf"]);
    }
}
