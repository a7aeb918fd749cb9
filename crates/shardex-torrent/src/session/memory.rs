//! In-memory engine session.
//!
//! Serves synthetic torrents out of in-memory buffers while honouring the
//! real session contract: priorities gate what "downloads", piece reads
//! complete through the alert queue, completed files appear under the save
//! path, and a recheck picks up payload bytes that arrived on disk behind
//! the engine's back. Used by tests across the workspace and as the default
//! session when no native engine adapter is wired in.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use super::EngineSession;
use crate::magnet::infohash_from_magnet;
use crate::types::{EngineAlert, InfoHash, TorrentFileEntry, TorrentSource, TorrentStatus};

/// Default piece priority an engine assigns before any selection applies.
const DEFAULT_PRIORITY: u8 = 4;

/// Blueprint for a torrent the in-memory session can serve.
#[derive(Debug, Clone)]
pub struct MemoryTorrentSpec {
    /// Fixed piece length.
    pub piece_length: u64,
    /// File table as `(path, size)` pairs; offsets are derived in order.
    pub files: Vec<(String, u64)>,
    /// The torrent's full logical data stream.
    pub data: Vec<u8>,
    /// Whether magnet admission resolves metadata (false simulates a
    /// magnet whose swarm never answers).
    pub metadata_on_magnet: bool,
    /// Whether the swarm delivers pieces at all (false simulates a stalled
    /// download where only a recheck can surface payload bytes).
    pub stalled: bool,
}

impl MemoryTorrentSpec {
    /// Blueprint with metadata available and a live swarm.
    #[must_use]
    pub const fn new(piece_length: u64, files: Vec<(String, u64)>, data: Vec<u8>) -> Self {
        Self {
            piece_length,
            files,
            data,
            metadata_on_magnet: true,
            stalled: false,
        }
    }
}

#[derive(Debug)]
struct MemoryTorrent {
    piece_length: u64,
    files: Vec<TorrentFileEntry>,
    data: Vec<u8>,
    save_path: PathBuf,
    piece_priorities: Vec<u8>,
    have: Vec<bool>,
    written: Vec<bool>,
    paused: bool,
    stalled: bool,
    metadata_available: bool,
}

impl MemoryTorrent {
    fn from_spec(spec: &MemoryTorrentSpec, save_path: &Path, metadata_available: bool) -> Self {
        let mut offset = 0_u64;
        let files = spec
            .files
            .iter()
            .enumerate()
            .map(|(index, (path, size))| {
                let entry = TorrentFileEntry {
                    index,
                    path: path.clone(),
                    size: *size,
                    offset,
                };
                offset += size;
                entry
            })
            .collect::<Vec<_>>();
        let num_pieces = to_usize(spec.data.len() as u64).div_ceil(to_usize(spec.piece_length));

        Self {
            piece_length: spec.piece_length,
            files,
            data: spec.data.clone(),
            save_path: save_path.to_path_buf(),
            piece_priorities: vec![DEFAULT_PRIORITY; num_pieces],
            have: vec![false; num_pieces],
            written: vec![false; spec.files.len()],
            paused: false,
            stalled: spec.stalled,
            metadata_available,
        }
    }

    fn pending() -> Self {
        Self {
            piece_length: 0,
            files: Vec::new(),
            data: Vec::new(),
            save_path: PathBuf::new(),
            piece_priorities: Vec::new(),
            have: Vec::new(),
            written: Vec::new(),
            paused: false,
            stalled: true,
            metadata_available: false,
        }
    }

    fn covering_pieces(&self, entry: &TorrentFileEntry) -> std::ops::RangeInclusive<usize> {
        if entry.size == 0 {
            let piece = to_usize(entry.offset / self.piece_length.max(1));
            return piece..=piece;
        }
        let first = to_usize(entry.offset / self.piece_length);
        let last = to_usize((entry.offset + entry.size - 1) / self.piece_length);
        first..=last
    }

    fn piece_bytes(&self, piece: usize) -> &[u8] {
        let start = piece * to_usize(self.piece_length);
        let end = (start + to_usize(self.piece_length)).min(self.data.len());
        &self.data[start..end]
    }

    fn download_tick(&mut self) {
        if self.paused || !self.metadata_available {
            return;
        }
        if !self.stalled {
            for piece in 0..self.have.len() {
                if self.piece_priorities[piece] > 0 {
                    self.have[piece] = true;
                }
            }
        }
        self.write_completed_files();
    }

    fn write_completed_files(&mut self) {
        let entries = self.files.clone();
        for entry in &entries {
            if self.written[entry.index] || !self.file_is_complete(entry) {
                continue;
            }
            let destination = self.save_path.join(&entry.path);
            if let Some(parent) = destination.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let start = to_usize(entry.offset);
            let end = start + to_usize(entry.size);
            if end <= self.data.len() && std::fs::write(&destination, &self.data[start..end]).is_ok()
            {
                self.written[entry.index] = true;
            }
        }
    }

    fn file_is_complete(&self, entry: &TorrentFileEntry) -> bool {
        self.covering_pieces(entry)
            .all(|piece| self.have.get(piece).copied().unwrap_or(false))
    }

    fn file_bytes_done(&self, entry: &TorrentFileEntry) -> u64 {
        let mut done = 0_u64;
        let file_end = entry.offset + entry.size;
        for piece in self.covering_pieces(entry) {
            if !self.have.get(piece).copied().unwrap_or(false) {
                continue;
            }
            let piece_start = piece as u64 * self.piece_length;
            let piece_end = piece_start + self.piece_length;
            done += piece_end.min(file_end).saturating_sub(piece_start.max(entry.offset));
        }
        done.min(entry.size)
    }

    fn recheck(&mut self) {
        let entries = self.files.clone();
        for entry in &entries {
            let candidate = self.save_path.join(&entry.path);
            let on_disk = std::fs::metadata(&candidate)
                .map(|meta| meta.len() == entry.size)
                .unwrap_or(false);
            if on_disk {
                for piece in self.covering_pieces(entry) {
                    if piece < self.have.len() {
                        self.have[piece] = true;
                    }
                }
                self.written[entry.index] = true;
            }
        }
    }

    fn status(&self) -> TorrentStatus {
        let wanted: Vec<usize> = (0..self.have.len())
            .filter(|piece| self.piece_priorities[*piece] > 0)
            .collect();
        let progress = if wanted.is_empty() {
            1.0
        } else {
            let done = wanted
                .iter()
                .filter(|piece| self.have[**piece])
                .count();
            #[allow(clippy::cast_precision_loss)]
            {
                done as f64 / wanted.len() as f64
            }
        };
        TorrentStatus {
            progress,
            download_rate: 0,
            upload_rate: 0,
            file_progress: self
                .files
                .iter()
                .map(|entry| self.file_bytes_done(entry))
                .collect(),
        }
    }
}

/// In-memory [`EngineSession`] double.
#[derive(Debug, Default)]
pub struct MemorySession {
    registry: HashMap<InfoHash, MemoryTorrentSpec>,
    active: HashMap<InfoHash, MemoryTorrent>,
    alerts: VecDeque<EngineAlert>,
}

impl MemorySession {
    /// Make a torrent known to the simulated swarm.
    pub fn register(&mut self, hash: InfoHash, spec: MemoryTorrentSpec) {
        self.registry.insert(hash, spec);
    }

    fn torrent_mut(&mut self, hash: &InfoHash) -> Result<&mut MemoryTorrent> {
        self.active
            .get_mut(hash)
            .ok_or_else(|| anyhow!("torrent {hash} not in session"))
    }
}

#[async_trait]
impl EngineSession for MemorySession {
    async fn add_torrent(
        &mut self,
        source: &TorrentSource,
        save_path: &Path,
    ) -> Result<InfoHash> {
        let (hash, via_magnet) = match source {
            TorrentSource::Magnet { uri } => {
                let hash = infohash_from_magnet(uri).map_err(|err| anyhow!(err.to_string()))?;
                (hash, true)
            }
            TorrentSource::TorrentFile { path } => {
                let stem = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .ok_or_else(|| anyhow!("metainfo path {} has no stem", path.display()))?;
                (InfoHash::new(stem), false)
            }
        };

        let torrent = self.registry.get(&hash).map_or_else(
            MemoryTorrent::pending,
            |spec| {
                let metadata = !via_magnet || spec.metadata_on_magnet;
                MemoryTorrent::from_spec(spec, save_path, metadata)
            },
        );
        if torrent.metadata_available {
            self.alerts
                .push_back(EngineAlert::MetadataReceived { hash: hash.clone() });
        }
        self.active.insert(hash.clone(), torrent);
        Ok(hash)
    }

    async fn remove_torrent(&mut self, hash: &InfoHash, delete_files: bool) -> Result<()> {
        let Some(torrent) = self.active.remove(hash) else {
            bail!("torrent {hash} not in session");
        };
        if delete_files {
            for entry in &torrent.files {
                let _ = std::fs::remove_file(torrent.save_path.join(&entry.path));
            }
        }
        Ok(())
    }

    async fn has_metadata(&mut self, hash: &InfoHash) -> Result<bool> {
        Ok(self.torrent_mut(hash)?.metadata_available)
    }

    async fn torrent_files(&mut self, hash: &InfoHash) -> Result<Vec<TorrentFileEntry>> {
        let torrent = self.torrent_mut(hash)?;
        if !torrent.metadata_available {
            bail!("metadata not available for {hash}");
        }
        Ok(torrent.files.clone())
    }

    async fn piece_length(&mut self, hash: &InfoHash) -> Result<u64> {
        Ok(self.torrent_mut(hash)?.piece_length)
    }

    async fn num_pieces(&mut self, hash: &InfoHash) -> Result<u32> {
        Ok(u32::try_from(self.torrent_mut(hash)?.have.len()).unwrap_or(u32::MAX))
    }

    async fn prioritize_files(&mut self, hash: &InfoHash, priorities: &[u8]) -> Result<()> {
        let torrent = self.torrent_mut(hash)?;
        if priorities.len() != torrent.files.len() {
            bail!(
                "priority slots ({}) do not match file table ({})",
                priorities.len(),
                torrent.files.len()
            );
        }
        let entries = torrent.files.clone();
        for priority in &mut torrent.piece_priorities {
            *priority = 0;
        }
        for entry in &entries {
            let priority = priorities[entry.index];
            if priority == 0 {
                continue;
            }
            for piece in torrent.covering_pieces(entry) {
                if piece < torrent.piece_priorities.len() {
                    torrent.piece_priorities[piece] = torrent.piece_priorities[piece].max(priority);
                }
            }
        }
        Ok(())
    }

    async fn piece_priority(&mut self, hash: &InfoHash, piece: u32, priority: u8) -> Result<()> {
        let torrent = self.torrent_mut(hash)?;
        let index = to_usize(u64::from(piece));
        if index >= torrent.piece_priorities.len() {
            bail!("piece {piece} out of range for {hash}");
        }
        torrent.piece_priorities[index] = priority;
        Ok(())
    }

    async fn have_piece(&mut self, hash: &InfoHash, piece: u32) -> Result<bool> {
        let torrent = self.torrent_mut(hash)?;
        Ok(torrent
            .have
            .get(to_usize(u64::from(piece)))
            .copied()
            .unwrap_or(false))
    }

    async fn request_piece_read(&mut self, hash: &InfoHash, piece: u32) -> Result<()> {
        let torrent = self.torrent_mut(hash)?;
        let index = to_usize(u64::from(piece));
        if !torrent.have.get(index).copied().unwrap_or(false) {
            bail!("piece {piece} not present for {hash}");
        }
        let data = torrent.piece_bytes(index).to_vec();
        self.alerts.push_back(EngineAlert::ReadPiece {
            hash: hash.clone(),
            piece,
            data,
        });
        Ok(())
    }

    async fn status(&mut self, hash: &InfoHash) -> Result<TorrentStatus> {
        Ok(self.torrent_mut(hash)?.status())
    }

    async fn pause(&mut self, hash: &InfoHash) -> Result<()> {
        self.torrent_mut(hash)?.paused = true;
        Ok(())
    }

    async fn resume(&mut self, hash: &InfoHash) -> Result<()> {
        self.torrent_mut(hash)?.paused = false;
        Ok(())
    }

    async fn force_recheck(&mut self, hash: &InfoHash) -> Result<()> {
        self.torrent_mut(hash)?.recheck();
        Ok(())
    }

    async fn request_save_resume(&mut self, hash: &InfoHash) -> Result<()> {
        if !self.active.contains_key(hash) {
            bail!("torrent {hash} not in session");
        }
        self.alerts.push_back(EngineAlert::ResumeData {
            hash: hash.clone(),
            payload: format!("fastresume:{hash}").into_bytes(),
        });
        Ok(())
    }

    async fn poll_alerts(&mut self) -> Result<Vec<EngineAlert>> {
        for torrent in self.active.values_mut() {
            torrent.download_tick();
        }
        Ok(self.alerts.drain(..).collect())
    }
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec_with_one_file() -> (InfoHash, MemoryTorrentSpec) {
        let data = b"0123456789abcdef".repeat(64); // 1 KiB
        (
            InfoHash::new("1".repeat(40)),
            MemoryTorrentSpec::new(256, vec![("shard/a.bin".to_owned(), 1_024)], data),
        )
    }

    #[tokio::test]
    async fn magnet_add_resolves_registered_torrents() {
        let dir = TempDir::new().unwrap();
        let (hash, spec) = spec_with_one_file();
        let mut session = MemorySession::default();
        session.register(hash.clone(), spec);

        let magnet = format!("magnet:?xt=urn:btih:{hash}");
        let added = session
            .add_torrent(&TorrentSource::magnet(magnet), dir.path())
            .await
            .unwrap();
        assert_eq!(added, hash);
        assert!(session.has_metadata(&hash).await.unwrap());
        assert_eq!(session.num_pieces(&hash).await.unwrap(), 4);
        assert_eq!(session.piece_length(&hash).await.unwrap(), 256);
    }

    #[tokio::test]
    async fn unanswered_magnet_never_produces_metadata() {
        let dir = TempDir::new().unwrap();
        let (hash, mut spec) = spec_with_one_file();
        spec.metadata_on_magnet = false;
        let mut session = MemorySession::default();
        session.register(hash.clone(), spec);

        session
            .add_torrent(
                &TorrentSource::magnet(format!("magnet:?xt=urn:btih:{hash}")),
                dir.path(),
            )
            .await
            .unwrap();
        assert!(!session.has_metadata(&hash).await.unwrap());
        assert!(session.torrent_files(&hash).await.is_err());
    }

    #[tokio::test]
    async fn pieces_arrive_only_for_positive_priorities() {
        let dir = TempDir::new().unwrap();
        let (hash, spec) = spec_with_one_file();
        let mut session = MemorySession::default();
        session.register(hash.clone(), spec);
        session
            .add_torrent(
                &TorrentSource::magnet(format!("magnet:?xt=urn:btih:{hash}")),
                dir.path(),
            )
            .await
            .unwrap();

        for piece in 0..4 {
            session.piece_priority(&hash, piece, 0).await.unwrap();
        }
        session.piece_priority(&hash, 2, 7).await.unwrap();
        session.poll_alerts().await.unwrap();

        assert!(!session.have_piece(&hash, 0).await.unwrap());
        assert!(session.have_piece(&hash, 2).await.unwrap());

        session.request_piece_read(&hash, 2).await.unwrap();
        let alerts = session.poll_alerts().await.unwrap();
        let piece_data = alerts.iter().find_map(|alert| match alert {
            EngineAlert::ReadPiece { piece: 2, data, .. } => Some(data.clone()),
            _ => None,
        });
        assert_eq!(piece_data.unwrap().len(), 256);
    }

    #[tokio::test]
    async fn completed_files_land_under_the_save_path() {
        let dir = TempDir::new().unwrap();
        let (hash, spec) = spec_with_one_file();
        let expected = spec.data.clone();
        let mut session = MemorySession::default();
        session.register(hash.clone(), spec);
        session
            .add_torrent(
                &TorrentSource::magnet(format!("magnet:?xt=urn:btih:{hash}")),
                dir.path(),
            )
            .await
            .unwrap();

        session.poll_alerts().await.unwrap();
        let status = session.status(&hash).await.unwrap();
        assert!(status.is_complete());
        assert_eq!(
            std::fs::read(dir.path().join("shard/a.bin")).unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn recheck_discovers_bytes_dropped_on_disk() {
        let dir = TempDir::new().unwrap();
        let (hash, mut spec) = spec_with_one_file();
        spec.stalled = true;
        let payload = spec.data.clone();
        let mut session = MemorySession::default();
        session.register(hash.clone(), spec);
        session
            .add_torrent(
                &TorrentSource::magnet(format!("magnet:?xt=urn:btih:{hash}")),
                dir.path(),
            )
            .await
            .unwrap();

        session.poll_alerts().await.unwrap();
        assert!(!session.status(&hash).await.unwrap().is_complete());

        // Blob arrives out of band, exactly as the IPFS substitution path
        // renames a staging file into place.
        std::fs::create_dir_all(dir.path().join("shard")).unwrap();
        std::fs::write(dir.path().join("shard/a.bin"), &payload).unwrap();
        session.force_recheck(&hash).await.unwrap();

        assert!(session.status(&hash).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn resume_data_flows_through_the_alert_queue() {
        let dir = TempDir::new().unwrap();
        let (hash, spec) = spec_with_one_file();
        let mut session = MemorySession::default();
        session.register(hash.clone(), spec);
        session
            .add_torrent(
                &TorrentSource::magnet(format!("magnet:?xt=urn:btih:{hash}")),
                dir.path(),
            )
            .await
            .unwrap();

        session.request_save_resume(&hash).await.unwrap();
        let alerts = session.poll_alerts().await.unwrap();
        assert!(alerts.iter().any(|alert| matches!(
            alert,
            EngineAlert::ResumeData { hash: alert_hash, .. } if *alert_hash == hash
        )));
    }
}
