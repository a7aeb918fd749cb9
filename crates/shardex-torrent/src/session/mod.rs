//! The engine session contract and the built-in in-memory double.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{EngineAlert, InfoHash, TorrentFileEntry, TorrentSource, TorrentStatus};

mod memory;

pub use memory::{MemorySession, MemoryTorrentSpec};

/// Capability set a BitTorrent engine adapter must provide.
///
/// The driver worker is the only caller; it owns the session exclusively
/// and serialises all access, which is why methods take `&mut self`. An
/// adapter needs: magnet fetch with DHT bootstrap, sparse storage,
/// per-file and per-piece priorities in `0..=7` (0 meaning "do not
/// download"), async piece reads surfaced through [`EngineAlert`], and
/// resume-data serialization the engine can read back.
#[async_trait]
pub trait EngineSession: Send {
    /// Admit a torrent and return its infohash.
    async fn add_torrent(&mut self, source: &TorrentSource, save_path: &Path)
    -> Result<InfoHash>;
    /// Remove a torrent, optionally deleting its payload files.
    async fn remove_torrent(&mut self, hash: &InfoHash, delete_files: bool) -> Result<()>;
    /// Whether torrent metadata (the file table) is available yet.
    async fn has_metadata(&mut self, hash: &InfoHash) -> Result<bool>;
    /// The torrent's file table with logical-stream offsets.
    async fn torrent_files(&mut self, hash: &InfoHash) -> Result<Vec<TorrentFileEntry>>;
    /// Fixed piece length of the torrent.
    async fn piece_length(&mut self, hash: &InfoHash) -> Result<u64>;
    /// Number of pieces in the torrent.
    async fn num_pieces(&mut self, hash: &InfoHash) -> Result<u32>;
    /// Set per-file priorities, one slot per file-table entry.
    async fn prioritize_files(&mut self, hash: &InfoHash, priorities: &[u8]) -> Result<()>;
    /// Set the priority of a single piece.
    async fn piece_priority(&mut self, hash: &InfoHash, piece: u32, priority: u8) -> Result<()>;
    /// Whether a piece is present locally.
    async fn have_piece(&mut self, hash: &InfoHash, piece: u32) -> Result<bool>;
    /// Request an async piece read; completion arrives as
    /// [`EngineAlert::ReadPiece`].
    async fn request_piece_read(&mut self, hash: &InfoHash, piece: u32) -> Result<()>;
    /// Transfer snapshot for a torrent.
    async fn status(&mut self, hash: &InfoHash) -> Result<TorrentStatus>;
    /// Pause a torrent.
    async fn pause(&mut self, hash: &InfoHash) -> Result<()>;
    /// Resume a paused torrent.
    async fn resume(&mut self, hash: &InfoHash) -> Result<()>;
    /// Re-verify on-disk payload against piece hashes.
    async fn force_recheck(&mut self, hash: &InfoHash) -> Result<()>;
    /// Request resume-data serialization; completion arrives as
    /// [`EngineAlert::ResumeData`].
    async fn request_save_resume(&mut self, hash: &InfoHash) -> Result<()>;
    /// Drain the engine's alert queue without blocking.
    async fn poll_alerts(&mut self) -> Result<Vec<EngineAlert>>;
}

/// Create the default session implementation.
///
/// Production deployments wire a native engine adapter here; without one,
/// the in-memory session keeps the driver, extractor, and seed manager
/// fully exercisable.
#[must_use]
pub fn create_session() -> Box<dyn EngineSession> {
    Box::new(MemorySession::default())
}
