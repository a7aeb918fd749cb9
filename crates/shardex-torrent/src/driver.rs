//! Clone-able driver facade over the engine worker.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::command::{DriverCommand, Responder};
use crate::error::DriverError;
use crate::session::EngineSession;
use crate::sidecar::{ByteOffsetMap, SidecarEntry};
use crate::store::ResumeStore;
use crate::types::{
    InfoHash, PRIORITY_HIGH, PRIORITY_SKIP, TorrentFileEntry, TorrentSource, TorrentStatus,
};

const COMMAND_BUFFER: usize = 128;
const METADATA_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Driver construction parameters.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Root directory for torrent payload and infohash-keyed blobs.
    pub downloads_root: PathBuf,
    /// Bound on waiting for torrent metadata to arrive.
    pub metadata_timeout: Duration,
}

/// Facade over the worker task that owns the engine session.
#[derive(Clone)]
pub struct TorrentDriver {
    commands: mpsc::Sender<DriverCommand>,
    store: ResumeStore,
    metadata_timeout: Duration,
}

impl TorrentDriver {
    /// Spawn the worker that owns `session` and return the facade.
    ///
    /// # Errors
    ///
    /// Returns an error when the downloads root cannot be created.
    pub fn spawn(session: Box<dyn EngineSession>, config: DriverConfig) -> Result<Self, DriverError> {
        let store = ResumeStore::new(&config.downloads_root);
        store.ensure_initialized().map_err(|source| DriverError::Io {
            path: config.downloads_root.clone(),
            source,
        })?;

        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        crate::worker::spawn(session, store.clone(), rx);

        Ok(Self {
            commands,
            store,
            metadata_timeout: config.metadata_timeout,
        })
    }

    /// The blob store rooted at the downloads directory.
    #[must_use]
    pub const fn resume_store(&self) -> &ResumeStore {
        &self.store
    }

    /// Add a torrent and apply its selection.
    ///
    /// Empty `wanted_files` and `wanted_byteoffsets` mean "download all".
    /// When either is non-empty the call waits for metadata (bounded by the
    /// configured timeout), selects the wanted files by basename, and
    /// records byte-offset sidecar entries for the given offsets.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MetadataTimeout`] when metadata does not
    /// arrive in time (the torrent is removed from the session again), or
    /// [`DriverError::FileNotFound`] when a wanted basename is missing.
    pub async fn add(
        &self,
        source: TorrentSource,
        wanted_files: &[String],
        wanted_byteoffsets: &[u64],
    ) -> Result<InfoHash, DriverError> {
        let hash = self
            .request(|respond_to| DriverCommand::Add { source, respond_to })
            .await?;

        if wanted_files.is_empty() && wanted_byteoffsets.is_empty() {
            return Ok(hash);
        }

        if let Err(err) = self.wait_metadata(&hash).await {
            // A torrent without metadata cannot be selected; do not leave
            // it dangling in the session.
            let _ = self.remove(&hash, false).await;
            return Err(err);
        }
        if !wanted_files.is_empty() {
            self.select_files(&hash, wanted_files).await?;
        }
        if !wanted_byteoffsets.is_empty() {
            self.record_byteoffsets(&hash, wanted_byteoffsets).await?;
        }
        Ok(hash)
    }

    /// Poll until metadata is available, bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MetadataTimeout`] when the bound elapses.
    pub async fn wait_metadata(&self, hash: &InfoHash) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + self.metadata_timeout;
        loop {
            if self.has_metadata(hash).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::MetadataTimeout { hash: hash.clone() });
            }
            tokio::time::sleep(METADATA_POLL_INTERVAL).await;
        }
    }

    /// Restrict the download to the given basenames.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::FileNotFound`] when any basename does not
    /// exist in the torrent's file table.
    pub async fn select_files(
        &self,
        hash: &InfoHash,
        wanted: &[String],
    ) -> Result<(), DriverError> {
        let files = self.torrent_files(hash).await?;
        let mut priorities = vec![PRIORITY_SKIP; files.len()];
        for filename in wanted {
            let entry = find_entry(&files, filename).ok_or_else(|| DriverError::FileNotFound {
                filename: filename.clone(),
            })?;
            priorities[entry.index] = PRIORITY_HIGH;
        }
        info!(
            torrent = %hash,
            wanted = wanted.len(),
            total = files.len(),
            "restricting torrent to wanted files"
        );
        self.prioritize_files(hash, priorities).await
    }

    /// Derive and persist sidecar entries for the given payload offsets.
    ///
    /// Each offset is resolved against the torrent's file table to the
    /// shard containing it; the sidecar is rewritten atomically with the
    /// new entries merged in.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NoFileAtOffset`] when an offset lies past
    /// the logical stream, or an I/O error when the sidecar cannot be
    /// written.
    pub async fn record_byteoffsets(
        &self,
        hash: &InfoHash,
        offsets: &[u64],
    ) -> Result<(), DriverError> {
        let files = self.torrent_files(hash).await?;
        let root = self.store.downloads_root().to_path_buf();
        let mut map = ByteOffsetMap::load(&root, hash)
            .map_err(|source| DriverError::Io {
                path: ByteOffsetMap::file_path(&root, hash),
                source,
            })?
            .unwrap_or_default();

        for offset in offsets {
            let entry = files
                .iter()
                .find(|file| file.contains_offset(*offset))
                .ok_or(DriverError::NoFileAtOffset { offset: *offset })?;
            map.insert(
                *offset,
                SidecarEntry {
                    path: entry.path.clone(),
                    start_offset: entry.offset,
                },
            );
        }
        map.store(&root, hash).map_err(|source| DriverError::Io {
            path: ByteOffsetMap::file_path(&root, hash),
            source,
        })
    }

    /// The file of the torrent covering an absolute stream offset.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NoFileAtOffset`] when the offset is past the
    /// end of the logical stream.
    pub async fn files_at_offset(
        &self,
        hash: &InfoHash,
        offset: u64,
    ) -> Result<TorrentFileEntry, DriverError> {
        let files = self.torrent_files(hash).await?;
        files
            .into_iter()
            .find(|file| file.contains_offset(offset))
            .ok_or(DriverError::NoFileAtOffset { offset })
    }

    /// The file-table entry whose basename matches `filename`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::FileNotFound`] when no entry matches.
    pub async fn find_file(
        &self,
        hash: &InfoHash,
        filename: &str,
    ) -> Result<TorrentFileEntry, DriverError> {
        let files = self.torrent_files(hash).await?;
        find_entry(&files, filename)
            .cloned()
            .ok_or_else(|| DriverError::FileNotFound {
                filename: filename.to_owned(),
            })
    }

    /// Absolute path a torrent file occupies under the downloads root.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::FileNotFound`] when no entry matches.
    pub async fn local_path_for(
        &self,
        hash: &InfoHash,
        filename: &str,
    ) -> Result<PathBuf, DriverError> {
        let entry = self.find_file(hash, filename).await?;
        Ok(self.store.downloads_root().join(entry.path))
    }

    /// Whether torrent metadata is available.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn has_metadata(&self, hash: &InfoHash) -> Result<bool, DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::HasMetadata { hash, respond_to })
            .await
    }

    /// The torrent's file table.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent or its metadata is missing.
    pub async fn torrent_files(&self, hash: &InfoHash) -> Result<Vec<TorrentFileEntry>, DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::TorrentFiles { hash, respond_to })
            .await
    }

    /// The torrent's fixed piece length.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn piece_length(&self, hash: &InfoHash) -> Result<u64, DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::PieceLength { hash, respond_to })
            .await
    }

    /// The torrent's piece count.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn num_pieces(&self, hash: &InfoHash) -> Result<u32, DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::NumPieces { hash, respond_to })
            .await
    }

    /// Apply raw per-file priorities.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the slot count does not match.
    pub async fn prioritize_files(
        &self,
        hash: &InfoHash,
        priorities: Vec<u8>,
    ) -> Result<(), DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::PrioritizeFiles {
            hash,
            priorities,
            respond_to,
        })
        .await
    }

    /// Set one piece's priority (`0` disables, `7` is highest).
    ///
    /// # Errors
    ///
    /// Returns an engine error when the piece index is out of range.
    pub async fn piece_priority(
        &self,
        hash: &InfoHash,
        piece: u32,
        priority: u8,
    ) -> Result<(), DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::PiecePriority {
            hash,
            piece,
            priority,
            respond_to,
        })
        .await
    }

    /// Whether a piece is present locally.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn have_piece(&self, hash: &InfoHash, piece: u32) -> Result<bool, DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::HavePiece {
            hash,
            piece,
            respond_to,
        })
        .await
    }

    /// Read one piece, waiting for it to arrive if necessary.
    ///
    /// The read parks on the worker and completes through the alert pump;
    /// there is no bound here, but dropping the future cancels the wait.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent disappears mid-wait.
    pub async fn read_piece(&self, hash: &InfoHash, piece: u32) -> Result<Vec<u8>, DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::ReadPiece {
            hash,
            piece,
            respond_to,
        })
        .await
    }

    /// Transfer snapshot for a torrent.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn status(&self, hash: &InfoHash) -> Result<TorrentStatus, DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::Status { hash, respond_to })
            .await
    }

    /// Pause a torrent.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn pause(&self, hash: &InfoHash) -> Result<(), DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::Pause { hash, respond_to })
            .await
    }

    /// Resume a paused torrent.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn resume(&self, hash: &InfoHash) -> Result<(), DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::Resume { hash, respond_to })
            .await
    }

    /// Re-verify on-disk payload against piece hashes.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn force_recheck(&self, hash: &InfoHash) -> Result<(), DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::ForceRecheck { hash, respond_to })
            .await
    }

    /// Remove a torrent from the session.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn remove(&self, hash: &InfoHash, delete_files: bool) -> Result<(), DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::Remove {
            hash,
            delete_files,
            respond_to,
        })
        .await
    }

    /// Request resume-data serialization; `<infohash>.fastresume` is
    /// written when the engine's save-data alert arrives.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the torrent is unknown.
    pub async fn save_resume_data(&self, hash: &InfoHash) -> Result<(), DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::SaveResumeData { hash, respond_to })
            .await
    }

    /// Delete the persisted resume blob for a torrent, if present.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when an existing blob cannot be removed.
    pub async fn remove_resume_data(&self, hash: &InfoHash) -> Result<(), DriverError> {
        let hash = hash.clone();
        self.request(|respond_to| DriverCommand::RemoveResumeData { hash, respond_to })
            .await
    }

    /// Drain the engine alert queue now, completing parked operations.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::WorkerGone`] when the worker has exited.
    pub async fn process_alerts(&self) -> Result<(), DriverError> {
        self.request(|respond_to| DriverCommand::ProcessAlerts { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Responder<T>) -> DriverCommand,
    ) -> Result<T, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| DriverError::WorkerGone)?;
        rx.await.map_err(|_| DriverError::WorkerGone)?
    }
}

fn find_entry<'a>(files: &'a [TorrentFileEntry], filename: &str) -> Option<&'a TorrentFileEntry> {
    files
        .iter()
        .find(|entry| entry.basename() == filename || entry.path.ends_with(filename))
}
