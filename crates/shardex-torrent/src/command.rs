//! Command definitions exchanged between the driver facade and its worker.

use tokio::sync::oneshot;

use crate::error::DriverError;
use crate::types::{InfoHash, TorrentFileEntry, TorrentSource, TorrentStatus};

/// Channel half used to deliver an operation's outcome.
pub(crate) type Responder<T> = oneshot::Sender<Result<T, DriverError>>;

pub(crate) enum DriverCommand {
    Add {
        source: TorrentSource,
        respond_to: Responder<InfoHash>,
    },
    Remove {
        hash: InfoHash,
        delete_files: bool,
        respond_to: Responder<()>,
    },
    HasMetadata {
        hash: InfoHash,
        respond_to: Responder<bool>,
    },
    TorrentFiles {
        hash: InfoHash,
        respond_to: Responder<Vec<TorrentFileEntry>>,
    },
    PieceLength {
        hash: InfoHash,
        respond_to: Responder<u64>,
    },
    NumPieces {
        hash: InfoHash,
        respond_to: Responder<u32>,
    },
    PrioritizeFiles {
        hash: InfoHash,
        priorities: Vec<u8>,
        respond_to: Responder<()>,
    },
    PiecePriority {
        hash: InfoHash,
        piece: u32,
        priority: u8,
        respond_to: Responder<()>,
    },
    HavePiece {
        hash: InfoHash,
        piece: u32,
        respond_to: Responder<bool>,
    },
    /// Parked until the engine's read-piece alert completes it.
    ReadPiece {
        hash: InfoHash,
        piece: u32,
        respond_to: Responder<Vec<u8>>,
    },
    Status {
        hash: InfoHash,
        respond_to: Responder<TorrentStatus>,
    },
    Pause {
        hash: InfoHash,
        respond_to: Responder<()>,
    },
    Resume {
        hash: InfoHash,
        respond_to: Responder<()>,
    },
    ForceRecheck {
        hash: InfoHash,
        respond_to: Responder<()>,
    },
    /// Ask the engine to serialize resume data; the blob lands on disk when
    /// its alert arrives.
    SaveResumeData {
        hash: InfoHash,
        respond_to: Responder<()>,
    },
    RemoveResumeData {
        hash: InfoHash,
        respond_to: Responder<()>,
    },
    /// Explicit non-blocking alert drain for loop owners.
    ProcessAlerts {
        respond_to: Responder<()>,
    },
}
