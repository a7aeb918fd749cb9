#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Thin contract wrapper over a BitTorrent engine.
//!
//! The engine itself is a collaborator: anything able to satisfy
//! [`EngineSession`] (magnet fetch, sparse storage, per-file and per-piece
//! priorities, async piece reads, resume-data serialization) can sit behind
//! the driver. The driver owns the session on a background worker task,
//! drains the engine's alert queue on a poll interval, and completes parked
//! piece-read and resume-data operations when their alerts arrive. All
//! auxiliary state is keyed by infohash; engine handles never escape the
//! worker.

mod command;
pub mod driver;
pub mod error;
pub mod magnet;
pub mod session;
pub mod sidecar;
pub mod store;
pub mod types;
mod worker;

pub use driver::{DriverConfig, TorrentDriver};
pub use error::DriverError;
pub use magnet::infohash_from_magnet;
pub use session::{EngineSession, MemorySession, MemoryTorrentSpec, create_session};
pub use sidecar::{ByteOffsetMap, SidecarEntry};
pub use store::ResumeStore;
pub use types::{
    EngineAlert, InfoHash, PRIORITY_HIGH, PRIORITY_SKIP, TorrentFileEntry, TorrentSource,
    TorrentStatus,
};

/// Result alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
