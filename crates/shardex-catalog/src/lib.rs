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

//! Persistent catalog of mirrored files: MD5-keyed records, torrent
//! bookkeeping, per-torrent-file completion state, and full-text search.
//!
//! The store is a single SQLite file in WAL mode. List-valued attributes
//! (`server_path`, `language`, `ipfs_cid`) are persisted as `;`-joined
//! strings for schema stability; that form is a storage encoding only and
//! every model boundary decodes it. Descriptions rest zlib-compressed and
//! are inflated lazily when rows are loaded.

pub mod error;
mod files;
pub mod model;
pub mod store;
mod torrents;

pub use error::{CatalogError, Result};
pub use model::{
    FileRecord, OrderBy, SearchQuery, SortDirection, SortKey, TorrentFileRecord, TorrentRecord,
    TorrentUpsert,
};
pub use store::CatalogStore;
