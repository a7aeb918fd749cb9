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

//! Byte-offset piece-targeted extraction.
//!
//! Given a catalog record whose `byteoffset` marks where its payload begins
//! inside a torrent's logical data stream, the extractor recovers exactly
//! that payload. It prefers the sidecar-guided fast path (reading straight
//! out of an already-downloaded archive shard), falls back to deriving the
//! shard from torrent metadata, and only then runs piece-level I/O: fetch
//! the leading pieces, frame the entry header out of the raw buffer, fetch
//! the remaining pieces, and decode.

pub mod error;
mod extractor;

pub use error::ExtractError;
pub use extractor::{Extracted, Extractor};

/// Result alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
