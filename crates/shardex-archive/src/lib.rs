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

//! Single-entry container framing and piece arithmetic for archive shards.
//!
//! Shards distributed over BitTorrent pack many files into one large ZIP or
//! TAR archive. Given the absolute offset at which an embedded file's
//! *payload* begins, this crate locates the entry header that precedes it in
//! a raw piece buffer, computes the payload boundaries, and decodes the
//! payload bytes. It deliberately handles only the one-entry subset needed
//! for that job; it is not a general archive library.

pub mod error;
pub mod frame;
pub mod plan;
pub mod tar;
pub mod zip;

pub use error::FramingError;
pub use frame::{ContainerKind, EntryFrame, EntryHeader, decode_payload, frame_entry};
pub use plan::{PiecePlan, last_piece, leading_pieces};
pub use tar::{TAR_HEADER_LEN, TarHeader};
pub use zip::{ZIP_HEADER_LEN, ZipLocalHeader};

/// Result alias for framing operations.
pub type Result<T> = std::result::Result<T, FramingError>;
