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

//! Seed management: a reconciliation loop that keeps the live BitTorrent
//! session in step with the catalog's persistent "should be seeding" set,
//! plus the write-side control operations that edit that set.
//!
//! The loop never lets one torrent's failure stop the others: per-torrent
//! errors are logged and the tick continues.

pub mod control;
pub mod error;
pub mod manager;

pub use control::SeedControl;
pub use error::SeederError;
pub use manager::{SeedManager, SeedManagerConfig};
