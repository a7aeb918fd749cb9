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

//! HTTP collaborators: IPFS gateway retrieval and the upstream torrent
//! repository (index JSON plus individual `.torrent` payloads).

pub mod error;
pub mod ipfs;
pub mod upstream;

pub use error::FetchError;
pub use ipfs::IpfsFetcher;
pub use upstream::{TorrentIndexClient, TorrentIndexEntry};

/// Result alias for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;
