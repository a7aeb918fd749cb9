//! The extractor: sidecar fast path, metadata-derived path, piece-level
//! fallback.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use shardex_archive::{
    ContainerKind, EntryHeader, FramingError, decode_payload, frame_entry, last_piece,
    leading_pieces, zip,
};
use shardex_catalog::{CatalogStore, FileRecord, TorrentRecord};
use shardex_fetch::TorrentIndexClient;
use shardex_torrent::{
    ByteOffsetMap, InfoHash, PRIORITY_HIGH, PRIORITY_SKIP, SidecarEntry, TorrentDriver,
    TorrentSource, infohash_from_magnet,
};

use crate::error::ExtractError;

/// The entry header precedes the payload by at most one TAR block; a ZIP
/// local header plus file name fits comfortably inside the same window.
const HEADER_WINDOW: u64 = 512;

/// A reconstructed payload and the name its container recorded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Entry name from the container header.
    pub filename: String,
    /// Decoded payload bytes.
    pub data: Vec<u8>,
}

/// Extracts single payloads out of archive shards by absolute byte offset.
pub struct Extractor {
    catalog: CatalogStore,
    driver: TorrentDriver,
    upstream: TorrentIndexClient,
}

impl Extractor {
    /// Build an extractor over its collaborators.
    #[must_use]
    pub const fn new(
        catalog: CatalogStore,
        driver: TorrentDriver,
        upstream: TorrentIndexClient,
    ) -> Self {
        Self {
            catalog,
            driver,
            upstream,
        }
    }

    /// Extract the payload a record's `byteoffset` points at.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::PreconditionViolated`] when the record lacks
    /// a byteoffset, torrent reference, or magnet link;
    /// [`ExtractError::TorrentNotFound`] when the torrent row is gone; and
    /// framing, driver, fetch, or I/O errors from the extraction itself.
    pub async fn extract(&self, record: &FileRecord) -> Result<Extracted, ExtractError> {
        let byteoffset = record
            .byteoffset
            .ok_or_else(|| precondition(record, "byteoffset"))?;
        let torrent_id = record
            .torrent_id
            .ok_or_else(|| precondition(record, "torrent_id"))?;
        let torrent = self
            .catalog
            .find_torrent_by_id(torrent_id)
            .await?
            .ok_or(ExtractError::TorrentNotFound { torrent_id })?;
        let magnet = torrent
            .magnet_link
            .as_deref()
            .ok_or_else(|| precondition(record, "magnet_link"))?;
        let hash = infohash_from_magnet(magnet)?;

        // Fast path: the sidecar already knows which shard holds the offset.
        if let Some(entry) = self.sidecar_entry(&hash, byteoffset)
            && let Some(extracted) = self.try_disk(&entry, byteoffset).await?
        {
            debug!(md5 = %record.md5, offset = byteoffset, "sidecar fast path hit");
            return Ok(extracted);
        }

        // Derive the shard from torrent metadata, caching the .torrent and
        // recording the sidecar entry for the next request.
        let hash = self.ensure_torrent(&hash, &torrent, byteoffset).await?;
        let file = self.driver.files_at_offset(&hash, byteoffset).await?;
        let entry = SidecarEntry {
            path: file.path,
            start_offset: file.offset,
        };
        if let Some(extracted) = self.try_disk(&entry, byteoffset).await? {
            return Ok(extracted);
        }

        // Neither the archive nor a prior download is on disk: piece-level.
        info!(
            md5 = %record.md5,
            offset = byteoffset,
            shard = %entry.path,
            "falling back to piece-level extraction"
        );
        self.extract_from_pieces(&hash, &entry, byteoffset).await
    }

    fn downloads_root(&self) -> &Path {
        self.driver.resume_store().downloads_root()
    }

    fn sidecar_entry(&self, hash: &InfoHash, byteoffset: u64) -> Option<SidecarEntry> {
        match ByteOffsetMap::load(self.downloads_root(), hash) {
            Ok(map) => map.and_then(|map| map.get(byteoffset).cloned()),
            Err(err) => {
                debug!(torrent = %hash, error = %err, "ignoring unreadable sidecar");
                None
            }
        }
    }

    /// Make sure the torrent is live in the session with metadata, adding
    /// it from the cached (or freshly fetched) `.torrent` file when needed,
    /// and record the sidecar entry for this offset.
    async fn ensure_torrent(
        &self,
        hash: &InfoHash,
        torrent: &TorrentRecord,
        byteoffset: u64,
    ) -> Result<InfoHash, ExtractError> {
        if matches!(self.driver.has_metadata(hash).await, Ok(true)) {
            self.driver.record_byteoffsets(hash, &[byteoffset]).await?;
            return Ok(hash.clone());
        }

        let store = self.driver.resume_store();
        if !store.has_torrent(hash) {
            let bytes = self.upstream.fetch_torrent(&torrent.path).await?;
            store
                .write_torrent(hash, &bytes)
                .map_err(|source| ExtractError::Io {
                    path: store.torrent_path(hash),
                    source,
                })?;
        }
        let metainfo = store.torrent_path(hash);
        Ok(self
            .driver
            .add(TorrentSource::file(metainfo), &[], &[byteoffset])
            .await?)
    }

    /// Attempt extraction straight from the on-disk archive shard.
    ///
    /// Returns `Ok(None)` when the shard is not (or not yet) on disk, so
    /// the caller can fall back to piece-level I/O.
    async fn try_disk(
        &self,
        entry: &SidecarEntry,
        byteoffset: u64,
    ) -> Result<Option<Extracted>, ExtractError> {
        let kind = ContainerKind::from_path(&entry.path).ok_or_else(|| {
            ExtractError::UnknownContainer {
                path: entry.path.clone(),
            }
        })?;
        let path = self.downloads_root().join(&entry.path);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ExtractError::Io { path, source }),
        };

        // Read the window that ends at the payload: the TAR header is 512
        // bytes exactly, a ZIP local header around a hundred.
        let local_payload = byteoffset.saturating_sub(entry.start_offset);
        let window_local = local_payload.saturating_sub(HEADER_WINDOW);
        let window_abs = entry.start_offset + window_local;
        file.seek(SeekFrom::Start(window_local))
            .await
            .map_err(|source| ExtractError::Io {
                path: path.clone(),
                source,
            })?;
        let mut window = vec![0_u8; usize::try_from(HEADER_WINDOW).unwrap_or(512)];
        let filled = read_up_to(&mut file, &mut window)
            .await
            .map_err(|source| ExtractError::Io {
                path: path.clone(),
                source,
            })?;
        window.truncate(filled);

        let frame = frame_entry(kind, &window, window_abs, byteoffset)?;
        let data_start = frame.data_start(window_abs);
        let data_end = frame.data_end(window_abs);
        let length = usize::try_from(data_end - data_start).map_err(|_| {
            FramingError::Truncated {
                expected: data_end - data_start,
                available: 0,
            }
        })?;

        file.seek(SeekFrom::Start(data_start - entry.start_offset))
            .await
            .map_err(|source| ExtractError::Io {
                path: path.clone(),
                source,
            })?;
        let mut raw = vec![0_u8; length];
        file.read_exact(&mut raw).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::UnexpectedEof {
                ExtractError::Framing(FramingError::Truncated {
                    expected: data_end - data_start,
                    available: 0,
                })
            } else {
                ExtractError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;

        let data = match &frame.header {
            EntryHeader::Zip(header) => zip::decompress(&raw, header.method)?,
            EntryHeader::Tar(_) => raw,
        };
        Ok(Some(Extracted {
            filename: frame.name,
            data,
        }))
    }

    /// Download only the pieces the payload needs and decode it.
    async fn extract_from_pieces(
        &self,
        hash: &InfoHash,
        entry: &SidecarEntry,
        byteoffset: u64,
    ) -> Result<Extracted, ExtractError> {
        let kind = ContainerKind::from_path(&entry.path).ok_or_else(|| {
            ExtractError::UnknownContainer {
                path: entry.path.clone(),
            }
        })?;
        let piece_length = self.driver.piece_length(hash).await?;
        let num_pieces = self.driver.num_pieces(hash).await?;
        let plan = leading_pieces(piece_length, byteoffset, num_pieces);

        // A byte-range job owns the whole priority map: silence every
        // piece, then raise exactly the leading set.
        for piece in 0..num_pieces {
            self.driver.piece_priority(hash, piece, PRIORITY_SKIP).await?;
        }
        for piece in &plan.leading {
            self.driver.piece_priority(hash, *piece, PRIORITY_HIGH).await?;
        }

        let mut buffer = Vec::new();
        for piece in &plan.leading {
            buffer.extend_from_slice(&self.driver.read_piece(hash, *piece).await?);
        }

        let frame = frame_entry(kind, &buffer, plan.piece_start, byteoffset)?;
        let data_end = frame.data_end(plan.piece_start);
        let last = last_piece(piece_length, data_end);
        debug!(
            torrent = %hash,
            header_pos = frame.header_pos,
            data_end,
            last_piece = last,
            "entry framed from leading pieces"
        );

        // Promote and collect the tail, in index order.
        let tail_start = plan.leading.last().copied().unwrap_or(plan.first_piece) + 1;
        for piece in tail_start..=last {
            self.driver.piece_priority(hash, piece, PRIORITY_HIGH).await?;
        }
        for piece in tail_start..=last {
            buffer.extend_from_slice(&self.driver.read_piece(hash, piece).await?);
        }

        let data = decode_payload(&frame, &buffer, plan.piece_start)?;
        Ok(Extracted {
            filename: frame.name,
            data,
        })
    }
}

async fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn precondition(record: &FileRecord, missing: &'static str) -> ExtractError {
    ExtractError::PreconditionViolated {
        md5: record.md5.clone(),
        missing,
    }
}
