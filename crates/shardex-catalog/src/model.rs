//! Catalog record models and their storage encodings.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::CatalogError;

/// Separator used by the `;`-joined storage encoding of list attributes.
const LIST_SEPARATOR: char = ';';

/// One catalog entry, identified by its MD5 digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRecord {
    /// Rowid once persisted.
    pub id: Option<i64>,
    /// Content digest; 32 lowercase hex characters, unique in the catalog.
    pub md5: String,
    /// Display title.
    pub title: Option<String>,
    /// Author line.
    pub author: Option<String>,
    /// Publication year as reported upstream.
    pub year: Option<String>,
    /// File extension, always present.
    pub extension: String,
    /// Candidate paths inside archive shards, in upstream order.
    pub server_paths: Vec<String>,
    /// Long-form description; zlib-compressed at rest.
    pub description: Option<String>,
    /// Cover image URL.
    pub cover_url: Option<String>,
    /// ISO-like language tokens.
    pub languages: Vec<String>,
    /// IPFS CIDs the payload is retrievable under.
    pub ipfs_cids: Vec<String>,
    /// Referenced torrent row, when the file is mirrored in a torrent.
    pub torrent_id: Option<i64>,
    /// Absolute payload offset within the torrent's logical data stream.
    pub byteoffset: Option<u64>,
    /// Whether the record describes a journal article.
    pub is_journal: bool,
    /// Upstream torrent filename, joined in on load.
    pub torrent_path: Option<String>,
    /// Magnet URI of the referenced torrent, joined in on load.
    pub magnet_link: Option<String>,
    /// Completion state of the matching torrent-file row, when one exists.
    pub is_complete: Option<bool>,
}

impl FileRecord {
    /// Whether the record can be retrieved at all (torrent or IPFS).
    #[must_use]
    pub fn is_downloadable(&self) -> bool {
        self.torrent_id.is_some() || self.torrent_path.is_some() || !self.ipfs_cids.is_empty()
    }

    /// Synthetic text the full-text index is built over.
    #[must_use]
    pub fn fts_text(&self) -> String {
        let mut text = String::new();
        for part in [self.title.as_deref(), self.author.as_deref()] {
            if let Some(part) = part {
                text.push_str(part);
                text.push(' ');
            }
        }
        if let Some(year) = self.year.as_deref() {
            text.push_str("year:");
            text.push_str(year);
            text.push(' ');
        }
        text.push_str("ext:");
        text.push_str(&self.extension);
        if let Some(description) = self.description.as_deref() {
            text.push(' ');
            text.push_str(description);
        }
        for language in &self.languages {
            text.push_str(" lang:");
            text.push_str(language);
        }
        text
    }
}

/// Upstream torrent bookkeeping row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrentRecord {
    /// Internal rowid.
    pub id: i64,
    /// Upstream torrent filename; the natural key.
    pub path: String,
    /// Magnet URI, when the upstream list carries one.
    pub magnet_link: Option<String>,
    /// Opaque upstream timestamp.
    pub added_to_torrents_list_at: Option<String>,
    /// Total payload size in bytes.
    pub data_size: Option<i64>,
    /// Number of files in the torrent.
    pub num_files: Option<i64>,
    /// Upstream obsolete marker.
    pub obsolete: Option<bool>,
    /// Upstream embargo marker.
    pub embargo: Option<bool>,
    /// Whether the seed manager should keep this torrent live.
    pub is_seeding: bool,
    /// Seed the whole torrent instead of the targeted file set.
    pub is_seed_all: bool,
    /// Targeted file rows; populated by [`crate::CatalogStore::list_seeding`]
    /// for torrents that are not in seed-all mode.
    pub files: Vec<TorrentFileRecord>,
}

/// Upsert payload for the upstream torrent list import.
///
/// Operational flags (`is_seeding`, `is_seed_all`) are deliberately absent:
/// the upstream list never touches them.
#[derive(Debug, Clone, Default)]
pub struct TorrentUpsert {
    /// Upstream torrent filename; the natural key.
    pub path: String,
    /// Magnet URI.
    pub magnet_link: Option<String>,
    /// Opaque upstream timestamp.
    pub added_to_torrents_list_at: Option<String>,
    /// Total payload size in bytes.
    pub data_size: Option<i64>,
    /// Number of files in the torrent.
    pub num_files: Option<i64>,
    /// Upstream obsolete marker.
    pub obsolete: Option<bool>,
    /// Upstream embargo marker.
    pub embargo: Option<bool>,
}

/// A file selected for targeted seeding, and its completion state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrentFileRecord {
    /// Internal rowid.
    pub id: i64,
    /// Owning torrent row.
    pub torrent_id: i64,
    /// Catalog file this row seeds; unique across the table.
    pub file_id: i64,
    /// Basename of the file inside the torrent.
    pub filename: String,
    /// Whether the payload finished downloading; flips forward only.
    pub is_complete: bool,
    /// Path under the downloads root once complete.
    pub local_path: Option<String>,
}

/// Sort key accepted by [`SearchQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Full-text match rank; dropped when no query text is present.
    Rank,
    /// Publication year.
    Year,
    /// Title.
    Title,
}

/// Sort direction accepted by [`SearchQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

impl SortDirection {
    pub(crate) const fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Requested result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    /// Column or rank to sort on.
    pub key: SortKey,
    /// Sort direction.
    pub direction: SortDirection,
}

/// Parameters of one catalog search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Full-text query; `None` skips the FTS join entirely.
    pub text: Option<String>,
    /// Restrict to records tagged with this language code.
    pub language: Option<String>,
    /// Restrict to this publication year.
    pub year: Option<String>,
    /// Restrict to files mirrored by this torrent.
    pub torrent_id: Option<i64>,
    /// Only return records with a torrent-file row (locally tracked).
    pub local_only: bool,
    /// Result ordering; unranked rows sort first when present.
    pub order_by: Option<OrderBy>,
    /// Page size.
    pub limit: i64,
    /// Page offset.
    pub offset: i64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: None,
            language: None,
            year: None,
            torrent_id: None,
            local_only: false,
            order_by: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Join a list attribute into its `;`-separated storage form.
///
/// Empty lists persist as NULL so legacy rows and fresh rows agree.
#[must_use]
pub(crate) fn encode_list(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(&LIST_SEPARATOR.to_string()))
    }
}

/// Split a `;`-separated storage value back into a list, dropping empties.
#[must_use]
pub(crate) fn decode_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|joined| {
            joined
                .split(LIST_SEPARATOR)
                .filter(|part| !part.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Compress a description for storage.
pub(crate) fn compress_description(description: &str) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing a string slice into a Vec-backed encoder cannot fail.
    let _ = encoder.write_all(description.as_bytes());
    encoder.finish().unwrap_or_default()
}

/// Inflate a stored description.
///
/// # Errors
///
/// Returns [`CatalogError::Codec`] when the blob is not a valid zlib stream
/// of UTF-8 text.
pub(crate) fn decompress_description(blob: &[u8]) -> Result<String, CatalogError> {
    let mut text = String::new();
    ZlibDecoder::new(blob)
        .read_to_string(&mut text)
        .map_err(|_| CatalogError::Codec {
            field: "description_compressed",
        })?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_codec_round_trips() {
        let values = vec!["a/b.zip".to_owned(), "c/d.zip".to_owned()];
        let encoded = encode_list(&values).unwrap();
        assert_eq!(encoded, "a/b.zip;c/d.zip");
        assert_eq!(decode_list(Some(&encoded)), values);
        assert_eq!(encode_list(&[]), None);
        assert!(decode_list(None).is_empty());
        assert!(decode_list(Some("")).is_empty());
    }

    #[test]
    fn description_survives_zlib_round_trip() {
        let text = "Описание with mixed scripts and punctuation: §± — etc.";
        let blob = compress_description(text);
        assert_eq!(decompress_description(&blob).unwrap(), text);
    }

    #[test]
    fn garbage_description_blob_is_a_codec_error() {
        assert!(matches!(
            decompress_description(&[0xde, 0xad, 0xbe, 0xef]),
            Err(CatalogError::Codec { .. })
        ));
    }

    #[test]
    fn fts_text_carries_tagged_tokens() {
        let record = FileRecord {
            md5: "a".repeat(32),
            title: Some("Systems Programming".to_owned()),
            author: Some("A. Writer".to_owned()),
            year: Some("1999".to_owned()),
            extension: "pdf".to_owned(),
            description: Some("low level details".to_owned()),
            languages: vec!["en".to_owned(), "de".to_owned()],
            ..FileRecord::default()
        };
        let text = record.fts_text();
        assert!(text.contains("Systems Programming"));
        assert!(text.contains("year:1999"));
        assert!(text.contains("ext:pdf"));
        assert!(text.contains("lang:en"));
        assert!(text.contains("lang:de"));
    }

    #[test]
    fn downloadable_requires_a_source() {
        let mut record = FileRecord {
            md5: "b".repeat(32),
            extension: "epub".to_owned(),
            ..FileRecord::default()
        };
        assert!(!record.is_downloadable());
        record.ipfs_cids = vec!["bafkexample".to_owned()];
        assert!(record.is_downloadable());
        record.ipfs_cids.clear();
        record.torrent_id = Some(7);
        assert!(record.is_downloadable());
    }
}
