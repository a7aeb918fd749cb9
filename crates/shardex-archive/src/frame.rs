//! Container-agnostic entry framing over raw piece buffers.
//!
//! Callers hand over a buffer, the absolute offset its first byte occupies
//! in the torrent's logical stream, and the absolute offset at which the
//! embedded payload is known to begin. When the payload starts less than
//! 512 bytes into the buffer's first piece, the caller must have prepended
//! the previous piece so the backward header scan has room; the piece
//! planner guarantees that precondition.

use crate::error::FramingError;
use crate::tar::{self, TAR_HEADER_LEN, TarHeader};
use crate::zip::{self, ZipLocalHeader};

/// Supported shard container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// ZIP archive; entries carry a local file header.
    Zip,
    /// TAR archive; entries carry a 512-byte ustar block.
    Tar,
}

impl ContainerKind {
    /// Infer the container format from an in-torrent file path.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        if path.ends_with(".zip") {
            Some(Self::Zip)
        } else if path.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// The parsed entry header in either format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryHeader {
    /// ZIP local file header.
    Zip(ZipLocalHeader),
    /// TAR ustar header.
    Tar(TarHeader),
}

/// A located and decoded entry header plus its payload geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFrame {
    /// In-buffer index of the header start.
    pub header_pos: usize,
    /// Entry name taken from the header.
    pub name: String,
    /// The decoded header fields.
    pub header: EntryHeader,
}

impl EntryFrame {
    /// Length of the (possibly compressed) payload in bytes.
    #[must_use]
    pub const fn payload_len(&self) -> u64 {
        match &self.header {
            EntryHeader::Zip(header) => header.comp_size as u64,
            EntryHeader::Tar(header) => header.size,
        }
    }

    /// Absolute offset one past the last payload byte.
    #[must_use]
    pub const fn data_end(&self, piece_start: u64) -> u64 {
        match &self.header {
            EntryHeader::Zip(header) => header.end_offset(piece_start, self.header_pos),
            EntryHeader::Tar(header) => header.end_offset(piece_start, self.header_pos),
        }
    }

    /// Absolute offset of the first payload byte.
    #[must_use]
    pub const fn data_start(&self, piece_start: u64) -> u64 {
        self.data_end(piece_start) - self.payload_len()
    }
}

/// Locate and parse the entry header that precedes `payload_offset`.
///
/// # Errors
///
/// Returns [`FramingError::HeaderNotFound`] when no signature precedes the
/// payload in this buffer, plus any parse error from the format decoder.
pub fn frame_entry(
    kind: ContainerKind,
    buf: &[u8],
    piece_start: u64,
    payload_offset: u64,
) -> Result<EntryFrame, FramingError> {
    match kind {
        ContainerKind::Zip => {
            let header_pos = zip::find_header(buf, piece_start, payload_offset).ok_or(
                FramingError::HeaderNotFound {
                    offset: payload_offset,
                },
            )?;
            let header = ZipLocalHeader::parse(buf, header_pos)?;
            let name = zip::file_name(buf, header_pos, &header)?;
            Ok(EntryFrame {
                header_pos,
                name,
                header: EntryHeader::Zip(header),
            })
        }
        ContainerKind::Tar => {
            let header_pos = tar::find_header(buf, piece_start, payload_offset).ok_or(
                FramingError::HeaderNotFound {
                    offset: payload_offset,
                },
            )?;
            let header = TarHeader::parse(buf, header_pos)?;
            let name = header.name.clone();
            Ok(EntryFrame {
                header_pos,
                name,
                header: EntryHeader::Tar(header),
            })
        }
    }
}

/// Decode the payload out of a buffer that spans it completely.
///
/// `buf` must begin at `piece_start`; for the piece path that is the
/// concatenation of pieces `[first ..= last]` in index order.
///
/// # Errors
///
/// Returns [`FramingError::Truncated`] when the buffer ends before the
/// payload does, [`FramingError::UnsupportedCompression`] for unknown ZIP
/// methods, or [`FramingError::Decode`] when inflation fails.
pub fn decode_payload(
    frame: &EntryFrame,
    buf: &[u8],
    piece_start: u64,
) -> Result<Vec<u8>, FramingError> {
    let payload_pos = match &frame.header {
        EntryHeader::Zip(header) => header.payload_pos(frame.header_pos),
        EntryHeader::Tar(_) => frame.header_pos + TAR_HEADER_LEN,
    };
    let payload_len = usize::try_from(frame.payload_len()).map_err(|_| {
        FramingError::Truncated {
            expected: frame.payload_len(),
            available: buf.len() as u64,
        }
    })?;
    let payload_end = payload_pos.saturating_add(payload_len);
    if buf.len() < payload_end {
        return Err(FramingError::Truncated {
            expected: frame.data_end(piece_start) - piece_start,
            available: buf.len() as u64,
        });
    }
    let payload = &buf[payload_pos..payload_end];

    match &frame.header {
        EntryHeader::Zip(header) => zip::decompress(payload, header.method),
        EntryHeader::Tar(_) => Ok(payload.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_inferred_from_extension() {
        assert_eq!(
            ContainerKind::from_path("shards/books_0001.zip"),
            Some(ContainerKind::Zip)
        );
        assert_eq!(
            ContainerKind::from_path("shards/books_0001.tar"),
            Some(ContainerKind::Tar)
        );
        assert_eq!(ContainerKind::from_path("shards/books_0001.rar"), None);
    }

    #[test]
    fn frames_zip_entry_at_buffer_start() {
        let payload = b"hello\n";
        let buf = crate::zip::tests::encode_local_entry("a.txt", &[], 0, payload);
        let frame = frame_entry(ContainerKind::Zip, &buf, 0, 30 + 5).unwrap();
        assert_eq!(frame.header_pos, 0);
        assert_eq!(frame.name, "a.txt");
        assert_eq!(frame.data_start(0), 35);
        assert_eq!(frame.data_end(0), 41);
        assert_eq!(decode_payload(&frame, &buf, 0).unwrap(), payload);
    }

    #[test]
    fn frames_tar_entry_and_copies_payload_verbatim() {
        let mut buf = crate::tar::tests::encode_header("0123456789.txt", 10);
        buf.extend_from_slice(b"0123456789");
        let frame = frame_entry(ContainerKind::Tar, &buf, 0, 512).unwrap();
        assert_eq!(frame.header_pos, 0);
        assert_eq!(frame.name, "0123456789.txt");
        assert_eq!(frame.data_start(0), 512);
        assert_eq!(frame.data_end(0), 522);
        assert_eq!(decode_payload(&frame, &buf, 0).unwrap(), b"0123456789");
    }

    #[test]
    fn zip_extra_field_shifts_the_payload() {
        let payload = b"payload-after-extra";
        let buf = crate::zip::tests::encode_local_entry("x.bin", &[0xCA, 0xFE, 0xBA], 0, payload);
        let payload_offset = (30 + 5 + 3) as u64;
        let frame = frame_entry(ContainerKind::Zip, &buf, 0, payload_offset).unwrap();
        assert_eq!(frame.data_start(0), payload_offset);
        assert_eq!(frame.data_end(0), payload_offset + payload.len() as u64);
        assert_eq!(decode_payload(&frame, &buf, 0).unwrap(), payload);
    }

    #[test]
    fn zero_length_tar_payload_decodes_to_nothing() {
        let buf = crate::tar::tests::encode_header("empty", 0);
        let frame = frame_entry(ContainerKind::Tar, &buf, 0, 512).unwrap();
        assert_eq!(frame.data_start(0), frame.data_end(0));
        assert_eq!(decode_payload(&frame, &buf, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn missing_header_reports_scan_offset() {
        let buf = vec![0_u8; 2048];
        let err = frame_entry(ContainerKind::Zip, &buf, 0, 1024).unwrap_err();
        assert!(matches!(
            err,
            FramingError::HeaderNotFound { offset: 1024 }
        ));
    }

    #[test]
    fn short_buffer_is_truncated_not_panicking() {
        let payload = vec![7_u8; 600];
        let buf = crate::zip::tests::encode_local_entry("big.bin", &[], 0, &payload);
        let frame = frame_entry(ContainerKind::Zip, &buf, 0, 30 + 7).unwrap();
        let err = decode_payload(&frame, &buf[..200], 0).unwrap_err();
        assert!(matches!(err, FramingError::Truncated { .. }));
    }
}
