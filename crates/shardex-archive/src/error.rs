//! Error types for container framing.

use thiserror::Error;

/// Errors raised while locating, parsing, or decoding an entry.
#[derive(Debug, Error)]
pub enum FramingError {
    /// No entry header was found scanning backwards from the payload offset.
    #[error("container header not found")]
    HeaderNotFound {
        /// Absolute offset the backward scan started from.
        offset: u64,
    },
    /// The ZIP entry uses a compression method other than stored or deflate.
    #[error("unsupported compression method")]
    UnsupportedCompression {
        /// Raw method code from the local file header.
        method: u16,
    },
    /// The buffer ends before the bytes the header promises.
    #[error("container truncated")]
    Truncated {
        /// Bytes the header requires.
        expected: u64,
        /// Bytes actually available.
        available: u64,
    },
    /// The header bytes violate the container format.
    #[error("malformed container header")]
    MalformedHeader {
        /// Absolute offset of the offending header.
        offset: u64,
        /// Static description of the violation.
        reason: &'static str,
    },
    /// Decompression of the payload failed.
    #[error("payload decode failed")]
    Decode {
        /// Underlying inflate error.
        #[source]
        source: std::io::Error,
    },
}
