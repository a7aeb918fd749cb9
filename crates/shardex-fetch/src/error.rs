//! Error types for the HTTP fetchers.

use thiserror::Error;

/// Errors raised while talking to gateways or the upstream repository.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote answered with a non-success status.
    #[error("remote returned an error status")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
    },
    /// The HTTP request itself failed (connect, TLS, timeout).
    #[error("http request failed")]
    Http {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// Every configured gateway × CID combination failed.
    #[error("all content sources exhausted")]
    ExhaustedSources {
        /// Number of combinations attempted.
        attempts: usize,
    },
    /// Writing the streamed body to disk failed.
    #[error("staging write failed")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The upstream index payload was not the expected JSON shape.
    #[error("upstream index payload malformed")]
    Decode {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(source: reqwest::Error) -> Self {
        Self::Http { source }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}
