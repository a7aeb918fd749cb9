//! Infohash extraction from magnet URIs.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::DriverError;
use crate::types::InfoHash;

/// Matches the canonical `btih` forms: 40 hex characters or 32 base32.
fn btih_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"btih:([a-fA-F0-9]{40}|[a-zA-Z0-9]{32})").expect("btih pattern compiles")
    })
}

/// Extract the infohash from a magnet URI.
///
/// Hex digests are normalised to lowercase; base32 digests are preserved
/// as written, matching how engines key their on-disk artifacts.
///
/// # Errors
///
/// Returns [`DriverError::MalformedMagnet`] when no `btih` infohash is
/// present.
pub fn infohash_from_magnet(magnet: &str) -> Result<InfoHash, DriverError> {
    let captures = btih_pattern()
        .captures(magnet)
        .ok_or(DriverError::MalformedMagnet)?;
    let digest = &captures[1];
    if digest.len() == 40 {
        Ok(InfoHash::new(digest.to_ascii_lowercase()))
    } else {
        Ok(InfoHash::new(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_forty_hex_digests_lowercased() {
        let magnet = format!("magnet:?xt=urn:btih:{}&dn=shard", "AB12CD34".repeat(5));
        let hash = infohash_from_magnet(&magnet).unwrap();
        assert_eq!(hash.as_str(), "ab12cd34".repeat(5));
    }

    #[test]
    fn extracts_base32_digests_verbatim() {
        let digest = "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
        let magnet = format!("magnet:?xt=urn:btih:{digest}");
        assert_eq!(infohash_from_magnet(&magnet).unwrap().as_str(), digest);
    }

    #[test]
    fn rejects_magnets_without_btih() {
        assert!(matches!(
            infohash_from_magnet("magnet:?dn=no-hash-here"),
            Err(DriverError::MalformedMagnet)
        ));
    }
}
