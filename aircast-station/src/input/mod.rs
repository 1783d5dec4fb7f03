use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

mod download;
mod probe;
mod tools;

pub use download::*;
pub use probe::*;
pub use tools::*;

lazy_static! {
    static ref TRACKING_PARAM_REGEX: Regex =
        Regex::new(r"^(utm_\w+|fbclid|gclid|si|ref|feature)$").unwrap();
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Input is invalid: {0}")]
    Invalid(String),
    #[error("Failed to fetch resource: {0}")]
    FetchError(String),
    #[error("Fetching the resource took too long")]
    Timeout,
    #[error("Failed to parse resource: {0}")]
    ParseError(String),
}

/// Brings a URL into its canonical form: lowercased scheme and host, no
/// fragment, and tracking parameters stripped. Two links to the same
/// resource should normalize identically so their fingerprints collide.
pub fn normalize_url(raw: &str) -> Result<String, InputError> {
    let mut url = Url::parse(raw).map_err(|e| InputError::Invalid(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(InputError::Invalid(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }

    if let Some(host) = url.host_str() {
        let lowered = host.to_lowercase();
        let _ = url.set_host(Some(&lowered));
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAM_REGEX.is_match(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut normalized = url.to_string();

    while normalized.ends_with('/') {
        normalized.pop();
    }

    Ok(normalized)
}

/// The stable content identity of a URL-sourced song.
pub fn fingerprint_url(raw: &str) -> Result<String, InputError> {
    let normalized = normalize_url(raw)?;
    Ok(hex_digest(normalized.as_bytes()))
}

/// The stable content identity of an uploaded song.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    hex_digest(bytes)
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_strips_tracking_junk() {
        let normalized =
            normalize_url("https://Music.Example.com/track/42?utm_source=share&si=abc#t=10")
                .unwrap();

        assert_eq!(normalized, "https://music.example.com/track/42");
    }

    #[test]
    fn test_normalize_keeps_meaningful_query() {
        let normalized = normalize_url("https://video.example.com/watch?v=xyz&utm_medium=social")
            .unwrap();

        assert_eq!(normalized, "https://video.example.com/watch?v=xyz");
    }

    #[test]
    fn test_normalize_rejects_non_http() {
        assert!(normalize_url("ftp://example.com/song.mp3").is_err());
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_equivalent_urls_share_a_fingerprint() {
        let first = fingerprint_url("https://music.example.com/track/42?utm_source=a").unwrap();
        let second = fingerprint_url("https://MUSIC.example.com/track/42/").unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_content_has_distinct_fingerprints() {
        assert_ne!(fingerprint_bytes(b"one"), fingerprint_bytes(b"two"));
    }
}
