//! URL handling module for Corpus Harvester
//!
//! This module provides URL identity (hashing), politeness keys, normalization
//! of discovered URLs and wildcard domain matching.

mod domain;
mod matcher;
mod normalize;

use crate::UrlError;
use sha2::{Digest, Sha256};

// Re-export main functions
pub use domain::{domain_of, host_of, robots_url};
pub use matcher::DomainPattern;
pub use normalize::normalize_url;

/// Computes the stable identity of a URL
///
/// The identity is the lowercase hex SHA-256 digest of the trimmed URL
/// string. It is the primary key of the state store, so it must never change
/// for a given input.
///
/// # Examples
///
/// ```
/// use corpus_harvester::url::url_hash;
///
/// assert_eq!(url_hash("http://a/1"), url_hash(" http://a/1 "));
/// assert_eq!(url_hash("http://a/1").len(), 64);
/// ```
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns the politeness key for a URL string
///
/// # Arguments
///
/// * `url` - An absolute URL
///
/// # Returns
///
/// * `Ok(String)` - Lowercase host, with `:port` for non-default ports
/// * `Err(UrlError)` - The URL could not be parsed or has no host
pub fn domain_key(url: &str) -> Result<String, UrlError> {
    let parsed = ::url::Url::parse(url.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    domain_of(&parsed)
}
