//! Corpus Harvester: a polite, resumable corpus crawler
//!
//! This crate implements the crawl scheduling and state subsystem of a text
//! corpus builder: a durable URL state machine, per-domain politeness,
//! per-source circuit breaking and content-hash deduplication on save.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod politeness;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Corpus Harvester operations
///
/// These are the failures allowed to halt a session: configuration problems,
/// store failures and startup I/O. Per-URL failures are [`CrawlError`]s and
/// never reach this type.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Output error: {0}")]
    Write(#[from] output::WriteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Why a single URL could not be turned into a saved document
///
/// Every stage of the per-URL pipeline reports failure through this type and
/// the worker classifies it exactly once with [`CrawlError::disposition`].
/// HTTP status codes travel as data, never as message text.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("URL disallowed by robots.txt: {url}")]
    RobotsBlocked { url: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Anti-bot challenge at {url}")]
    AntiBot { url: String },

    #[error("Extraction failed for {url}: {source}")]
    Extraction {
        url: String,
        #[source]
        source: extract::ExtractionError,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("Failed to save content: {0}")]
    Write(#[from] output::WriteError),

    #[error("Source {source_name} has too many consecutive failures")]
    SourceUnhealthy { source_name: String },

    #[error("Batch processing timeout")]
    BatchTimeout,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// What a failed URL should become in the state store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Eligible for another claim while attempts remain
    Retryable,
    /// Never claimed again
    Permanent,
    /// Disallowed by robots.txt; terminal and reported separately
    Blocked,
}

impl Disposition {
    /// The status a record in `processing` moves to for this disposition
    pub fn target_status(self) -> state::UrlStatus {
        match self {
            Self::Retryable => state::UrlStatus::Failed,
            Self::Permanent => state::UrlStatus::FailedPermanent,
            Self::Blocked => state::UrlStatus::Blocked,
        }
    }
}

/// HTTP status codes that will not change on retry
const PERMANENT_HTTP_STATUSES: &[u16] = &[403, 404, 410, 451];

impl CrawlError {
    /// Classifies this failure
    ///
    /// | Failure | Disposition |
    /// |---------|-------------|
    /// | robots.txt disallow | Blocked |
    /// | HTTP 403, 404, 410, 451 | Permanent |
    /// | Other HTTP status (5xx, 429, ...) | Retryable |
    /// | Timeout, connection error, anti-bot challenge | Retryable |
    /// | Extraction error flagged permanent (unsupported content) | Permanent |
    /// | Other extraction or validation error | Retryable |
    /// | Unparseable URL, unhealthy source | Permanent |
    /// | Anything unclassified | Retryable |
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::RobotsBlocked { .. } => Disposition::Blocked,
            Self::HttpStatus { status, .. } if PERMANENT_HTTP_STATUSES.contains(status) => {
                Disposition::Permanent
            }
            Self::Extraction { source, .. } if source.is_permanent() => Disposition::Permanent,
            Self::InvalidUrl(_) | Self::SourceUnhealthy { .. } => Disposition::Permanent,
            Self::HttpStatus { .. }
            | Self::Network { .. }
            | Self::Timeout { .. }
            | Self::AntiBot { .. }
            | Self::Extraction { .. }
            | Self::Write(_)
            | Self::BatchTimeout
            | Self::Unexpected(_) => Disposition::Retryable,
        }
    }

    /// Returns the HTTP status code carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for Corpus Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{DomainPoliteness, UrlStatus};
pub use crate::url::{domain_key, normalize_url, url_hash};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractionError;

    fn http(status: u16) -> CrawlError {
        CrawlError::HttpStatus {
            url: "https://example.com/page".to_string(),
            status,
        }
    }

    #[test]
    fn test_not_found_is_permanent() {
        assert_eq!(http(404).disposition(), Disposition::Permanent);
        assert_eq!(
            http(404).disposition().target_status(),
            UrlStatus::FailedPermanent
        );
    }

    #[test]
    fn test_forbidden_and_gone_are_permanent() {
        assert_eq!(http(403).disposition(), Disposition::Permanent);
        assert_eq!(http(410).disposition(), Disposition::Permanent);
        assert_eq!(http(451).disposition(), Disposition::Permanent);
    }

    #[test]
    fn test_server_errors_and_throttling_are_retryable() {
        assert_eq!(http(500).disposition(), Disposition::Retryable);
        assert_eq!(http(503).disposition(), Disposition::Retryable);
        assert_eq!(http(429).disposition(), Disposition::Retryable);
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = CrawlError::Timeout {
            url: "https://example.com/".to_string(),
        };
        assert_eq!(err.disposition(), Disposition::Retryable);
        assert_eq!(err.disposition().target_status(), UrlStatus::Failed);
    }

    #[test]
    fn test_robots_block_is_blocked() {
        let err = CrawlError::RobotsBlocked {
            url: "https://example.com/private".to_string(),
        };
        assert_eq!(err.disposition(), Disposition::Blocked);
        assert_eq!(err.disposition().target_status(), UrlStatus::Blocked);
    }

    #[test]
    fn test_extraction_classification_follows_collaborator() {
        let transient = CrawlError::Extraction {
            url: "https://example.com/".to_string(),
            source: ExtractionError::NoContent,
        };
        assert_eq!(transient.disposition(), Disposition::Retryable);

        let too_short = CrawlError::Extraction {
            url: "https://example.com/".to_string(),
            source: ExtractionError::TooShort {
                words: 3,
                minimum: 50,
            },
        };
        assert_eq!(too_short.disposition(), Disposition::Retryable);

        let unsupported = CrawlError::Extraction {
            url: "https://example.com/doc.pdf".to_string(),
            source: ExtractionError::Unsupported("application/pdf".to_string()),
        };
        assert_eq!(unsupported.disposition(), Disposition::Permanent);
    }

    #[test]
    fn test_unclassified_is_retryable() {
        let err = CrawlError::Unexpected("worker panicked".to_string());
        assert_eq!(err.disposition(), Disposition::Retryable);
        assert_eq!(CrawlError::BatchTimeout.disposition(), Disposition::Retryable);
    }

    #[test]
    fn test_status_code_is_structured() {
        assert_eq!(http(404).status_code(), Some(404));
        assert_eq!(CrawlError::BatchTimeout.status_code(), None);
    }
}
