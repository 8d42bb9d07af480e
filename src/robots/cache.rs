//! Robots.txt caching
//!
//! A fetched robots.txt is trusted for 24 hours. A fallback produced because
//! the file could not be fetched is re-checked after one hour.

use crate::robots::ParsedRobots;
use chrono::{DateTime, Duration, Utc};

/// Where a cached robots.txt came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsOrigin {
    /// Fetched with a 2xx response
    Fetched,
    /// Not fetchable (missing, server error or network failure); allow-all fallback
    Unavailable(String),
}

/// Cached robots.txt data for a domain
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// The parsed robots.txt content
    pub content: ParsedRobots,

    /// How the content was obtained
    pub origin: RobotsOrigin,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    /// Wraps a successfully fetched robots.txt
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            origin: RobotsOrigin::Fetched,
            fetched_at: Utc::now(),
        }
    }

    /// Builds the permissive fallback used when robots.txt is unavailable
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            content: ParsedRobots::allow_all(),
            origin: RobotsOrigin::Unavailable(reason.into()),
            fetched_at: Utc::now(),
        }
    }

    /// How long this entry may be served before it must be refetched
    pub fn ttl(&self) -> Duration {
        match self.origin {
            RobotsOrigin::Fetched => Duration::hours(24),
            RobotsOrigin::Unavailable(_) => Duration::hours(1),
        }
    }

    /// Checks if the entry has outlived its TTL
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > self.ttl()
    }

    /// Checks if a URL is allowed according to the cached robots.txt
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        self.content.is_allowed(url, user_agent)
    }

    /// Gets the crawl delay in seconds from the cached robots.txt
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        self.content.crawl_delay(user_agent)
    }
}
