//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsOrigin};
pub use parser::ParsedRobots;

use crate::url::robots_url;
use reqwest::Client;
use url::Url;

/// Fetches robots.txt for the server hosting `url`
///
/// Never fails: a missing file, a non-2xx response or a network error all
/// produce the permissive fallback, so an unreachable robots.txt never
/// blocks the crawl.
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `url` - Any URL on the target server
/// * `user_agent` - The user agent string to send
pub async fn fetch_robots(client: &Client, url: &Url, user_agent: &str) -> CachedRobots {
    let robots_location = match robots_url(url) {
        Ok(location) => location,
        Err(e) => return CachedRobots::unavailable(e.to_string()),
    };

    let response = match client
        .get(robots_location.clone())
        .header(reqwest::header::USER_AGENT, user_agent)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("robots.txt unreachable at {}: {}", robots_location, e);
            return CachedRobots::unavailable(e.to_string());
        }
    };

    let status = response.status();
    if !status.is_success() {
        tracing::debug!("robots.txt at {} returned {}", robots_location, status);
        return CachedRobots::unavailable(format!("HTTP {}", status.as_u16()));
    }

    match response.text().await {
        Ok(body) => {
            tracing::debug!("Fetched robots.txt from {}", robots_location);
            CachedRobots::new(ParsedRobots::from_content(&body))
        }
        Err(e) => CachedRobots::unavailable(e.to_string()),
    }
}
