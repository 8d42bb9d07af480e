//! HTTP fetcher implementation
//!
//! This module handles all document requests for the harvester, including:
//! - Building the HTTP client
//! - Sending requests with the current identity
//! - Detecting anti-bot challenges and rate limiting
//! - Turning responses and transport failures into structured errors

use crate::config::Config;
use crate::extract::ExtractionError;
use crate::politeness::{Identity, PolitenessEngine};
use crate::CrawlError;
use reqwest::header::{HeaderMap, ACCEPT_LANGUAGE, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Maximum number of redirects followed for one request
const MAX_REDIRECTS: usize = 10;

/// Body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedBody {
    Html(String),
    Pdf(Vec<u8>),
}

/// A successfully fetched document
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    /// HTTP status code
    pub status_code: u16,
    /// Content-Type header value
    pub content_type: String,
    pub body: FetchedBody,
}

/// Builds an HTTP client with proper configuration
///
/// The default user agent is the honest crawler identity; rotated
/// identities override it per request.
///
/// # Arguments
///
/// * `config` - The harvester configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.identity_string())
        .timeout(config.politeness.request_timeout())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches documents and reports what it sees back to the politeness engine
pub struct Fetcher {
    client: Client,
    politeness: Arc<PolitenessEngine>,
    challenge_markers: Vec<String>,
}

impl Fetcher {
    pub fn new(client: Client, politeness: Arc<PolitenessEngine>, config: &Config) -> Self {
        Self {
            client,
            politeness,
            challenge_markers: config.politeness.challenge_markers.clone(),
        }
    }

    /// Fetches one document
    ///
    /// # Response Handling
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | Final URL contains a challenge marker | `AntiBot`, domain cooldown |
    /// | HTTP 429 | `HttpStatus`, cooldown honouring Retry-After |
    /// | Other non-2xx | `HttpStatus` |
    /// | 2xx PDF | `FetchedBody::Pdf` |
    /// | 2xx HTML/text (or no Content-Type) | `FetchedBody::Html` |
    /// | 2xx other Content-Type | `Extraction(Unsupported)` |
    /// | Timeout | `Timeout` |
    /// | Connection/transport error | `Network` |
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    /// * `domain` - Politeness key of `url`
    /// * `identity` - Headers to send
    pub async fn fetch(
        &self,
        url: &Url,
        domain: &str,
        identity: &Identity,
    ) -> Result<FetchedPage, CrawlError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, identity.user_agent.as_str())
            .header(ACCEPT_LANGUAGE, identity.accept_language.as_str())
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        let final_url = response.url().to_string();

        if self.is_challenge(&final_url) {
            self.politeness.note_antibot_challenge(domain);
            return Err(CrawlError::AntiBot { url: final_url });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            self.politeness
                .note_rate_limited(domain, retry_after(response.headers()));
            return Err(CrawlError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Err(CrawlError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let body = match classify_content_type(&content_type, url) {
            ContentKind::Pdf => FetchedBody::Pdf(
                response
                    .bytes()
                    .await
                    .map_err(|e| transport_error(url, e))?
                    .to_vec(),
            ),
            ContentKind::Html => {
                FetchedBody::Html(response.text().await.map_err(|e| transport_error(url, e))?)
            }
            ContentKind::Other => {
                return Err(CrawlError::Extraction {
                    url: url.to_string(),
                    source: ExtractionError::Unsupported(content_type),
                })
            }
        };

        self.politeness.note_success(domain);

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        })
    }

    fn is_challenge(&self, final_url: &str) -> bool {
        let lowered = final_url.to_ascii_lowercase();
        self.challenge_markers
            .iter()
            .any(|marker| lowered.contains(&marker.to_ascii_lowercase()))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ContentKind {
    Html,
    Pdf,
    Other,
}

fn classify_content_type(content_type: &str, url: &Url) -> ContentKind {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    match mime {
        "application/pdf" => ContentKind::Pdf,
        "" | "application/octet-stream" if url.path().to_ascii_lowercase().ends_with(".pdf") => {
            ContentKind::Pdf
        }
        "" | "text/html" | "application/xhtml+xml" | "text/plain" => ContentKind::Html,
        _ => ContentKind::Other,
    }
}

/// Parses a delta-seconds `Retry-After` header
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn transport_error(url: &Url, error: reqwest::Error) -> CrawlError {
    if error.is_timeout() {
        CrawlError::Timeout {
            url: url.to_string(),
        }
    } else {
        CrawlError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
