//! Crawler module for URL discovery, fetching and batch scheduling
//!
//! This module contains the core harvesting logic, including:
//! - Sitemap and start-URL discovery
//! - HTTP fetching with anti-bot and rate-limit detection
//! - The per-URL pipeline and failure classification
//! - Per-source circuit breaking
//! - Batch scheduling with bounded concurrency and deadlines

mod breaker;
mod coordinator;
mod discovery;
mod fetcher;
mod scheduler;
mod worker;

pub use breaker::CircuitBreaker;
pub use coordinator::{run_harvest, Coordinator, Recovery};
pub use discovery::{discover_all, discover_source, parse_sitemap, Sitemap};
pub use fetcher::{build_http_client, FetchedBody, FetchedPage, Fetcher};
pub use scheduler::{Scheduler, SessionPhase, SessionSummary, StopReason};
pub use worker::{UrlOutcome, UrlReport, WorkerContext};
