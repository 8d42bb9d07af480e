//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `UrlStatus`: Lifecycle status of every discovered URL (pending, processing, completed, etc.)
//! - `DomainPoliteness`: Per-domain pacing, cooldown and robots.txt state

mod domain_state;
mod url_status;

// Re-export main types
pub use domain_state::DomainPoliteness;
pub use url_status::UrlStatus;
