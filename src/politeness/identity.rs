//! Outgoing request identity (user agent plus language headers)

use crate::config::UserAgentConfig;

/// Desktop browser agents used when rotation is on and no pool is configured
const BROWSER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "es-ES,es;q=0.9,en;q=0.8",
    "es-MX,es;q=0.9,en;q=0.8",
    "en-US,en;q=0.9,es;q=0.8",
];

/// The header set sent with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub accept_language: String,
}

impl Identity {
    /// The honest crawler identity built from configuration
    pub fn honest(config: &UserAgentConfig) -> Self {
        Self {
            user_agent: config.identity_string(),
            accept_language: ACCEPT_LANGUAGES[0].to_string(),
        }
    }

    /// Draws a random identity from `pool`, or from the built-in browser
    /// agents when the pool is empty
    pub fn random(pool: &[String]) -> Self {
        let user_agent = if pool.is_empty() {
            BROWSER_AGENTS[fastrand::usize(..BROWSER_AGENTS.len())].to_string()
        } else {
            pool[fastrand::usize(..pool.len())].clone()
        };

        Self {
            user_agent,
            accept_language: ACCEPT_LANGUAGES[fastrand::usize(..ACCEPT_LANGUAGES.len())]
                .to_string(),
        }
    }
}
