//! Politeness engine
//!
//! Owns all per-domain pacing state: cached robots.txt rules, request
//! spacing, anti-bot cooldowns and the outgoing identity. Every worker calls
//! [`PolitenessEngine::await_turn`] before touching the network.
//!
//! The domain map is guarded by a plain mutex that is only held for
//! bookkeeping; robots.txt fetches and the turn sleep happen after the guard
//! is dropped.

mod identity;

pub use identity::Identity;

use crate::config::{Config, DomainPolitenessEntry};
use crate::robots::fetch_robots;
use crate::state::DomainPoliteness;
use crate::url::{domain_key, domain_of, DomainPattern};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Per-domain request pacing shared by all workers
pub struct PolitenessEngine {
    config: Arc<Config>,
    client: Client,
    domains: Mutex<HashMap<String, DomainPoliteness>>,
    source_delays: HashMap<String, Duration>,
    overrides: Vec<(DomainPattern, DomainPolitenessEntry)>,
    identity: Mutex<Identity>,
}

impl PolitenessEngine {
    /// Creates an engine for the given configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Shared harvester configuration
    /// * `client` - HTTP client used for robots.txt fetches
    pub fn new(config: Arc<Config>, client: Client) -> Self {
        let mut source_delays = HashMap::new();
        for source in &config.sources {
            let Some(min_delay_ms) = source.min_delay_ms else {
                continue;
            };
            let urls = std::iter::once(&source.base_url).chain(source.start_urls.iter());
            for url in urls {
                if let Ok(domain) = domain_key(url) {
                    source_delays.insert(domain, Duration::from_millis(min_delay_ms));
                }
            }
        }

        let overrides = config
            .politeness
            .domains
            .iter()
            .map(|entry| (DomainPattern::parse(&entry.pattern), entry.clone()))
            .collect();

        let identity = Identity::honest(&config.user_agent);

        Self {
            config,
            client,
            domains: Mutex::new(HashMap::new()),
            source_delays,
            overrides,
            identity: Mutex::new(identity),
        }
    }

    fn domains(&self) -> MutexGuard<'_, HashMap<String, DomainPoliteness>> {
        // The map holds plain bookkeeping that stays consistent even if a
        // holder panicked
        self.domains.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most specific `[[politeness.domain]]` entry matching a domain key
    fn domain_override(&self, domain: &str) -> Option<&DomainPolitenessEntry> {
        let host = strip_port(domain);
        self.overrides
            .iter()
            .filter(|(pattern, _)| pattern.matches(host))
            .max_by_key(|(pattern, _)| pattern.specificity())
            .map(|(_, entry)| entry)
    }

    /// Minimum spacing for a domain before robots.txt is considered
    ///
    /// Precedence: the owning source's `min-delay-ms`, then the most
    /// specific domain override, then the global `request-delay-ms`.
    pub fn configured_delay(&self, domain: &str) -> Duration {
        if let Some(delay) = self.source_delays.get(domain) {
            return *delay;
        }

        self.domain_override(domain)
            .and_then(|entry| entry.min_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.politeness.request_delay())
    }

    fn with_domain<R>(&self, domain: &str, f: impl FnOnce(&mut DomainPoliteness) -> R) -> R {
        let mut domains = self.domains();
        let state = domains.entry(domain.to_string()).or_insert_with(|| {
            let mut state = DomainPoliteness::new(self.configured_delay(domain));
            state.extended_pause = self
                .domain_override(domain)
                .map_or(false, |entry| entry.extended_pause);
            state
        });
        f(state)
    }

    /// Checks robots.txt for `url` on behalf of `agent`
    ///
    /// Rules are cached per domain and refreshed when stale. An unreachable
    /// or missing robots.txt allows everything.
    pub async fn can_fetch(&self, url: &Url, agent: &str) -> bool {
        if !self.config.politeness.respect_robots {
            return true;
        }

        let domain = match domain_of(url) {
            Ok(domain) => domain,
            Err(_) => return true,
        };

        let cached = self.with_domain(&domain, |state| {
            if state.is_robots_stale() {
                None
            } else {
                state.robots.as_ref().map(|r| r.is_allowed(url.as_str(), agent))
            }
        });
        if let Some(allowed) = cached {
            return allowed;
        }

        let user_agent = self.current_identity().user_agent;
        let robots = fetch_robots(&self.client, url, &user_agent).await;
        let allowed = robots.is_allowed(url.as_str(), agent);

        self.with_domain(&domain, |state| {
            state.update_robots(robots, agent);
            if let Some(crawl_delay) = state.crawl_delay {
                tracing::debug!("{} advertises Crawl-delay {:?}", domain, crawl_delay);
            }
        });

        allowed
    }

    /// Waits until the next request to `domain` may be released
    ///
    /// Slots are reserved under the lock and slept on outside it, so
    /// concurrent callers for one domain are spaced by at least the
    /// effective delay plus a random jitter, and never released inside a
    /// cooldown window.
    ///
    /// # Returns
    ///
    /// How long the caller waited
    pub async fn await_turn(&self, domain: &str) -> Duration {
        let jitter = self.jitter();
        let now = Instant::now();
        let slot = self.with_domain(domain, |state| state.reserve_slot(now, jitter));

        let wait = slot.saturating_duration_since(now);
        if !wait.is_zero() {
            tracing::trace!("Waiting {:?} for {}", wait, domain);
            tokio::time::sleep_until(slot).await;
        }
        wait
    }

    fn jitter(&self) -> Duration {
        match self.config.politeness.jitter_ms {
            0 => Duration::ZERO,
            max => Duration::from_millis(fastrand::u64(0..=max)),
        }
    }

    /// Records an anti-bot challenge and starts a cooldown
    ///
    /// The cooldown doubles with each consecutive challenge, gets a random
    /// jitter, and is capped at `antibot-cooldown-cap-secs`.
    ///
    /// # Returns
    ///
    /// The length of the cooldown that was applied
    pub fn note_antibot_challenge(&self, domain: &str) -> Duration {
        let politeness = &self.config.politeness;
        let jitter_secs = match politeness.antibot_jitter_secs {
            0 => 0,
            max => fastrand::u64(0..=max),
        };

        let (streak, cooldown) = self.with_domain(domain, |state| {
            let streak = state.record_challenge();
            let cooldown = antibot_cooldown(
                politeness.antibot_cooldown_secs,
                streak,
                jitter_secs,
                politeness.antibot_cooldown_cap_secs,
            );
            state.extend_cooldown(Instant::now() + cooldown);
            (streak, cooldown)
        });

        tracing::warn!(
            "Anti-bot challenge #{} from {}; cooling down for {:?}",
            streak,
            domain,
            cooldown
        );
        cooldown
    }

    /// Starts a cooldown after an HTTP 429
    ///
    /// Honours `Retry-After` when the server sent one, otherwise uses the
    /// base anti-bot cooldown. Always capped.
    pub fn note_rate_limited(&self, domain: &str, retry_after: Option<Duration>) -> Duration {
        let politeness = &self.config.politeness;
        let cap = Duration::from_secs(politeness.antibot_cooldown_cap_secs);
        let cooldown = retry_after
            .unwrap_or_else(|| Duration::from_secs(politeness.antibot_cooldown_secs))
            .min(cap);

        self.with_domain(domain, |state| {
            state.extend_cooldown(Instant::now() + cooldown)
        });

        tracing::warn!("Rate limited by {}; cooling down for {:?}", domain, cooldown);
        cooldown
    }

    /// Records a clean fetch, ending any challenge streak
    pub fn note_success(&self, domain: &str) {
        self.with_domain(domain, |state| state.clear_challenges());
    }

    /// Possibly switches the outgoing identity
    ///
    /// With rotation disabled the honest crawler identity is always used.
    /// Otherwise the identity changes with probability `rotate-probability`.
    ///
    /// # Returns
    ///
    /// The identity to use for the next request
    pub fn rotate_identity(&self) -> Identity {
        let politeness = &self.config.politeness;
        let mut identity = self.identity.lock().unwrap_or_else(PoisonError::into_inner);

        if politeness.rotate_user_agents && fastrand::f64() < politeness.rotate_probability {
            *identity = Identity::random(&self.config.user_agent.rotation_pool);
            tracing::debug!("Rotated identity to {}", identity.user_agent);
        }

        identity.clone()
    }

    /// The identity currently in use
    pub fn current_identity(&self) -> Identity {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether batches touching `domain` must be followed by the extended pause
    pub fn requires_extended_pause(&self, domain: &str) -> bool {
        self.domain_override(domain)
            .map_or(false, |entry| entry.extended_pause)
    }

    /// Returns a copy of the state tracked for `domain`, if any
    pub fn domain_state(&self, domain: &str) -> Option<DomainPoliteness> {
        self.domains().get(domain).cloned()
    }
}

/// `base * 2^(streak-1) + jitter`, capped
fn antibot_cooldown(base_secs: u64, streak: u32, jitter_secs: u64, cap_secs: u64) -> Duration {
    let factor = 1u64 << streak.saturating_sub(1).min(16);
    let secs = base_secs
        .saturating_mul(factor)
        .saturating_add(jitter_secs)
        .min(cap_secs);
    Duration::from_secs(secs)
}

/// Drops a trailing `:port` from a domain key
fn strip_port(domain: &str) -> &str {
    if domain.ends_with(']') {
        return domain;
    }
    match domain.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => domain,
    }
}
