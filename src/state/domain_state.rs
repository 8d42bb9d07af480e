use crate::robots::CachedRobots;
use std::time::Duration;
use tokio::time::Instant;

/// Longest robots.txt `Crawl-delay` honoured; larger values are clamped
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(3600);

/// Tracks the politeness state of a domain during a session
///
/// This structure maintains per-domain information needed for request
/// spacing, anti-bot cooldowns and robots.txt caching. It is rebuilt from
/// configuration every process start and never persisted.
#[derive(Debug, Clone)]
pub struct DomainPoliteness {
    /// Minimum spacing from configuration (global default or domain override)
    pub configured_delay: Duration,

    /// Crawl-delay advertised by the domain's robots.txt, if any
    pub crawl_delay: Option<Duration>,

    /// The most recently reserved request slot for this domain
    pub last_request_time: Option<Instant>,

    /// No request may be released before this instant
    pub cooldown_until: Option<Instant>,

    /// Consecutive anti-bot challenges without a clean fetch in between
    pub challenge_streak: u32,

    /// Whether batches touching this domain earn the extended inter-batch pause
    pub extended_pause: bool,

    /// Number of request slots handed out in this process
    pub request_count: u64,

    /// Cached robots.txt data for this domain
    pub robots: Option<CachedRobots>,
}

impl DomainPoliteness {
    /// Creates a new DomainPoliteness with the given configured delay
    pub fn new(configured_delay: Duration) -> Self {
        Self {
            configured_delay,
            crawl_delay: None,
            last_request_time: None,
            cooldown_until: None,
            challenge_streak: 0,
            extended_pause: false,
            request_count: 0,
            robots: None,
        }
    }

    /// The spacing actually enforced: the larger of configuration and robots.txt
    pub fn effective_delay(&self) -> Duration {
        match self.crawl_delay {
            Some(crawl_delay) => self.configured_delay.max(crawl_delay),
            None => self.configured_delay,
        }
    }

    /// Reserves the next request slot for this domain
    ///
    /// The slot is the earliest instant that is not before `now`, is at least
    /// `effective_delay + jitter` after the previous slot, and is not inside
    /// a cooldown window. The slot is recorded immediately, so the caller can
    /// release the lock guarding this state and sleep until the slot.
    ///
    /// # Arguments
    ///
    /// * `now` - The current time instant
    /// * `jitter` - Extra random spacing added on top of the effective delay
    ///
    /// # Returns
    ///
    /// The instant at which the caller may issue its request
    pub fn reserve_slot(&mut self, now: Instant, jitter: Duration) -> Instant {
        let mut slot = now;

        if let Some(last) = self.last_request_time {
            slot = slot.max(last + self.effective_delay() + jitter);
        }

        if let Some(until) = self.cooldown_until {
            slot = slot.max(until);
        }

        self.last_request_time = Some(slot);
        self.request_count += 1;
        slot
    }

    /// Calculates the time until the next request could be released
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let mut ready = now;

        if let Some(last) = self.last_request_time {
            ready = ready.max(last + self.effective_delay());
        }

        if let Some(until) = self.cooldown_until {
            ready = ready.max(until);
        }

        if ready > now {
            Some(ready - now)
        } else {
            None
        }
    }

    /// Returns true if the domain is inside an anti-bot cooldown window
    pub fn is_cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(false, |until| until > now)
    }

    /// Records an anti-bot challenge and returns the new streak length
    pub fn record_challenge(&mut self) -> u32 {
        self.challenge_streak = self.challenge_streak.saturating_add(1);
        self.challenge_streak
    }

    /// Pushes the cooldown window out to `until` (never shortens it)
    pub fn extend_cooldown(&mut self, until: Instant) {
        self.cooldown_until = Some(match self.cooldown_until {
            Some(existing) => existing.max(until),
            None => until,
        });
    }

    /// Clears the challenge streak after a clean fetch
    pub fn clear_challenges(&mut self) {
        self.challenge_streak = 0;
    }

    /// Checks if the robots.txt cache is missing or stale (older than 24 hours)
    pub fn is_robots_stale(&self) -> bool {
        self.robots.as_ref().map_or(true, |robots| robots.is_stale())
    }

    /// Stores freshly fetched robots.txt data and adopts its Crawl-delay
    ///
    /// The delay is capped at [`MAX_CRAWL_DELAY`].
    pub fn update_robots(&mut self, robots: CachedRobots, user_agent: &str) {
        self.crawl_delay = robots
            .crawl_delay(user_agent)
            .filter(|secs| !secs.is_nan() && *secs > 0.0)
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .unwrap_or(MAX_CRAWL_DELAY)
                    .min(MAX_CRAWL_DELAY)
            });
        self.robots = Some(robots);
    }
}
