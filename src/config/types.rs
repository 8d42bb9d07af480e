use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Corpus Harvester
///
/// Loaded once at startup, wrapped in an `Arc` and handed to every
/// component constructor.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(rename = "circuit-breaker", default)]
    pub circuit_breaker: CircuitBreakerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Looks up a source by its logical name
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Session and batch behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of records claimed per batch
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of URLs processed concurrently
    #[serde(rename = "num-threads", default = "default_num_threads")]
    pub num_threads: usize,

    /// Wall-clock budget of a `run` session (seconds)
    #[serde(rename = "max-duration-secs", default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// Stop once this many new documents have been saved
    #[serde(rename = "target-documents", default)]
    pub target_documents: Option<u64>,

    /// A failed record is reclaimed while its attempts stay below this value
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Processing budget of a single URL, politeness wait excluded (seconds)
    #[serde(rename = "url-timeout-secs", default = "default_url_timeout_secs")]
    pub url_timeout_secs: u64,

    /// Overall budget of one batch (seconds)
    #[serde(rename = "batch-timeout-secs", default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// How long in-flight work may drain after the session budget ends (seconds)
    #[serde(rename = "grace-timeout-secs", default = "default_grace_timeout_secs")]
    pub grace_timeout_secs: u64,

    /// Consecutive empty claims before the session ends
    #[serde(rename = "empty-poll-limit", default = "default_empty_poll_limit")]
    pub empty_poll_limit: u32,

    /// Pause after an empty claim (milliseconds)
    #[serde(rename = "empty-poll-pause-ms", default = "default_empty_poll_pause_ms")]
    pub empty_poll_pause_ms: u64,

    /// Pause between batches (milliseconds)
    #[serde(rename = "batch-pause-ms", default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Lower bound of the pause after a batch touching an extended-pause domain (seconds)
    #[serde(rename = "extended-pause-min-secs", default = "default_extended_pause_min_secs")]
    pub extended_pause_min_secs: u64,

    /// Upper bound of the pause after a batch touching an extended-pause domain (seconds)
    #[serde(rename = "extended-pause-max-secs", default = "default_extended_pause_max_secs")]
    pub extended_pause_max_secs: u64,
}

impl CrawlerConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn url_timeout(&self) -> Duration {
        Duration::from_secs(self.url_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.grace_timeout_secs)
    }

    pub fn empty_poll_pause(&self) -> Duration {
        Duration::from_millis(self.empty_poll_pause_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            num_threads: default_num_threads(),
            max_duration_secs: default_max_duration_secs(),
            target_documents: None,
            max_attempts: default_max_attempts(),
            url_timeout_secs: default_url_timeout_secs(),
            batch_timeout_secs: default_batch_timeout_secs(),
            grace_timeout_secs: default_grace_timeout_secs(),
            empty_poll_limit: default_empty_poll_limit(),
            empty_poll_pause_ms: default_empty_poll_pause_ms(),
            batch_pause_ms: default_batch_pause_ms(),
            extended_pause_min_secs: default_extended_pause_min_secs(),
            extended_pause_max_secs: default_extended_pause_max_secs(),
        }
    }
}

/// Per-domain request pacing and anti-bot posture
#[derive(Debug, Clone, Deserialize)]
pub struct PolitenessConfig {
    /// Default minimum spacing between requests to one domain (milliseconds)
    #[serde(rename = "request-delay-ms", default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Upper bound of the random extra spacing added to every request (milliseconds)
    #[serde(rename = "jitter-ms", default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// HTTP request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Consult robots.txt before every fetch
    #[serde(rename = "respect-robots", default = "default_true")]
    pub respect_robots: bool,

    /// Rotate the outgoing browser identity
    #[serde(rename = "rotate-user-agents", default)]
    pub rotate_user_agents: bool,

    /// Probability of switching identity before a request
    #[serde(rename = "rotate-probability", default = "default_rotate_probability")]
    pub rotate_probability: f64,

    /// Base cooldown after an anti-bot challenge (seconds)
    #[serde(rename = "antibot-cooldown-secs", default = "default_antibot_cooldown_secs")]
    pub antibot_cooldown_secs: u64,

    /// Upper bound of the random extra cooldown (seconds)
    #[serde(rename = "antibot-jitter-secs", default = "default_antibot_jitter_secs")]
    pub antibot_jitter_secs: u64,

    /// Cooldowns never exceed this value (seconds)
    #[serde(rename = "antibot-cooldown-cap-secs", default = "default_antibot_cooldown_cap_secs")]
    pub antibot_cooldown_cap_secs: u64,

    /// Substrings of a final (post-redirect) URL that indicate a challenge page
    #[serde(rename = "challenge-markers", default = "default_challenge_markers")]
    pub challenge_markers: Vec<String>,

    /// Per-domain overrides
    #[serde(rename = "domain", default)]
    pub domains: Vec<DomainPolitenessEntry>,
}

impl PolitenessConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            respect_robots: true,
            rotate_user_agents: false,
            rotate_probability: default_rotate_probability(),
            antibot_cooldown_secs: default_antibot_cooldown_secs(),
            antibot_jitter_secs: default_antibot_jitter_secs(),
            antibot_cooldown_cap_secs: default_antibot_cooldown_cap_secs(),
            challenge_markers: default_challenge_markers(),
            domains: Vec::new(),
        }
    }
}

/// Politeness override for domains matching a pattern
#[derive(Debug, Clone, Deserialize)]
pub struct DomainPolitenessEntry {
    /// Domain pattern (e.g., "example.com" or "*.example.com")
    pub pattern: String,

    /// Minimum spacing for matching domains (milliseconds)
    #[serde(rename = "min-delay-ms", default)]
    pub min_delay_ms: Option<u64>,

    /// Batches touching this domain are followed by the extended pause
    #[serde(rename = "extended-pause", default)]
    pub extended_pause: bool,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also the robots.txt product token
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,

    /// Alternative agent strings used when identity rotation is enabled
    #[serde(rename = "rotation-pool", default)]
    pub rotation_pool: Vec<String>,
}

impl UserAgentConfig {
    /// Formats the honest crawler identity
    ///
    /// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn identity_string(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures after which a source is excluded
    #[serde(rename = "failure-threshold", default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Where state and output live
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite state database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory receiving one text file per unique document
    #[serde(rename = "output-dir")]
    pub output_dir: String,
}

/// Extraction collaborator settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Documents with fewer words fail validation
    #[serde(rename = "min-word-count", default = "default_min_word_count")]
    pub min_word_count: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_word_count: default_min_word_count(),
        }
    }
}

/// How extracted text is normalized before hashing and saving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextNormalization {
    /// Trim lines, collapse inner whitespace runs and blank-line runs
    #[default]
    CollapseWhitespace,
    /// Keep line structure; only trim trailing whitespace and outer blank lines
    PreserveLines,
}

/// A logical source of documents
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Logical source name; also the output subdirectory and file prefix
    pub name: String,

    /// Home page of the source
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// URLs added to the state store on discovery
    #[serde(rename = "start-urls", default)]
    pub start_urls: Vec<String>,

    /// Sitemap (or sitemap index) listing the source's documents
    #[serde(rename = "sitemap-url", default)]
    pub sitemap_url: Option<String>,

    /// Politeness override for the source's domain (milliseconds)
    #[serde(rename = "min-delay-ms", default)]
    pub min_delay_ms: Option<u64>,

    /// CSS selectors tried first, in order, when extracting text
    #[serde(rename = "content-selectors", default)]
    pub content_selectors: Vec<String>,

    /// Text normalization policy for this source
    #[serde(default)]
    pub normalization: TextNormalization,
}

fn default_batch_size() -> usize {
    50
}

fn default_num_threads() -> usize {
    16
}

fn default_max_duration_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_url_timeout_secs() -> u64 {
    120
}

fn default_batch_timeout_secs() -> u64 {
    300
}

fn default_grace_timeout_secs() -> u64 {
    30
}

fn default_empty_poll_limit() -> u32 {
    5
}

fn default_empty_poll_pause_ms() -> u64 {
    5000
}

fn default_batch_pause_ms() -> u64 {
    3000
}

fn default_extended_pause_min_secs() -> u64 {
    120
}

fn default_extended_pause_max_secs() -> u64 {
    180
}

fn default_request_delay_ms() -> u64 {
    2000
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_rotate_probability() -> f64 {
    0.1
}

fn default_antibot_cooldown_secs() -> u64 {
    300
}

fn default_antibot_jitter_secs() -> u64 {
    180
}

fn default_antibot_cooldown_cap_secs() -> u64 {
    600
}

fn default_challenge_markers() -> Vec<String> {
    vec!["/captcha".to_string()]
}

fn default_failure_threshold() -> u32 {
    10
}

fn default_min_word_count() -> usize {
    50
}
