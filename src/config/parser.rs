use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Command-line overrides applied on top of the `[crawler]` section
#[derive(Debug, Clone, Default)]
pub struct CrawlerOverrides {
    pub batch_size: Option<usize>,
    pub max_duration_secs: Option<u64>,
    pub num_threads: Option<usize>,
}

impl CrawlerOverrides {
    /// Returns true if no override is set
    pub fn is_empty(&self) -> bool {
        self.batch_size.is_none() && self.max_duration_secs.is_none() && self.num_threads.is_none()
    }
}

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use corpus_harvester::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Batch size: {}", config.crawler.batch_size);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of configuration text
///
/// Stored on every session record so `status` can tell which configuration
/// produced which session.
pub fn compute_config_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loads a configuration and returns both the config and its hash
///
/// The file is read once, so the hash always describes the text that was parsed.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, compute_config_hash(&content)))
}

/// Applies command-line overrides and re-validates the result
pub fn apply_overrides(mut config: Config, overrides: &CrawlerOverrides) -> Result<Config, ConfigError> {
    if overrides.is_empty() {
        return Ok(config);
    }

    if let Some(batch_size) = overrides.batch_size {
        config.crawler.batch_size = batch_size;
    }
    if let Some(max_duration_secs) = overrides.max_duration_secs {
        config.crawler.max_duration_secs = max_duration_secs;
    }
    if let Some(num_threads) = overrides.num_threads {
        config.crawler.num_threads = num_threads;
    }

    validate(&config)?;
    Ok(config)
}
