use crate::config::types::{
    Config, CrawlerConfig, PolitenessConfig, SourceConfig, StorageConfig, UserAgentConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_politeness_config(&config.politeness)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;

    if config.circuit_breaker.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 || config.batch_size > 10_000 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be between 1 and 10000, got {}",
            config.batch_size
        )));
    }

    if config.num_threads < 1 || config.num_threads > 256 {
        return Err(ConfigError::Validation(format!(
            "num_threads must be between 1 and 256, got {}",
            config.num_threads
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.target_documents == Some(0) {
        return Err(ConfigError::Validation(
            "target_documents must be >= 1 when set".to_string(),
        ));
    }

    for (name, value) in [
        ("max_duration_secs", config.max_duration_secs),
        ("url_timeout_secs", config.url_timeout_secs),
        ("batch_timeout_secs", config.batch_timeout_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be >= 1", name)));
        }
    }

    if config.empty_poll_limit < 1 {
        return Err(ConfigError::Validation(
            "empty_poll_limit must be >= 1".to_string(),
        ));
    }

    if config.extended_pause_min_secs > config.extended_pause_max_secs {
        return Err(ConfigError::Validation(format!(
            "extended_pause_min_secs ({}) cannot exceed extended_pause_max_secs ({})",
            config.extended_pause_min_secs, config.extended_pause_max_secs
        )));
    }

    Ok(())
}

/// Validates politeness configuration
fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.rotate_probability) {
        return Err(ConfigError::Validation(format!(
            "rotate_probability must be between 0.0 and 1.0, got {}",
            config.rotate_probability
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.antibot_cooldown_cap_secs < config.antibot_cooldown_secs {
        return Err(ConfigError::Validation(format!(
            "antibot_cooldown_cap_secs ({}) cannot be below antibot_cooldown_secs ({})",
            config.antibot_cooldown_cap_secs, config.antibot_cooldown_secs
        )));
    }

    if config.challenge_markers.iter().any(|m| m.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "challenge_markers cannot contain empty strings".to_string(),
        ));
    }

    for entry in &config.domains {
        validate_domain_pattern(&entry.pattern)?;
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Crawler name is the robots.txt product token: alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    if config.rotation_pool.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "rotation_pool cannot contain empty user agents".to_string(),
        ));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.output_dir.is_empty() {
        return Err(ConfigError::Validation(
            "output_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates source entries
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for source in sources {
        validate_source_name(&source.name)?;

        if !seen.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate source name '{}'",
                source.name
            )));
        }

        validate_http_url(&source.base_url, "base-url", &source.name)?;

        if source.start_urls.is_empty() && source.sitemap_url.is_none() {
            return Err(ConfigError::Validation(format!(
                "Source '{}' must have start-urls or a sitemap-url",
                source.name
            )));
        }

        for start_url in &source.start_urls {
            validate_http_url(start_url, "start URL", &source.name)?;
        }

        if let Some(sitemap_url) = &source.sitemap_url {
            validate_http_url(sitemap_url, "sitemap-url", &source.name)?;
        }

        if source.content_selectors.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "Source '{}' has an empty content selector",
                source.name
            )));
        }
    }

    Ok(())
}

/// Source names become directory names and file prefixes
fn validate_source_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "Source name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "Source name must contain only ASCII letters, digits, '_' and '-', got '{}'",
            name
        )));
    }

    Ok(())
}

/// Validates an absolute http(s) URL belonging to a source
fn validate_http_url(value: &str, what: &str, source: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| {
        ConfigError::InvalidUrl(format!(
            "Invalid {} '{}' for source '{}': {}",
            what, value, source, e
        ))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' for source '{}' must use http or https",
            what, value, source
        )));
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Pattern '{}' has no domain after the wildcard",
            pattern
        )));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
        || domain.contains("..")
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is malformed",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    Ok(())
}
