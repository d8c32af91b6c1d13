use crate::config::types::{
    Config, CrawlerConfig, ExtractionConfig, IdentityConfig, PatternConfig, SourceConfig,
    StorageConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// One week
const MAX_STALE_DOWNLOAD_SECS: u64 = 7 * 24 * 60 * 60;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_identity_config(&config.identity)?;
    validate_storage_config(&config.storage)?;
    validate_extraction_config(&config.extraction)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 20, got {}",
            config.max_attempts
        )));
    }

    if config.candidate_delay_min_ms > config.candidate_delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "candidate_delay_min_ms ({}) must not exceed candidate_delay_max_ms ({})",
            config.candidate_delay_min_ms, config.candidate_delay_max_ms
        )));
    }

    if config.request_timeout_secs < 1 || config.connect_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request and connect timeouts must be at least 1 second".to_string(),
        ));
    }

    if config.default_max_links < 1 {
        return Err(ConfigError::Validation(
            "default_max_links must be >= 1".to_string(),
        ));
    }

    if let Some(attempts) = config.download_max_attempts {
        if !(1..=20).contains(&attempts) {
            return Err(ConfigError::Validation(format!(
                "download_max_attempts must be between 1 and 20, got {}",
                attempts
            )));
        }
    }

    if config.stale_download_secs > MAX_STALE_DOWNLOAD_SECS {
        return Err(ConfigError::Validation(format!(
            "stale_download_secs must not exceed {}, got {}",
            MAX_STALE_DOWNLOAD_SECS, config.stale_download_secs
        )));
    }

    if config.stale_download_secs < config.request_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "stale_download_secs ({}) must be at least request_timeout_secs ({})",
            config.stale_download_secs, config.request_timeout_secs
        )));
    }

    Ok(())
}

/// Validates the identity pool
fn validate_identity_config(config: &IdentityConfig) -> Result<(), ConfigError> {
    if config.user_agents.is_empty() {
        return Err(ConfigError::Validation(
            "identity.user_agents cannot be empty".to_string(),
        ));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "identity.user_agents cannot contain blank entries".to_string(),
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

    if config.blob_root.is_empty() {
        return Err(ConfigError::Validation(
            "blob_root cannot be empty".to_string(),
        ));
    }

    if config.default_extension.is_empty()
        || !config
            .default_extension
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ConfigError::Validation(format!(
            "default_extension must be non-empty and alphanumeric, got '{}'",
            config.default_extension
        )));
    }

    Ok(())
}

/// Validates extraction patterns and lists
fn validate_extraction_config(config: &ExtractionConfig) -> Result<(), ConfigError> {
    if config.patterns.is_empty() {
        return Err(ConfigError::Validation(
            "extraction.patterns cannot be empty".to_string(),
        ));
    }

    for pattern in &config.patterns {
        validate_pattern(pattern)?;
    }

    if config.wrapper_params.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "extraction.wrapper_params cannot contain blank entries".to_string(),
        ));
    }

    if config.noise.iter().any(|n| n.is_empty()) {
        return Err(ConfigError::Validation(
            "extraction.noise cannot contain empty substrings".to_string(),
        ));
    }

    Ok(())
}

/// Validates a single extraction pattern
fn validate_pattern(pattern: &PatternConfig) -> Result<(), ConfigError> {
    match pattern {
        PatternConfig::Prefix { prefix } => {
            if prefix.is_empty() {
                return Err(ConfigError::InvalidPattern(
                    "prefix cannot be empty".to_string(),
                ));
            }
        }
        PatternConfig::Capture { regex } => {
            regex::Regex::new(regex)
                .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", regex, e)))?;
        }
        PatternConfig::Selector {
            selector,
            attribute,
        } => {
            scraper::Selector::parse(selector).map_err(|e| {
                ConfigError::InvalidPattern(format!("selector '{}': {:?}", selector, e))
            })?;
            if attribute.is_empty() {
                return Err(ConfigError::InvalidPattern(format!(
                    "selector '{}' needs an attribute",
                    selector
                )));
            }
        }
    }
    Ok(())
}

/// Validates source entries
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for source in sources {
        validate_source(source)?;

        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate source name '{}'",
                source.name
            )));
        }
    }

    Ok(())
}

/// Validates one source entry
pub fn validate_source(source: &SourceConfig) -> Result<(), ConfigError> {
    if source.name.is_empty()
        || !source
            .name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "source name must be non-empty and contain only alphanumerics, hyphens or underscores, got '{}'",
            source.name
        )));
    }

    let url = Url::parse(&source.url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid URL for source '{}': {}", source.name, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Source '{}' must use http or https, got {}",
            source.name,
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Source '{}' URL has no host",
            source.name
        )));
    }

    if source.cursor_step == Some(0) {
        return Err(ConfigError::Validation(format!(
            "Source '{}' cursor_step must be >= 1",
            source.name
        )));
    }

    if source.credential_header.is_some() != source.credential_env.is_some() {
        return Err(ConfigError::Validation(format!(
            "Source '{}' must set both credential_header and credential_env, or neither",
            source.name
        )));
    }

    Ok(())
}

/// Resolves the credential header of a source from the environment
///
/// Returns `Ok(None)` when the source declares no credential.
pub fn resolve_credential(source: &SourceConfig) -> Result<Option<(String, String)>, ConfigError> {
    match (&source.credential_header, &source.credential_env) {
        (Some(header), Some(var)) => match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Ok(Some((header.clone(), value))),
            _ => Err(ConfigError::MissingCredential(var.clone())),
        },
        _ => Ok(None),
    }
}
