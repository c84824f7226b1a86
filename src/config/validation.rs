use super::models::Config;
use thiserror::Error;

const MAX_REDIRECT_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("engine.max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("http.max_redirects ({actual}) exceeds limit of {limit}")]
    TooManyRedirects { actual: usize, limit: usize },

    #[error("http.user_agent must not be empty")]
    EmptyUserAgent,

    #[error("cache.key_version must not be empty")]
    EmptyKeyVersion,

    #[error("cache.max_entry_bytes must be positive")]
    ZeroEntrySize,

    #[error("Duration must be positive: {field}")]
    ZeroDuration { field: &'static str },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_engine(config)?;
    validate_http(config)?;
    validate_cache(config)?;
    Ok(())
}

fn validate_engine(config: &Config) -> Result<(), ValidationError> {
    if config.engine.max_concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }
    if config.request_defaults.timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "request_defaults.timeout",
        });
    }
    Ok(())
}

fn validate_http(config: &Config) -> Result<(), ValidationError> {
    if config.http.max_redirects > MAX_REDIRECT_LIMIT {
        return Err(ValidationError::TooManyRedirects {
            actual: config.http.max_redirects,
            limit: MAX_REDIRECT_LIMIT,
        });
    }
    if config.http.user_agent.trim().is_empty() {
        return Err(ValidationError::EmptyUserAgent);
    }
    if config.http.connect_timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "http.connect_timeout",
        });
    }
    Ok(())
}

fn validate_cache(config: &Config) -> Result<(), ValidationError> {
    if config.cache.key_version.trim().is_empty() {
        return Err(ValidationError::EmptyKeyVersion);
    }
    if config.cache.max_entry_bytes.as_u64() == 0 {
        return Err(ValidationError::ZeroEntrySize);
    }
    if config.dns.ttl.is_zero() {
        return Err(ValidationError::ZeroDuration { field: "dns.ttl" });
    }
    Ok(())
}
