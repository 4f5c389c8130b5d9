//! Configuration validation
//!
//! Validates configuration values and ensures consistency

use thiserror::Error;

use crate::{BackoffKind, Config, RepositoryConfig, RetryConfig, ServerConfig, StoreConfig};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port number: {0}")]
    InvalidPort(u16),

    #[error("Invalid host: {0:?}")]
    InvalidHost(String),

    #[error("Invalid backend: {0} (must be: memory)")]
    InvalidBackend(String),

    #[error("Invalid retry backoff: max delay {max_ms}ms is below base delay {base_ms}ms")]
    InvalidBackoff { base_ms: u64, max_ms: u64 },

    #[error("Invalid retry delay: constant backoff needs a delay > 0")]
    InvalidConstantDelay,

    #[error("Invalid default limit: {0} (must be non-zero)")]
    InvalidDefaultLimit(i64),

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Validation result type
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate complete configuration
pub fn validate(config: &Config) -> ValidationResult<()> {
    let mut errors: Vec<ValidationError> = [
        validate_server(&config.server),
        validate_store(&config.store),
        validate_repository(&config.repository),
    ]
    .into_iter()
    .filter_map(Result::err)
    .collect();

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

/// Validate server configuration
pub fn validate_server(config: &ServerConfig) -> ValidationResult<()> {
    if config.port == 0 {
        return Err(ValidationError::InvalidPort(config.port));
    }
    if config.host.trim().is_empty() {
        return Err(ValidationError::InvalidHost(config.host.clone()));
    }
    Ok(())
}

/// Validate store configuration
pub fn validate_store(config: &StoreConfig) -> ValidationResult<()> {
    match config.backend.as_str() {
        "memory" => validate_retry(&config.retry),
        _ => Err(ValidationError::InvalidBackend(config.backend.clone())),
    }
}

pub fn validate_retry(config: &RetryConfig) -> ValidationResult<()> {
    match config.backoff {
        BackoffKind::Exponential if config.max_delay_ms < config.base_delay_ms => {
            Err(ValidationError::InvalidBackoff {
                base_ms: config.base_delay_ms,
                max_ms: config.max_delay_ms,
            })
        },
        BackoffKind::Constant if config.base_delay_ms == 0 => {
            Err(ValidationError::InvalidConstantDelay)
        },
        _ => Ok(()),
    }
}

pub fn validate_repository(config: &RepositoryConfig) -> ValidationResult<()> {
    // 0 means "use the default" at call sites.
    if config.default_limit == 0 {
        return Err(ValidationError::InvalidDefaultLimit(config.default_limit));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_server_invalid_port() {
        let config = ServerConfig { port: 0, ..ServerConfig::default() };
        assert!(matches!(validate_server(&config), Err(ValidationError::InvalidPort(0))));
    }

    #[test]
    fn test_validate_server_blank_host() {
        let config = ServerConfig { host: "  ".to_string(), ..ServerConfig::default() };
        assert!(matches!(validate_server(&config), Err(ValidationError::InvalidHost(_))));
    }

    #[test]
    fn test_validate_store_unknown_backend() {
        let config = StoreConfig { backend: "postgres".to_string(), ..StoreConfig::default() };
        assert!(matches!(validate_store(&config), Err(ValidationError::InvalidBackend(_))));
    }

    #[test]
    fn test_validate_retry() {
        let inverted =
            RetryConfig { base_delay_ms: 100, max_delay_ms: 10, ..RetryConfig::default() };
        assert!(matches!(
            validate_retry(&inverted),
            Err(ValidationError::InvalidBackoff { base_ms: 100, max_ms: 10 })
        ));

        let constant = RetryConfig {
            backoff: BackoffKind::Constant,
            base_delay_ms: 0,
            ..RetryConfig::default()
        };
        assert!(matches!(validate_retry(&constant), Err(ValidationError::InvalidConstantDelay)));

        let none = RetryConfig { max_retries: 0, ..RetryConfig::default() };
        assert!(validate_retry(&none).is_ok());
    }

    #[test]
    fn test_validate_repository() {
        assert!(validate_repository(&RepositoryConfig { default_limit: -1 }).is_ok());
        assert!(matches!(
            validate_repository(&RepositoryConfig { default_limit: 0 }),
            Err(ValidationError::InvalidDefaultLimit(0))
        ));
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let mut config = Config::default();
        config.server.port = 0;
        config.repository.default_limit = 0;

        match validate(&config) {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }
}
