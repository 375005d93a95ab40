//! Error types for the ragprobe core library.
//!
//! Uses `thiserror` for public API error types with structured variants covering
//! the model provider, the target application, and configuration.

use std::path::PathBuf;

/// Errors from model completion provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider returned no usable completion")]
    EmptyCompletion,
}

/// Errors from HTTP calls against the application under evaluation.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("Unexpected payload from {url}: {message}")]
    Payload { url: String, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = LlmError::RateLimited {
            retry_after_secs: 12,
        };
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 12s");
    }

    #[test]
    fn test_error_display_target() {
        let err = TargetError::Status {
            url: "http://app:3000/api/chat".into(),
            status: 502,
        };
        assert_eq!(
            err.to_string(),
            "http://app:3000/api/chat responded with HTTP 502"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = ConfigError::FileNotFound {
            path: PathBuf::from("/etc/ragprobe.toml"),
        };
        assert_eq!(
            err.to_string(),
            "Configuration file not found: /etc/ragprobe.toml"
        );
    }
}
