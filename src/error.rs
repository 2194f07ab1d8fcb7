//! Error types for the analysis engine

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Top-level error type for analysis operations
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Failed to parse {file}: {message}")]
    ParseError { file: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl AnalysisError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a parse error for the given file
    pub fn parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Failure talking to the package registry.
///
/// Cloneable so a single in-flight fetch can hand the same failure to every
/// caller waiting on it. "Package does not exist" is not an error; it is
/// reported as [`crate::PackageLookup::NotFound`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid package name {name:?}: {reason}")]
    Validation { name: String, reason: String },

    #[error("Network error after {attempts} attempt(s): {message}")]
    Network { message: String, attempts: u32 },

    #[error("Request timed out after {after:?} ({attempts} attempt(s))")]
    Timeout { after: Duration, attempts: u32 },

    #[error("Rate limited by registry ({attempts} attempt(s))")]
    RateLimited { attempts: u32 },

    #[error("Registry returned HTTP {status}: {message}")]
    Api {
        status: u16,
        message: String,
        attempts: u32,
    },

    #[error("Malformed registry response for {name}: {message}")]
    Decode { name: String, message: String },
}

impl RegistryError {
    /// Create a validation error for a package name
    pub fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a network error for a first attempt
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network {
            message: msg.into(),
            attempts: 1,
        }
    }

    /// Create an API error from an HTTP status
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            attempts: 1,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Validation { .. } | Self::Decode { .. } => false,
        }
    }

    /// Number of attempts made before this error was produced
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Network { attempts, .. }
            | Self::Timeout { attempts, .. }
            | Self::RateLimited { attempts }
            | Self::Api { attempts, .. } => *attempts,
            Self::Validation { .. } => 0,
            Self::Decode { .. } => 1,
        }
    }

    /// Record the total attempt count on errors that track it
    pub fn with_attempts(mut self, total: u32) -> Self {
        match &mut self {
            Self::Network { attempts, .. }
            | Self::Timeout { attempts, .. }
            | Self::RateLimited { attempts }
            | Self::Api { attempts, .. } => *attempts = total,
            Self::Validation { .. } | Self::Decode { .. } => {}
        }
        self
    }
}

/// Failure reading or writing the persisted cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache file {path} could not be accessed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache contents could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Cache has no persistence path configured")]
    NoPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RegistryError::network("connection reset").is_transient());
        assert!(RegistryError::api(503, "unavailable").is_transient());
        assert!(RegistryError::RateLimited { attempts: 1 }.is_transient());
        assert!(!RegistryError::api(403, "forbidden").is_transient());
        assert!(!RegistryError::validation("", "empty").is_transient());
    }

    #[test]
    fn test_with_attempts() {
        let err = RegistryError::network("reset").with_attempts(4);
        assert_eq!(err.attempts(), 4);
        assert!(err.to_string().contains("4 attempt"));

        let err = RegistryError::validation("a/b/c", "too many slashes").with_attempts(3);
        assert_eq!(err.attempts(), 0);
    }
}
