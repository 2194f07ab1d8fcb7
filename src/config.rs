//! Configuration for registry access, caching and license policy

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Public npm registry
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Main configuration for an analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Registry and network configuration
    pub network: NetworkConfig,
    /// Registry response cache configuration
    pub cache: CacheConfig,
    /// License policy configuration
    pub license_policy: LicensePolicy,
    /// Analyze development dependencies too
    pub include_dev: bool,
    /// Dependencies to leave out of the analysis
    pub ignored_dependencies: HashSet<String>,
}

/// Network configuration for registry calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Base URL of an npm-compatible registry
    pub registry_url: String,
    /// Per-attempt request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum number of retries for transient failures
    pub max_retries: u32,
    /// First backoff delay in milliseconds; doubled on every retry
    pub retry_base_delay_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds
    pub retry_max_delay_ms: u64,
    /// Request budget
    pub rate_limit: RateLimitConfig,
    /// Registry token (optional, for private registries)
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
}

/// At most `count` requests per `window_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub count: u32,
    pub window_secs: u64,
}

/// Registry response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached registry response in seconds
    pub ttl_secs: u64,
    /// File the cache is persisted to between runs (none = memory only)
    pub path: Option<PathBuf>,
    /// Maximum number of cached packages (none = unbounded)
    pub max_entries: Option<usize>,
}

/// License policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LicensePolicy {
    /// Allowed license types (empty = allow all)
    pub allowed_licenses: HashSet<String>,
    /// Explicitly forbidden licenses
    pub forbidden_licenses: HashSet<String>,
    /// Warn on copyleft licenses
    pub warn_on_copyleft: bool,
    /// Warn on unknown licenses
    pub warn_on_unknown: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            cache: CacheConfig::default(),
            license_policy: LicensePolicy::default(),
            include_dev: false,
            ignored_dependencies: HashSet::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            rate_limit: RateLimitConfig::default(),
            auth_token: std::env::var("NPM_TOKEN").ok(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            count: 100,
            window_secs: 60,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600, // 1 hour
            path: None,
            max_entries: Some(10_000),
        }
    }
}

impl Default for LicensePolicy {
    fn default() -> Self {
        Self {
            allowed_licenses: HashSet::new(),
            forbidden_licenses: HashSet::new(),
            warn_on_copyleft: true,
            warn_on_unknown: true,
        }
    }
}

impl NetworkConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl CacheConfig {
    /// Get TTL as Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl AnalysisConfig {
    /// Create a new builder for AnalysisConfig
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    /// Parse a TOML document; missing sections and fields take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let network = &self.network;
        if !(network.registry_url.starts_with("https://")
            || network.registry_url.starts_with("http://"))
        {
            return Err(AnalysisError::config(format!(
                "registry_url must be an http(s) URL, got {:?}",
                network.registry_url
            )));
        }
        if network.timeout_secs == 0 {
            return Err(AnalysisError::config("timeout_secs must be greater than 0"));
        }
        if network.rate_limit.count == 0 || network.rate_limit.window_secs == 0 {
            return Err(AnalysisError::config(
                "rate_limit count and window_secs must be greater than 0",
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(AnalysisError::config("cache ttl_secs must be greater than 0"));
        }
        if self.cache.max_entries == Some(0) {
            return Err(AnalysisError::config("cache max_entries must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for AnalysisConfig
#[derive(Default)]
pub struct AnalysisConfigBuilder {
    network: Option<NetworkConfig>,
    cache: Option<CacheConfig>,
    license_policy: Option<LicensePolicy>,
    include_dev: bool,
    ignored_dependencies: HashSet<String>,
}

impl AnalysisConfigBuilder {
    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn license_policy(mut self, policy: LicensePolicy) -> Self {
        self.license_policy = Some(policy);
        self
    }

    pub fn include_dev(mut self, include_dev: bool) -> Self {
        self.include_dev = include_dev;
        self
    }

    pub fn ignore_dependency(mut self, name: impl Into<String>) -> Self {
        self.ignored_dependencies.insert(name.into());
        self
    }

    pub fn build(self) -> AnalysisConfig {
        AnalysisConfig {
            network: self.network.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
            license_policy: self.license_policy.unwrap_or_default(),
            include_dev: self.include_dev,
            ignored_dependencies: self.ignored_dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.network.registry_url, DEFAULT_REGISTRY_URL);
        assert_eq!(config.network.timeout(), Duration::from_secs(30));
        assert_eq!(config.network.rate_limit.count, 100);
        assert_eq!(config.network.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert!(!config.include_dev);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            include_dev = true

            [network]
            max_retries = 5

            [network.rate_limit]
            count = 10

            [cache]
            ttl_secs = 120
            path = "/tmp/deps-cache.json"
            "#,
        )
        .unwrap();

        assert!(config.include_dev);
        assert_eq!(config.network.max_retries, 5);
        assert_eq!(config.network.timeout_secs, 30);
        assert_eq!(config.network.rate_limit.count, 10);
        assert_eq!(config.network.rate_limit.window_secs, 60);
        assert_eq!(config.cache.ttl_secs, 120);
        assert_eq!(
            config.cache.path.as_deref(),
            Some(Path::new("/tmp/deps-cache.json"))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_rate = AnalysisConfig::from_toml_str("[network.rate_limit]\ncount = 0\n");
        assert!(matches!(zero_rate, Err(AnalysisError::ConfigError(_))));

        let bad_url = AnalysisConfig::from_toml_str("[network]\nregistry_url = \"ftp://x\"\n");
        assert!(matches!(bad_url, Err(AnalysisError::ConfigError(_))));

        let malformed = AnalysisConfig::from_toml_str("[network\n");
        assert!(matches!(malformed, Err(AnalysisError::TomlError(_))));
    }

    #[test]
    fn test_builder() {
        let config = AnalysisConfig::builder()
            .include_dev(true)
            .ignore_dependency("left-pad")
            .cache(CacheConfig {
                ttl_secs: 10,
                ..CacheConfig::default()
            })
            .build();

        assert!(config.include_dev);
        assert!(config.ignored_dependencies.contains("left-pad"));
        assert_eq!(config.cache.ttl_secs, 10);
        assert_eq!(config.network.max_retries, 3);
    }
}
