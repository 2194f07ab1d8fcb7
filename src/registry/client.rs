//! Cached, rate-limited, retrying registry client

use super::npm::HttpRegistryTransport;
use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::transport::RegistryTransport;
use crate::cache::{Cache, CacheStats};
use crate::config::{AnalysisConfig, NetworkConfig};
use crate::error::{CacheError, RegistryError};
use crate::types::PackageLookup;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Registry lookups keyed by package name
pub type MetadataCache = Cache<String, PackageLookup, RegistryError>;

/// npm caps package names at 214 characters
const MAX_NAME_LENGTH: usize = 214;

/// Registry access with caching, single-flight, rate limiting and retries.
///
/// Every network attempt (including retries) takes one slot from the rate
/// limiter. Successful lookups, including "not found", are cached for the
/// configured TTL; failures are never cached.
pub struct RegistryClient {
    transport: Arc<dyn RegistryTransport>,
    cache: Arc<MetadataCache>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    timeout: Duration,
    ttl: Duration,
}

impl RegistryClient {
    /// Assemble a client from explicit parts; TTL comes from the cache
    pub fn new(
        transport: Arc<dyn RegistryTransport>,
        cache: Arc<MetadataCache>,
        network: &NetworkConfig,
    ) -> Self {
        Self {
            transport,
            ttl: cache.default_ttl(),
            cache,
            limiter: Arc::new(RateLimiter::new(
                network.rate_limit.count,
                network.rate_limit.window(),
            )),
            retry: RetryPolicy::from_config(network),
            timeout: network.timeout(),
        }
    }

    /// HTTP client against the configured registry with a fresh cache
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, RegistryError> {
        let transport = Arc::new(HttpRegistryTransport::new(&config.network)?);
        Ok(Self::new(
            transport,
            Arc::new(build_cache(config)),
            &config.network,
        ))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Restore cached lookups from the cache file, if one is configured
    pub async fn load_cache(&self) -> usize {
        if self.cache.path().is_none() {
            return 0;
        }
        let loaded = self.cache.load().await;
        debug!("loaded {} cached registry lookups", loaded);
        loaded
    }

    /// Write cached lookups to the cache file
    pub async fn persist_cache(&self) -> Result<usize, CacheError> {
        let written = self.cache.persist().await?;
        info!("persisted {} registry lookups", written);
        Ok(written)
    }

    /// Look up one package.
    ///
    /// Concurrent calls for the same name share one request.
    pub async fn fetch_metadata(&self, name: &str) -> Result<PackageLookup, RegistryError> {
        validate_package_name(name)?;
        self.cache
            .get_or_fetch(name.to_string(), self.ttl, || self.fetch_uncached(name))
            .await
    }

    /// Look up several packages, requesting only the ones not cached.
    ///
    /// Every requested name gets an entry; one failing package does not
    /// affect the others. Names already being fetched by another call wait
    /// for that request instead of issuing their own.
    pub async fn fetch_many(
        &self,
        names: &[String],
    ) -> HashMap<String, Result<PackageLookup, RegistryError>> {
        let mut results = HashMap::with_capacity(names.len());
        let mut valid = Vec::with_capacity(names.len());
        for name in names {
            match validate_package_name(name) {
                Ok(()) => valid.push(name.clone()),
                Err(e) => {
                    results.insert(name.clone(), Err(e));
                }
            }
        }

        let fetched = self
            .cache
            .get_or_fetch_many(valid, self.ttl, |missing| async move {
                join_all(missing.into_iter().map(|name| async move {
                    let result = self.fetch_uncached(&name).await;
                    (name, result)
                }))
                .await
                .into_iter()
                .collect::<HashMap<_, _>>()
            })
            .await;

        results.extend(fetched);
        results
    }

    async fn fetch_uncached(&self, name: &str) -> Result<PackageLookup, RegistryError> {
        self.retry
            .run(name, |attempt| async move {
                self.limiter.acquire().await;
                debug!("fetching {} (attempt {})", name, attempt + 1);
                match tokio::time::timeout(self.timeout, self.transport.fetch_package(name)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(RegistryError::Timeout {
                        after: self.timeout,
                        attempts: 1,
                    }),
                }
            })
            .await
    }
}

/// Empty cache sized and located per the configuration
pub fn build_cache(config: &AnalysisConfig) -> MetadataCache {
    let mut cache = Cache::new(config.cache.ttl());
    if let Some(max) = config.cache.max_entries {
        cache = cache.with_max_entries(max);
    }
    if let Some(path) = &config.cache.path {
        cache = cache.with_persistence(path.clone());
    }
    cache
}

/// Reject names that cannot be a registry package before any request
pub fn validate_package_name(name: &str) -> Result<(), RegistryError> {
    let invalid = |reason: &str| -> Result<(), RegistryError> {
        Err(RegistryError::validation(name, reason))
    };

    if name.trim().is_empty() {
        return invalid("name is empty");
    }
    if name.len() > MAX_NAME_LENGTH {
        return invalid("name is longer than 214 characters");
    }
    if name.chars().any(char::is_whitespace) {
        return invalid("name contains whitespace");
    }
    if name.contains("..") {
        return invalid("name contains '..'");
    }
    if name.chars().any(|c| matches!(c, '\\' | '?' | '#' | '%')) {
        return invalid("name contains a reserved URL character");
    }

    match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, package))
                if !scope.is_empty() && !package.is_empty() && !package.contains('/') => {}
            _ => return invalid("scoped name must look like @scope/name"),
        },
        None if name.contains('/') => return invalid("name contains '/'"),
        None => {}
    }

    Ok(())
}
