//! npm registry access

pub mod client;
pub mod npm;
pub mod rate_limit;
pub mod retry;
pub mod transport;

pub use client::{build_cache, validate_package_name, MetadataCache, RegistryClient};
pub use npm::HttpRegistryTransport;
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use transport::RegistryTransport;
