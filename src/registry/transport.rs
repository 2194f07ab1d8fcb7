//! Seam between the registry client and the wire

use crate::error::RegistryError;
use crate::types::PackageLookup;
use async_trait::async_trait;

/// Performs exactly one registry request per call.
///
/// Rate limiting, retries, timeouts and caching are layered on top by
/// [`super::RegistryClient`]; implementations only translate one response.
/// A package the registry does not know is `Ok(PackageLookup::NotFound)`.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    async fn fetch_package(&self, name: &str) -> Result<PackageLookup, RegistryError>;
}
