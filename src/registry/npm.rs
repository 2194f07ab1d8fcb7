//! npm registry over HTTP

use super::transport::RegistryTransport;
use crate::config::NetworkConfig;
use crate::error::RegistryError;
use crate::types::{PackageLookup, RegistryMetadata, VersionInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Packument document returned by `GET /{name}`
#[derive(Debug, Deserialize)]
struct NpmPackageResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, NpmVersionResponse>,
    /// Publish times keyed by version; `unpublished` holds an object
    #[serde(default)]
    time: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct NpmVersionResponse {
    #[serde(default)]
    license: Option<Value>,
    /// Pre-SPDX form: `[{ "type": "MIT", "url": ... }]`
    #[serde(default)]
    licenses: Option<Value>,
}

/// Fetches package documents from an npm-compatible registry
pub struct HttpRegistryTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRegistryTransport {
    pub fn new(config: &NetworkConfig) -> Result<Self, RegistryError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.registry_url.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> RegistryError {
        if e.is_timeout() {
            RegistryError::Timeout {
                after: self.timeout,
                attempts: 1,
            }
        } else {
            RegistryError::network(e.to_string())
        }
    }
}

/// Build HTTP client with proper configuration
fn build_client(config: &NetworkConfig) -> Result<Client, RegistryError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(token) = &config.auth_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| RegistryError::network(format!("Invalid registry token: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(config.timeout())
        .build()
        .map_err(|e| RegistryError::network(format!("Failed to build HTTP client: {}", e)))
}

/// Encode package name for a URL path segment (`@scope/name` -> `@scope%2Fname`)
pub fn encode_package_name(name: &str) -> String {
    match name.strip_prefix('@') {
        Some(scoped) => format!("@{}", urlencoding::encode(scoped)),
        None => urlencoding::encode(name).into_owned(),
    }
}

#[async_trait]
impl RegistryTransport for HttpRegistryTransport {
    async fn fetch_package(&self, name: &str) -> Result<PackageLookup, RegistryError> {
        let url = format!("{}/{}", self.base_url, encode_package_name(name));
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("{} is not published on {}", name, self.base_url);
            return Ok(PackageLookup::NotFound);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RegistryError::RateLimited { attempts: 1 });
        }
        if !status.is_success() {
            warn!("registry returned status {} for {}", status, url);
            return Err(RegistryError::api(
                status.as_u16(),
                status.canonical_reason().unwrap_or("unexpected status"),
            ));
        }

        let body: NpmPackageResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                RegistryError::Decode {
                    name: name.to_string(),
                    message: e.to_string(),
                }
            } else {
                self.map_send_error(e)
            }
        })?;

        if is_unpublished(&body) {
            debug!("{} was unpublished from {}", name, self.base_url);
            return Ok(PackageLookup::NotFound);
        }

        Ok(PackageLookup::Found(into_metadata(name, body)))
    }
}

/// Fully unpublished packages keep a document with no versions
fn is_unpublished(body: &NpmPackageResponse) -> bool {
    body.versions.is_empty() && body.time.contains_key("unpublished")
}

fn into_metadata(requested: &str, body: NpmPackageResponse) -> RegistryMetadata {
    let NpmPackageResponse {
        name,
        mut dist_tags,
        versions,
        time,
    } = body;

    let versions: BTreeMap<String, VersionInfo> = versions
        .into_iter()
        .map(|(version, info)| {
            let license = info
                .license
                .as_ref()
                .and_then(license_text)
                .or_else(|| info.licenses.as_ref().and_then(license_text));
            let published_at = time
                .get(&version)
                .and_then(Value::as_str)
                .and_then(parse_datetime);
            (
                version,
                VersionInfo {
                    license,
                    published_at,
                },
            )
        })
        .collect();

    RegistryMetadata {
        name: name.unwrap_or_else(|| requested.to_string()),
        latest_version: dist_tags.remove("latest"),
        versions,
    }
}

/// License as published: an SPDX string, `{ "type": ... }`, or a list of those
fn license_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => map
            .get("type")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
        Value::Array(items) => {
            let names: Vec<String> = items.iter().filter_map(license_text).collect();
            match names.len() {
                0 => None,
                1 => names.into_iter().next(),
                _ => Some(format!("({})", names.join(" OR "))),
            }
        }
        _ => None,
    }
}

/// Parse RFC3339 datetime string
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
