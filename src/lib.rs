//! # deps_inspect
//!
//! Dependency freshness and graph health for npm projects:
//! - **Registry lookups**: cached, single-flight, rate-limited and retried
//! - **Version classification**: how far behind each dependency is (patch/minor/major)
//! - **License analysis**: SPDX-aware risk categorization with a configurable policy
//! - **Structure checks**: dependency cycles and packages installed at several versions
//!
//! ## Quick Start
//!
//! ```no_run
//! use deps_inspect::{analyze_project, AnalysisConfig};
//! use std::path::Path;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = AnalysisConfig::default();
//! let report = analyze_project(Path::new("."), &config).await?;
//!
//! for record in report.analysis.outdated() {
//!     println!(
//!         "{}: {:?} -> {:?} ({})",
//!         record.name, record.resolved_version, record.latest_version, record.update_class
//!     );
//! }
//! for cycle in &report.structure.cycles {
//!     println!("cycle: {}", cycle.join(" -> "));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Analyzing a manifest with a custom registry
//!
//! Anything implementing [`RegistryTransport`] can stand in for the npm
//! registry; caching, rate limiting and retries still apply.
//!
//! ```no_run
//! use deps_inspect::{AnalysisConfig, Analyzer, HttpRegistryTransport, PackageManifest};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = AnalysisConfig::default();
//! let transport = Arc::new(HttpRegistryTransport::new(&config.network)?);
//! let analyzer = Analyzer::with_transport(config, transport)?;
//!
//! let manifest = PackageManifest::new("app").with_dependency("react", "^17.0.0");
//! let report = analyzer.analyze(&manifest).await;
//! println!("{} major updates", report.summary.major);
//! # Ok(())
//! # }
//! ```

mod analysis;
mod cache;
mod config;
mod error;
pub mod graph;
mod license;
mod parser;
pub mod registry;
mod types;
pub mod version;

// Re-export public API
pub use analysis::{analyze_project, analyze_structure, Analyzer, StructureInput};
pub use cache::{Cache, CacheStats};
pub use config::{
    AnalysisConfig, AnalysisConfigBuilder, CacheConfig, LicensePolicy, NetworkConfig,
    RateLimitConfig, DEFAULT_REGISTRY_URL,
};
pub use error::{AnalysisError, CacheError, RegistryError, Result};
pub use graph::{detect_cycles, detect_duplicate_versions, DependencyGraph};
pub use license::{analyze_license, categorize_license};
pub use parser::{
    locate_lockfile, parse_install_tree, parse_manifest, read_install_tree, read_manifest,
    read_project_install_tree, InstallTree, InstalledPackage, LOCKFILE, MANIFEST_FILE,
};
pub use registry::{HttpRegistryTransport, RegistryClient, RegistryTransport};
pub use types::{
    AnalysisReport, AnalysisSummary, DependencyGroup, DependencyRecord, DuplicateVersion,
    ErrorKind, LicenseRisk, ManifestEntry, PackageError, PackageLookup, PackageManifest,
    ProjectReport, RegistryMetadata, StructureReport, UpdateClass, VersionInfo,
};
