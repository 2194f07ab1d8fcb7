//! Analysis orchestration: manifest in, records and structural findings out

use crate::cache::CacheStats;
use crate::config::AnalysisConfig;
use crate::error::{RegistryError, Result};
use crate::graph::{detect_cycles, detect_duplicate_versions, DependencyGraph};
use crate::license::analyze_license;
use crate::parser::{
    locate_lockfile, read_manifest, read_project_install_tree, InstallTree, MANIFEST_FILE,
};
use crate::registry::{RegistryClient, RegistryTransport};
use crate::types::{
    AnalysisReport, DependencyRecord, ErrorKind, LicenseRisk, ManifestEntry, PackageError,
    PackageLookup, PackageManifest, ProjectReport, RegistryMetadata, StructureReport, UpdateClass,
};
use crate::version::{classify, max_satisfying, range_floor};
use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to run structural checks over
#[derive(Debug, Clone, Copy)]
pub enum StructureInput<'a> {
    /// Direct edges only; a manifest has no resolved versions, so no duplicates
    Manifest(&'a PackageManifest),
    /// The full installed tree from a lockfile
    InstallTree(&'a InstallTree),
    /// Caller-supplied adjacency with resolved versions per package
    Graph {
        graph: &'a DependencyGraph,
        versions: &'a IndexMap<String, Vec<String>>,
    },
}

/// Where a manifest entry is looked up
#[derive(Debug, PartialEq, Eq)]
enum Source<'a> {
    Registry { package: &'a str, range: &'a str },
    /// file:, git, tarball URL, workspace: and similar specifiers
    External,
}

/// Analyzes manifests against a package registry
pub struct Analyzer {
    config: AnalysisConfig,
    registry: RegistryClient,
}

impl Analyzer {
    /// Analyzer backed by the HTTP registry named in `config`
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let registry = RegistryClient::from_config(&config)?;
        Ok(Self::with_registry(config, registry))
    }

    /// Analyzer backed by a custom transport
    pub fn with_transport(
        config: AnalysisConfig,
        transport: Arc<dyn RegistryTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(crate::registry::build_cache(&config));
        let registry = RegistryClient::new(transport, cache, &config.network);
        Ok(Self::with_registry(config, registry))
    }

    /// Analyzer sharing an existing registry client and its cache
    pub fn with_registry(config: AnalysisConfig, registry: RegistryClient) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.registry.cache_stats()
    }

    /// Restore registry lookups persisted by an earlier run
    pub async fn load_cache(&self) -> usize {
        self.registry.load_cache().await
    }

    /// Save registry lookups for the next run
    pub async fn persist_cache(&self) -> Result<usize> {
        Ok(self.registry.persist_cache().await?)
    }

    /// Analyze every manifest entry against the registry.
    ///
    /// Records follow manifest order. A failing package yields a record with
    /// `error` set and an entry in `errors`; it never aborts the batch.
    pub async fn analyze(&self, manifest: &PackageManifest) -> AnalysisReport {
        self.analyze_with_install_tree(manifest, None).await
    }

    /// Like [`Analyzer::analyze`], preferring installed versions from `tree`
    pub async fn analyze_with_install_tree(
        &self,
        manifest: &PackageManifest,
        tree: Option<&InstallTree>,
    ) -> AnalysisReport {
        let entries: Vec<ManifestEntry> = manifest
            .entries(self.config.include_dev)
            .into_iter()
            .filter(|entry| {
                let ignored = self.config.ignored_dependencies.contains(&entry.name);
                if ignored {
                    debug!("Skipping ignored dependency: {}", entry.name);
                }
                !ignored
            })
            .collect();

        info!(
            "Analyzing {} dependencies of '{}'",
            entries.len(),
            manifest.name
        );

        let mut lookup_names: Vec<String> = Vec::new();
        for entry in &entries {
            if let Source::Registry { package, .. } = source_of(entry) {
                if !lookup_names.iter().any(|n| n == package) {
                    lookup_names.push(package.to_string());
                }
            }
        }

        let lookups = self.registry.fetch_many(&lookup_names).await;

        let mut records = Vec::with_capacity(entries.len());
        let mut errors = Vec::new();

        for entry in &entries {
            let installed = tree.and_then(|t| t.resolved_version(&entry.name));

            let (package, range) = match source_of(entry) {
                Source::Registry { package, range } => (package, range),
                Source::External => {
                    records.push(self.external_record(entry, installed));
                    continue;
                }
            };

            let outcome = match lookups.get(package) {
                Some(Ok(lookup)) => Ok(lookup.clone()),
                Some(Err(e)) => Err(e.clone()),
                // Only reachable if the batch dropped a name; ask directly.
                None => self.registry.fetch_metadata(package).await,
            };

            match outcome {
                Ok(PackageLookup::Found(metadata)) => {
                    records.push(self.build_record(entry, range, &metadata, installed));
                }
                Ok(PackageLookup::NotFound) => {
                    let error = PackageError {
                        name: entry.name.clone(),
                        kind: ErrorKind::NotFound,
                        message: format!("{} was not found in the registry", package),
                    };
                    warn!("{}", error.message);
                    records.push(DependencyRecord::failed(entry, &error));
                    errors.push(error);
                }
                Err(e) => {
                    let error = PackageError {
                        name: entry.name.clone(),
                        kind: error_kind(&e),
                        message: e.to_string(),
                    };
                    warn!("Failed to analyze {}: {}", entry.name, e);
                    records.push(DependencyRecord::failed(entry, &error));
                    errors.push(error);
                }
            }
        }

        let report = AnalysisReport::new(records, errors);

        info!(
            "Analysis complete: {} current, {} patch, {} minor, {} major, {} unknown, {} failed",
            report.summary.current,
            report.summary.patch,
            report.summary.minor,
            report.summary.major,
            report.summary.unknown,
            report.summary.failed,
        );

        report
    }

    fn build_record(
        &self,
        entry: &ManifestEntry,
        range: &str,
        metadata: &RegistryMetadata,
        installed: Option<&str>,
    ) -> DependencyRecord {
        let mut warnings = Vec::new();

        let resolved_version = installed
            .map(String::from)
            .or_else(|| max_satisfying(&metadata.version_strings(), range))
            .or_else(|| {
                range
                    .trim()
                    .eq_ignore_ascii_case("latest")
                    .then(|| metadata.latest_version.clone())
                    .flatten()
            })
            .or_else(|| range_floor(range));
        let latest_version = metadata.latest_version.clone();

        if resolved_version.is_none() {
            warnings.push(format!("Could not resolve a version for range {:?}", range));
        }
        if latest_version.is_none() {
            warnings.push("Registry does not tag a latest version".to_string());
        }

        let update_class = match (&resolved_version, &latest_version) {
            (Some(resolved), Some(latest)) => classify(resolved, latest),
            _ => UpdateClass::Unknown,
        };

        let license = metadata
            .license_for(resolved_version.as_deref())
            .map(String::from);
        let (license_risk, license_warnings) =
            analyze_license(license.as_deref(), &self.config.license_policy);
        warnings.extend(license_warnings);

        debug!(
            "{}: {:?} -> {:?} ({})",
            entry.name, resolved_version, latest_version, update_class
        );

        DependencyRecord {
            name: entry.name.clone(),
            group: entry.group,
            declared_range: entry.declared_range.clone(),
            resolved_version,
            latest_version,
            latest_published_at: metadata.latest_published_at(),
            update_class,
            license,
            license_risk,
            warnings,
            error: None,
        }
    }

    fn external_record(&self, entry: &ManifestEntry, installed: Option<&str>) -> DependencyRecord {
        debug!(
            "{} is not a registry dependency ({})",
            entry.name, entry.declared_range
        );
        DependencyRecord {
            name: entry.name.clone(),
            group: entry.group,
            declared_range: entry.declared_range.clone(),
            resolved_version: installed.map(String::from),
            latest_version: None,
            latest_published_at: None,
            update_class: UpdateClass::Unknown,
            license: None,
            license_risk: LicenseRisk::Unknown,
            warnings: vec![format!(
                "{} is not a registry dependency; registry lookup skipped",
                entry.declared_range
            )],
            error: None,
        }
    }

    /// Detect cycles and duplicated versions
    pub fn analyze_structure(&self, input: StructureInput<'_>) -> StructureReport {
        analyze_structure(input, self.config.include_dev)
    }

    /// Analyze the project in `path` (a directory or a package.json).
    ///
    /// Uses the nearest package-lock.json for installed versions and the
    /// full dependency tree when one exists. The registry cache is loaded
    /// before and persisted after when a cache path is configured.
    pub async fn analyze_project(&self, path: &Path) -> Result<ProjectReport> {
        let manifest_path = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path.to_path_buf()
        };
        info!("Starting analysis of {}", manifest_path.display());

        let manifest = read_manifest(&manifest_path)?;

        let tree = match locate_lockfile(&manifest_path) {
            Some(lockfile) => match read_project_install_tree(
                &manifest_path,
                &lockfile,
                self.config.include_dev,
            ) {
                Ok(tree) => Some(tree),
                Err(e) => {
                    warn!("Ignoring unreadable lockfile {}: {}", lockfile.display(), e);
                    None
                }
            },
            None => None,
        };

        self.load_cache().await;

        let analysis = self
            .analyze_with_install_tree(&manifest, tree.as_ref())
            .await;
        let structure = match &tree {
            Some(tree) => self.analyze_structure(StructureInput::InstallTree(tree)),
            None => self.analyze_structure(StructureInput::Manifest(&manifest)),
        };

        if self.registry.cache().path().is_some() {
            if let Err(e) = self.persist_cache().await {
                warn!("Failed to persist registry cache: {}", e);
            }
        }

        let project_path = manifest_path
            .parent()
            .unwrap_or(manifest_path.as_path())
            .display()
            .to_string();

        Ok(ProjectReport {
            project_name: manifest.name,
            project_path,
            analysis,
            structure,
        })
    }
}

/// Analyze the project in `path` with a fresh HTTP-backed analyzer
pub async fn analyze_project(path: &Path, config: &AnalysisConfig) -> Result<ProjectReport> {
    Analyzer::new(config.clone())?.analyze_project(path).await
}

/// Detect cycles and duplicated versions without registry access
pub fn analyze_structure(input: StructureInput<'_>, include_dev: bool) -> StructureReport {
    let report = match input {
        StructureInput::Manifest(manifest) => StructureReport {
            cycles: detect_cycles(&DependencyGraph::from_manifest(manifest, include_dev)),
            duplicates: Vec::new(),
        },
        StructureInput::InstallTree(tree) => StructureReport {
            cycles: detect_cycles(&tree.to_graph()),
            duplicates: detect_duplicate_versions(tree.versions_by_name()),
        },
        StructureInput::Graph { graph, versions } => StructureReport {
            cycles: detect_cycles(graph),
            duplicates: detect_duplicate_versions(versions.iter()),
        },
    };

    if !report.cycles.is_empty() || !report.duplicates.is_empty() {
        info!(
            "Found {} dependency cycles and {} duplicated packages",
            report.cycles.len(),
            report.duplicates.len()
        );
    }

    report
}

fn source_of(entry: &ManifestEntry) -> Source<'_> {
    const EXTERNAL_PREFIXES: [&str; 11] = [
        "file:",
        "link:",
        "workspace:",
        "portal:",
        "git:",
        "git+",
        "github:",
        "gitlab:",
        "bitbucket:",
        "http:",
        "https:",
    ];

    let declared = entry.declared_range.trim();

    if let Some(alias) = declared.strip_prefix("npm:") {
        // npm:<package>@<range>, where <package> may itself start with '@'
        return match alias.rfind('@') {
            Some(at) if at > 0 => Source::Registry {
                package: &alias[..at],
                range: &alias[at + 1..],
            },
            _ => Source::Registry {
                package: alias,
                range: "*",
            },
        };
    }

    // Ranges never contain '/', so `user/repo` is the GitHub shorthand
    if EXTERNAL_PREFIXES.iter().any(|p| declared.starts_with(p)) || declared.contains('/') {
        return Source::External;
    }

    Source::Registry {
        package: &entry.name,
        range: if declared.is_empty() { "*" } else { declared },
    }
}

fn error_kind(error: &RegistryError) -> ErrorKind {
    match error {
        RegistryError::Validation { .. } => ErrorKind::Validation,
        RegistryError::Network { .. }
        | RegistryError::Timeout { .. }
        | RegistryError::RateLimited { .. } => ErrorKind::Network,
        RegistryError::Api { .. } | RegistryError::Decode { .. } => ErrorKind::Registry,
    }
}
