//! Core data types for dependency analysis

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared dependencies of a project, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Project name, used as the root node of the manifest graph
    pub name: String,
    /// Runtime dependencies: name -> declared range
    pub dependencies: IndexMap<String, String>,
    /// Development-only dependencies: name -> declared range
    pub dev_dependencies: IndexMap<String, String>,
}

/// Which dependency group a manifest entry was declared in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyGroup {
    Production,
    Development,
}

impl std::fmt::Display for DependencyGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "prod"),
            Self::Development => write!(f, "dev"),
        }
    }
}

/// One declared dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub declared_range: String,
    pub group: DependencyGroup,
}

impl PackageManifest {
    /// Create an empty manifest for a project
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a runtime dependency
    pub fn with_dependency(mut self, name: impl Into<String>, range: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), range.into());
        self
    }

    /// Add a development dependency
    pub fn with_dev_dependency(
        mut self,
        name: impl Into<String>,
        range: impl Into<String>,
    ) -> Self {
        self.dev_dependencies.insert(name.into(), range.into());
        self
    }

    /// Entries in declaration order, runtime group first.
    ///
    /// A package declared in both groups is reported once, as a runtime dependency.
    pub fn entries(&self, include_dev: bool) -> Vec<ManifestEntry> {
        let mut entries: Vec<ManifestEntry> = self
            .dependencies
            .iter()
            .map(|(name, range)| ManifestEntry {
                name: name.clone(),
                declared_range: range.clone(),
                group: DependencyGroup::Production,
            })
            .collect();

        if include_dev {
            entries.extend(
                self.dev_dependencies
                    .iter()
                    .filter(|(name, _)| !self.dependencies.contains_key(*name))
                    .map(|(name, range)| ManifestEntry {
                        name: name.clone(),
                        declared_range: range.clone(),
                        group: DependencyGroup::Development,
                    }),
            );
        }

        entries
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.dev_dependencies.is_empty()
    }
}

/// Per-version registry information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub license: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Package metadata as published by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub name: String,
    /// Version the registry tags as latest, if it has one
    pub latest_version: Option<String>,
    pub versions: BTreeMap<String, VersionInfo>,
}

impl RegistryMetadata {
    /// All published version strings
    pub fn version_strings(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }

    /// License declared for `version`, falling back to the latest version's license
    pub fn license_for(&self, version: Option<&str>) -> Option<&str> {
        version
            .and_then(|v| self.versions.get(v))
            .and_then(|info| info.license.as_deref())
            .or_else(|| {
                self.latest_version
                    .as_deref()
                    .and_then(|v| self.versions.get(v))
                    .and_then(|info| info.license.as_deref())
            })
    }

    /// Publish time of the latest version
    pub fn latest_published_at(&self) -> Option<DateTime<Utc>> {
        self.latest_version
            .as_deref()
            .and_then(|v| self.versions.get(v))
            .and_then(|info| info.published_at)
    }
}

/// Outcome of a registry lookup that reached the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "metadata", rename_all = "snake_case")]
pub enum PackageLookup {
    Found(RegistryMetadata),
    /// The registry answered that no such package exists
    NotFound,
}

/// Semantic-versioning tier separating an installed version from a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateClass {
    Current,
    Patch,
    Minor,
    Major,
    /// One of the versions could not be compared
    Unknown,
}

impl UpdateClass {
    /// Whether a newer version is known to exist
    pub fn is_outdated(self) -> bool {
        matches!(self, Self::Patch | Self::Minor | Self::Major)
    }

    /// Rank used for threshold checks (`Current` = 0 .. `Major` = 3)
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Current => Some(0),
            Self::Patch => Some(1),
            Self::Minor => Some(2),
            Self::Major => Some(3),
            Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for UpdateClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current => write!(f, "Current"),
            Self::Patch => write!(f, "Patch"),
            Self::Minor => write!(f, "Minor"),
            Self::Major => write!(f, "Major"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// License risk categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseRisk {
    /// Permissive licenses (MIT, Apache, BSD, etc.)
    Permissive,
    /// Copyleft licenses (GPL, LGPL, AGPL, etc.)
    Copyleft,
    /// Proprietary or restrictive licenses
    Proprietary,
    /// License not found or not recognized
    Unknown,
}

impl std::fmt::Display for LicenseRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permissive => write!(f, "Permissive"),
            Self::Copyleft => write!(f, "Copyleft"),
            Self::Proprietary => write!(f, "Proprietary"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Category of a per-package failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The package name or range was malformed
    Validation,
    /// The registry has no such package
    NotFound,
    /// The registry could not be reached after retries
    Network,
    /// The registry answered with an unusable response
    Registry,
}

/// A failure for one package of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageError {
    pub name: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// One row of analysis output.
///
/// Either `error` is set and the version/license fields are empty, or
/// `error` is `None` and the rest is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub name: String,
    pub group: DependencyGroup,
    pub declared_range: String,
    pub resolved_version: Option<String>,
    pub latest_version: Option<String>,
    pub latest_published_at: Option<DateTime<Utc>>,
    pub update_class: UpdateClass,
    pub license: Option<String>,
    pub license_risk: LicenseRisk,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl DependencyRecord {
    /// Record for a package whose resolution failed
    pub fn failed(entry: &ManifestEntry, error: &PackageError) -> Self {
        Self {
            name: entry.name.clone(),
            group: entry.group,
            declared_range: entry.declared_range.clone(),
            resolved_version: None,
            latest_version: None,
            latest_published_at: None,
            update_class: UpdateClass::Unknown,
            license: None,
            license_risk: LicenseRisk::Unknown,
            warnings: Vec::new(),
            error: Some(error.message.clone()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Packages resolved to more than one distinct version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateVersion {
    pub name: String,
    pub versions: Vec<String>,
}

/// Summary statistics for an analysis report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_dependencies: usize,
    pub current: usize,
    pub patch: usize,
    pub minor: usize,
    pub major: usize,
    pub unknown: usize,
    pub failed: usize,
    pub license_issues: usize,
}

/// Freshness and licensing results for a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Timestamp when the analysis ran
    pub timestamp: DateTime<Utc>,
    /// One record per analyzed manifest entry, in manifest order
    pub records: Vec<DependencyRecord>,
    /// Failures, one per failed record
    pub errors: Vec<PackageError>,
    pub summary: AnalysisSummary,
}

/// Structural findings for a dependency graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureReport {
    pub cycles: Vec<Vec<String>>,
    pub duplicates: Vec<DuplicateVersion>,
}

/// Combined results for a project directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project_name: String,
    pub project_path: String,
    pub analysis: AnalysisReport,
    pub structure: StructureReport,
}

impl AnalysisReport {
    /// Create a report from finished records and failures
    pub fn new(records: Vec<DependencyRecord>, errors: Vec<PackageError>) -> Self {
        let mut report = Self {
            timestamp: Utc::now(),
            records,
            errors,
            summary: AnalysisSummary::default(),
        };
        report.compute_summary();
        report
    }

    /// Compute summary statistics from records
    pub fn compute_summary(&mut self) {
        let mut summary = AnalysisSummary {
            total_dependencies: self.records.len(),
            ..AnalysisSummary::default()
        };

        for record in &self.records {
            if record.is_error() {
                summary.failed += 1;
                continue;
            }

            match record.update_class {
                UpdateClass::Current => summary.current += 1,
                UpdateClass::Patch => summary.patch += 1,
                UpdateClass::Minor => summary.minor += 1,
                UpdateClass::Major => summary.major += 1,
                UpdateClass::Unknown => summary.unknown += 1,
            }

            if matches!(
                record.license_risk,
                LicenseRisk::Copyleft | LicenseRisk::Proprietary | LicenseRisk::Unknown
            ) {
                summary.license_issues += 1;
            }
        }

        self.summary = summary;
    }

    /// Records that have a newer version available
    pub fn outdated(&self) -> impl Iterator<Item = &DependencyRecord> {
        self.records.iter().filter(|r| r.update_class.is_outdated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_entries_order_and_dev_filter() {
        let manifest = PackageManifest::new("app")
            .with_dependency("zod", "^3.0.0")
            .with_dependency("axios", "^1.0.0")
            .with_dev_dependency("jest", "^29.0.0")
            .with_dev_dependency("axios", "^1.2.0");

        let names: Vec<_> = manifest.entries(false).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["zod", "axios"]);

        let entries = manifest.entries(true);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zod", "axios", "jest"]);
        assert_eq!(entries[2].group, DependencyGroup::Development);
    }

    #[test]
    fn test_license_for_falls_back_to_latest() {
        let mut versions = BTreeMap::new();
        versions.insert("1.0.0".to_string(), VersionInfo::default());
        versions.insert(
            "2.0.0".to_string(),
            VersionInfo {
                license: Some("MIT".to_string()),
                published_at: None,
            },
        );
        let meta = RegistryMetadata {
            name: "pkg".to_string(),
            latest_version: Some("2.0.0".to_string()),
            versions,
        };

        assert_eq!(meta.license_for(Some("1.0.0")), Some("MIT"));
        assert_eq!(meta.license_for(Some("9.9.9")), Some("MIT"));
        assert_eq!(meta.license_for(None), Some("MIT"));
    }

    #[test]
    fn test_compute_summary() {
        let entry = ManifestEntry {
            name: "broken".to_string(),
            declared_range: "^1.0.0".to_string(),
            group: DependencyGroup::Production,
        };
        let error = PackageError {
            name: "broken".to_string(),
            kind: ErrorKind::Network,
            message: "unreachable".to_string(),
        };
        let ok = DependencyRecord {
            name: "ok".to_string(),
            group: DependencyGroup::Production,
            declared_range: "1.0.0".to_string(),
            resolved_version: Some("1.0.0".to_string()),
            latest_version: Some("2.0.0".to_string()),
            latest_published_at: None,
            update_class: UpdateClass::Major,
            license: Some("MIT".to_string()),
            license_risk: LicenseRisk::Permissive,
            warnings: Vec::new(),
            error: None,
        };

        let report = AnalysisReport::new(
            vec![ok, DependencyRecord::failed(&entry, &error)],
            vec![error],
        );
        assert_eq!(report.summary.total_dependencies, 2);
        assert_eq!(report.summary.major, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.license_issues, 0);
        assert_eq!(report.outdated().count(), 1);
    }
}
