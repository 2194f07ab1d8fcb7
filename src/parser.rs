//! Parser for package.json and package-lock.json

use crate::error::{AnalysisError, Result};
use crate::graph::{DependencyGraph, DEFAULT_ROOT};
use crate::types::PackageManifest;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "package.json";
pub const LOCKFILE: &str = "package-lock.json";

/// Maximum number of parent directories searched for a workspace lockfile
const MAX_WORKSPACE_DEPTH: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    dependencies: IndexMap<String, String>,
    #[serde(default)]
    dev_dependencies: IndexMap<String, String>,
}

/// package-lock.json v2/v3 (only the fields used here)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageLockJson {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    lockfile_version: Option<u32>,
    #[serde(default)]
    packages: Option<IndexMap<String, LockEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: IndexMap<String, String>,
    #[serde(default)]
    dev_dependencies: IndexMap<String, String>,
    #[serde(default)]
    optional_dependencies: IndexMap<String, String>,
    #[serde(default)]
    peer_dependencies: IndexMap<String, String>,
}

impl LockEntry {
    fn dependency_names(&self, include_dev: bool) -> Vec<String> {
        let dev = include_dev.then_some(&self.dev_dependencies);
        self.dependencies
            .keys()
            .chain(self.optional_dependencies.keys())
            .chain(self.peer_dependencies.keys())
            .chain(dev.into_iter().flat_map(|deps| deps.keys()))
            .cloned()
            .collect()
    }
}

/// One installed package instance from the lockfile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Install location, e.g. `node_modules/a/node_modules/b`
    pub path: String,
    pub name: String,
    pub version: String,
    pub dependencies: Vec<String>,
}

/// Everything actually installed, as recorded by package-lock.json
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallTree {
    pub root_name: String,
    /// Lockfile key of the project root; empty unless it is a workspace member
    pub root_path: String,
    pub root_dependencies: Vec<String>,
    pub packages: Vec<InstalledPackage>,
}

impl InstallTree {
    /// Version the project itself resolves: its own `node_modules/<name>`,
    /// or for a workspace member the copy hoisted to the workspace root
    pub fn resolved_version(&self, name: &str) -> Option<&str> {
        let hoisted = format!("node_modules/{}", name);
        let local = (!self.root_path.is_empty())
            .then(|| format!("{}/node_modules/{}", self.root_path, name));

        let find = |path: &str| {
            self.packages
                .iter()
                .find(|p| p.path == path)
                .map(|p| p.version.as_str())
        };
        local.as_deref().and_then(find).or_else(|| find(&hoisted))
    }

    /// Every installed version of every package, in lockfile order
    pub fn versions_by_name(&self) -> IndexMap<String, Vec<String>> {
        let mut versions: IndexMap<String, Vec<String>> = IndexMap::new();
        for package in &self.packages {
            versions
                .entry(package.name.clone())
                .or_default()
                .push(package.version.clone());
        }
        versions
    }

    /// Package-name dependency graph rooted at the project
    pub fn to_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_node(self.root_name.clone());
        for dep in &self.root_dependencies {
            graph.add_edge(self.root_name.clone(), dep.clone());
        }
        for package in &self.packages {
            graph.add_node(package.name.clone());
            for dep in &package.dependencies {
                graph.add_edge(package.name.clone(), dep.clone());
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Read and parse a package.json file
pub fn read_manifest(path: &Path) -> Result<PackageManifest> {
    if !path.exists() {
        return Err(AnalysisError::parse(
            path.display().to_string(),
            "file not found",
        ));
    }
    let content = std::fs::read_to_string(path)?;
    parse_manifest(&content).map_err(|e| relabel(e, path))
}

/// Parse package.json contents
pub fn parse_manifest(content: &str) -> Result<PackageManifest> {
    let package: PackageJson = serde_json::from_str(content)
        .map_err(|e| AnalysisError::parse(MANIFEST_FILE, e.to_string()))?;

    let name = package
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ROOT.to_string());

    Ok(PackageManifest {
        name,
        dependencies: package.dependencies,
        dev_dependencies: package.dev_dependencies,
    })
}

/// Read and parse a package-lock.json file
pub fn read_install_tree(path: &Path, include_dev: bool) -> Result<InstallTree> {
    debug!("Parsing lockfile: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let tree = parse_install_tree(&content, include_dev).map_err(|e| relabel(e, path))?;
    debug!("Parsed {} installed packages from {}", tree.len(), path.display());
    Ok(tree)
}

/// Read the install tree of the project whose manifest is `manifest_path`.
///
/// When `lockfile` belongs to a parent workspace, the tree is rooted at the
/// member's own lockfile entry (e.g. `packages/web`) instead of the
/// workspace root.
pub fn read_project_install_tree(
    manifest_path: &Path,
    lockfile: &Path,
    include_dev: bool,
) -> Result<InstallTree> {
    let member = workspace_member_key(manifest_path, lockfile);
    if !member.is_empty() {
        debug!("Rooting {} at workspace member '{}'", lockfile.display(), member);
    }
    let content = std::fs::read_to_string(lockfile)?;
    let tree = parse_rooted(&content, &member, include_dev).map_err(|e| relabel(e, lockfile))?;
    debug!("Parsed {} installed packages from {}", tree.len(), lockfile.display());
    Ok(tree)
}

/// Lockfile key of the manifest's directory relative to the lockfile's
fn workspace_member_key(manifest_path: &Path, lockfile: &Path) -> String {
    let (Some(manifest_dir), Some(lock_dir)) = (manifest_path.parent(), lockfile.parent()) else {
        return String::new();
    };
    match manifest_dir.strip_prefix(lock_dir) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => String::new(),
    }
}

/// Parse package-lock.json contents (lockfile versions 2 and 3).
///
/// Development-only root dependencies are followed when `include_dev` is set.
pub fn parse_install_tree(content: &str, include_dev: bool) -> Result<InstallTree> {
    parse_rooted(content, "", include_dev)
}

/// Parse a lockfile with the entry at `root_key` as the project root
fn parse_rooted(content: &str, root_key: &str, include_dev: bool) -> Result<InstallTree> {
    let lock: PackageLockJson = serde_json::from_str(content)
        .map_err(|e| AnalysisError::parse(LOCKFILE, e.to_string()))?;

    let Some(entries) = lock.packages else {
        return Err(AnalysisError::parse(
            LOCKFILE,
            format!(
                "lockfileVersion {} has no \"packages\" section; regenerate it with npm 7 or newer",
                lock.lockfile_version.unwrap_or(1)
            ),
        ));
    };

    let root_key = if root_key.is_empty() || entries.contains_key(root_key) {
        root_key
    } else {
        warn!("Workspace member '{}' is not in {}; using its root", root_key, LOCKFILE);
        ""
    };

    let lock_name = lock.name.filter(|n| !n.is_empty());
    let mut tree = InstallTree {
        root_name: match (root_key.is_empty(), lock_name) {
            (true, Some(name)) => name,
            _ => DEFAULT_ROOT.to_string(),
        },
        root_path: root_key.to_string(),
        ..InstallTree::default()
    };

    for (path, entry) in entries {
        if path == root_key {
            if let Some(name) = entry.name.as_deref().filter(|n| !n.is_empty()) {
                tree.root_name = name.to_string();
            }
            tree.root_dependencies = entry.dependency_names(include_dev);
            continue;
        }
        if path.is_empty() {
            // Workspace root of a member-rooted tree
            continue;
        }

        let Some(version) = entry.version.clone() else {
            debug!("Skipping lockfile entry '{}' with no version", path);
            continue;
        };

        let name = match entry.name.clone() {
            Some(name) => name,
            None => extract_package_name(&path).to_string(),
        };

        tree.packages.push(InstalledPackage {
            dependencies: entry.dependency_names(false),
            path,
            name,
            version,
        });
    }

    Ok(tree)
}

/// Package name from a lockfile key.
///
/// - `"node_modules/express"` → `"express"`
/// - `"node_modules/@babel/core"` → `"@babel/core"`
/// - `"node_modules/a/node_modules/debug"` → `"debug"`
fn extract_package_name(key: &str) -> &str {
    key.rsplit("node_modules/").next().unwrap_or(key)
}

/// Find the lockfile next to a manifest or in a parent workspace directory
pub fn locate_lockfile(manifest_path: &Path) -> Option<PathBuf> {
    let lock_path = manifest_path.with_file_name(LOCKFILE);
    if lock_path.exists() {
        debug!("Found {} at: {}", LOCKFILE, lock_path.display());
        return Some(lock_path);
    }

    let mut current_dir = manifest_path.parent()?;
    for depth in 0..MAX_WORKSPACE_DEPTH {
        current_dir = current_dir.parent()?;
        let workspace_lock = current_dir.join(LOCKFILE);
        if workspace_lock.exists() {
            debug!(
                "Found workspace {} at depth {}: {}",
                LOCKFILE,
                depth + 1,
                workspace_lock.display()
            );
            return Some(workspace_lock);
        }
    }

    debug!("No {} found for {}", LOCKFILE, manifest_path.display());
    None
}

fn relabel(error: AnalysisError, path: &Path) -> AnalysisError {
    match error {
        AnalysisError::ParseError { message, .. } => {
            AnalysisError::parse(path.display().to_string(), message)
        }
        other => other,
    }
}
