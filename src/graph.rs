//! Dependency graph construction and structural checks

use crate::types::{DuplicateVersion, PackageManifest};
use crate::version::{parse, ParsedVersion};
use chrono::Datelike;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;

/// Root node name used when a manifest has no project name
pub const DEFAULT_ROOT: &str = "root";

/// Directed graph of package names; an edge `a -> b` means `a` depends on `b`.
///
/// Nodes keep insertion order so traversal, and therefore reported cycles,
/// are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    adjacency: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>) {
        self.adjacency.entry(name.into()).or_default();
    }

    /// Add `from -> to`, creating both nodes as needed
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let to = to.into();
        self.add_node(to.clone());
        self.adjacency.entry(from.into()).or_default().insert(to);
    }

    /// Build from an adjacency map such as a resolved install tree
    pub fn from_adjacency<I, N, D, S>(adjacency: I) -> Self
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for (name, deps) in adjacency {
            let name = name.into();
            graph.add_node(name.clone());
            for dep in deps {
                graph.add_edge(name.clone(), dep);
            }
        }
        graph
    }

    /// Direct edges from the project root to each declared dependency
    pub fn from_manifest(manifest: &PackageManifest, include_dev: bool) -> Self {
        let root = if manifest.name.trim().is_empty() {
            DEFAULT_ROOT
        } else {
            manifest.name.as_str()
        };

        let mut graph = Self::new();
        graph.add_node(root);
        for entry in manifest.entries(include_dev) {
            graph.add_edge(root, entry.name);
        }
        graph
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.adjacency.keys().map(String::as_str)
    }

    pub fn dependencies_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.adjacency
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(IndexSet::len).sum()
    }

    /// Number of distinct packages reachable from `name`, excluding itself
    pub fn transitive_count(&self, name: &str) -> usize {
        let mut visited = HashSet::new();
        let mut to_visit = vec![name];

        while let Some(current) = to_visit.pop() {
            if !visited.insert(current) {
                continue;
            }
            to_visit.extend(self.dependencies_of(current));
        }

        visited.len().saturating_sub(1)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Find simple cycles with a depth-first traversal.
///
/// Each back edge to a node on the current path yields one cycle, written
/// from that node around to itself (`[a, b, c, a]`). Fully explored nodes
/// are never revisited, so the cost is linear in the number of edges. The
/// traversal keeps its own stack, so graph depth is not limited by the
/// thread's call stack.
///
/// # Examples
///
/// ```
/// use deps_inspect::graph::{detect_cycles, DependencyGraph};
///
/// let graph = DependencyGraph::from_adjacency([
///     ("a", vec!["b"]),
///     ("b", vec!["c"]),
///     ("c", vec!["a"]),
/// ]);
/// assert_eq!(detect_cycles(&graph), vec![vec!["a", "b", "c", "a"]]);
/// ```
pub fn detect_cycles(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let names: Vec<&str> = graph.nodes().collect();
    let edges: Vec<Vec<usize>> = graph
        .adjacency
        .values()
        .map(|deps| {
            deps.iter()
                .filter_map(|dep| graph.adjacency.get_index_of(dep))
                .collect()
        })
        .collect();

    let mut color = vec![Color::White; names.len()];
    // Position of each gray node on the current path
    let mut path_pos: Vec<Option<usize>> = vec![None; names.len()];
    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let mut cycles = Vec::new();

    for start in 0..names.len() {
        if color[start] != Color::White {
            continue;
        }

        // (node, index of the next outgoing edge to follow)
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        color[start] = Color::Gray;
        path_pos[start] = Some(0);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;

            let Some(&child) = edges[node].get(frame.1) else {
                color[node] = Color::Black;
                path_pos[node] = None;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match color[child] {
                Color::White => {
                    color[child] = Color::Gray;
                    path_pos[child] = Some(stack.len());
                    stack.push((child, 0));
                }
                Color::Gray => {
                    let Some(from) = path_pos[child] else {
                        continue;
                    };
                    let cycle: Vec<usize> = stack[from..].iter().map(|(n, _)| *n).collect();
                    if seen.insert(canonical_rotation(&cycle)) {
                        let mut named: Vec<String> =
                            cycle.iter().map(|&n| names[n].to_string()).collect();
                        named.push(names[child].to_string());
                        cycles.push(named);
                    }
                }
                Color::Black => {}
            }
        }
    }

    cycles
}

/// Rotation starting at the smallest node index, for de-duplication
fn canonical_rotation(cycle: &[usize]) -> Vec<usize> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, n)| **n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[start..].iter().chain(&cycle[..start]).copied().collect()
}

/// Report every package resolved to more than one distinct version.
///
/// Input is every resolved (installed) version instance per package name;
/// declared ranges must not be passed here. Versions in the output are
/// distinct and ascending.
///
/// # Examples
///
/// ```
/// use deps_inspect::graph::detect_duplicate_versions;
///
/// let dups = detect_duplicate_versions([("pkgA", vec!["1.0.1", "1.0.0", "1.0.0"])]);
/// assert_eq!(dups[0].versions, vec!["1.0.0", "1.0.1"]);
/// ```
pub fn detect_duplicate_versions<I, N, V, S>(occurrences: I) -> Vec<DuplicateVersion>
where
    I: IntoIterator<Item = (N, V)>,
    N: Into<String>,
    V: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut merged: IndexMap<String, IndexSet<String>> = IndexMap::new();

    for (name, versions) in occurrences {
        let distinct = merged.entry(name.into()).or_default();
        for version in versions {
            let version = version.into();
            if !version.trim().is_empty() {
                distinct.insert(version);
            }
        }
    }

    merged
        .into_iter()
        .filter(|(_, versions)| versions.len() > 1)
        .map(|(name, versions)| {
            let mut versions: Vec<String> = versions.into_iter().collect();
            versions.sort_by_cached_key(|v| duplicate_sort_key(v));
            DuplicateVersion { name, versions }
        })
        .collect()
}

/// Semver first, then dates, then anything else; string order breaks ties
fn duplicate_sort_key(version: &str) -> (u8, u64, u64, u64, semver::Prerelease, String) {
    match parse(version) {
        Some(ParsedVersion::Semver(v)) => (0, v.major, v.minor, v.patch, v.pre, version.to_string()),
        Some(ParsedVersion::Date(d)) => (
            1,
            u64::try_from(d.year()).unwrap_or(0),
            u64::from(d.month()),
            u64::from(d.day()),
            semver::Prerelease::EMPTY,
            version.to_string(),
        ),
        _ => (2, 0, 0, 0, semver::Prerelease::EMPTY, version.to_string()),
    }
}
