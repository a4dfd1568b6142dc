// src/resolver/graph.rs

//! Constraint graph over discovered packages
//!
//! Built once from the descriptors and read-only afterwards. Conflicts are
//! stored symmetrically: declaring a conflict on either side is enough.

use crate::package::PackageDescriptor;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct ConstraintGraph {
    depends: BTreeMap<String, BTreeSet<String>>,
    optional: BTreeMap<String, BTreeSet<String>>,
    conflicts: BTreeMap<String, BTreeSet<String>>,
}

impl ConstraintGraph {
    pub fn build(descriptors: &BTreeMap<String, PackageDescriptor>) -> Self {
        let mut graph = Self::default();

        for (name, descriptor) in descriptors {
            graph
                .depends
                .insert(name.clone(), descriptor.depends_on.clone());
            graph
                .optional
                .insert(name.clone(), descriptor.optionally_depends_on.clone());

            for other in &descriptor.conflicts_with {
                if other == name {
                    continue;
                }
                graph
                    .conflicts
                    .entry(name.clone())
                    .or_default()
                    .insert(other.clone());
                graph
                    .conflicts
                    .entry(other.clone())
                    .or_default()
                    .insert(name.clone());
            }
        }

        graph
    }

    pub fn contains(&self, name: &str) -> bool {
        self.depends.contains_key(name)
    }

    /// Packages in conflict with `name`, in either direction
    pub fn conflicts_of(&self, name: &str) -> impl Iterator<Item = &String> {
        self.conflicts.get(name).into_iter().flatten()
    }

    pub fn declared_dependencies(&self, name: &str) -> impl Iterator<Item = &String> {
        self.depends.get(name).into_iter().flatten()
    }

    /// Ordering constraints among the packages in `pool`: hard dependencies
    /// plus optional dependencies on packages that are in the pool
    pub fn activation_dependencies(&self, pool: &BTreeSet<String>) -> Dependencies {
        let edges = pool
            .iter()
            .map(|name| {
                let mut deps: BTreeSet<String> =
                    self.declared_dependencies(name).cloned().collect();
                deps.extend(
                    self.optional
                        .get(name)
                        .into_iter()
                        .flatten()
                        .filter(|optional| pool.contains(*optional))
                        .cloned(),
                );
                (name.clone(), deps)
            })
            .collect();

        Dependencies { edges }
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            total_packages: self.depends.len(),
            total_dependencies: self.depends.values().map(BTreeSet::len).sum(),
            optional_dependencies: self.optional.values().map(BTreeSet::len).sum(),
            conflict_pairs: self.conflicts.values().map(BTreeSet::len).sum::<usize>() / 2,
        }
    }
}

/// Effective dependency edges of the activatable pool
#[derive(Debug, Default)]
pub struct Dependencies {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl Dependencies {
    pub fn of(&self, name: &str) -> impl Iterator<Item = &String> {
        self.edges.get(name).into_iter().flatten()
    }

    pub fn satisfied_by(&self, name: &str, loaded: &BTreeSet<String>) -> bool {
        self.of(name).all(|dep| loaded.contains(dep))
    }

    /// Find a cycle through `name` using only packages in `within`
    ///
    /// The returned cycle starts and ends with `name`.
    pub fn detect_cycle_involving(
        &self,
        name: &str,
        within: &BTreeSet<String>,
    ) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut path = vec![name.to_string()];

        if self.dfs_path_to(name, name, within, &mut visited, &mut path) {
            return Some(path);
        }
        None
    }

    /// DFS helper: extend `path` from `from` until it reaches `target`
    fn dfs_path_to(
        &self,
        from: &str,
        target: &str,
        within: &BTreeSet<String>,
        visited: &mut BTreeSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        for dep in self.of(from) {
            if dep == target {
                path.push(dep.clone());
                return true;
            }
            if !within.contains(dep) || !visited.insert(dep.clone()) {
                continue;
            }

            path.push(dep.clone());
            if self.dfs_path_to(dep, target, within, visited, path) {
                return true;
            }
            path.pop();
        }
        false
    }
}

/// Statistics about the constraint graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub total_packages: usize,
    pub total_dependencies: usize,
    pub optional_dependencies: usize,
    pub conflict_pairs: usize,
}
