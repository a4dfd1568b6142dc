// src/resolver/mod.rs

//! Load order resolution
//!
//! Turns a set of packages with dependency, optional dependency and
//! conflict declarations into a deterministic activation order:
//!
//! 1. Conflicts are made symmetric in a [`ConstraintGraph`].
//! 2. Conflicting packages are excluded greedily, in descending name order,
//!    while any package they conflict with is still activatable.
//! 3. Optional dependencies on packages that survived step 2 become ordering
//!    constraints.
//! 4. The previous order is replayed as far as it stays valid.
//! 5. The remaining packages are added by repeated passes in ascending name
//!    order until a pass makes no progress.
//!
//! Whatever is left is unsatisfiable and reported with a reason. Nothing in
//! here fails: unresolvable packages are excluded and the rest still loads.

mod conflict;
mod graph;
mod order;

pub use conflict::{Unresolved, UnresolvedReason};
pub use graph::{ConstraintGraph, Dependencies, GraphStats};
pub use order::{load_order, save_order};

use crate::package::PackageDescriptor;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Result of resolving a package set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Activation order; every package follows its dependencies
    pub order: Vec<String>,
    /// Conflict exclusions first, then unsatisfiable packages
    pub unresolved: Vec<Unresolved>,
    /// Shape of the graph the order was resolved from
    pub stats: GraphStats,
}

impl Resolution {
    pub fn is_unresolved(&self, name: &str) -> bool {
        self.unresolved.iter().any(|u| u.name == name)
    }
}

/// Resolve a load order, using `previous` as a stability seed
pub fn resolve(
    descriptors: &BTreeMap<String, PackageDescriptor>,
    previous: &[String],
) -> Resolution {
    let graph = ConstraintGraph::build(descriptors);
    let mut resolution = Resolution {
        stats: graph.stats(),
        ..Default::default()
    };
    debug!("Constraint graph: {:?}", resolution.stats);

    let mut pool: BTreeSet<String> = descriptors.keys().cloned().collect();
    exclude_conflicts(&graph, &mut pool, &mut resolution.unresolved);

    let deps = graph.activation_dependencies(&pool);
    let mut loaded = BTreeSet::new();

    for name in previous {
        if pool.contains(name) && !loaded.contains(name) && deps.satisfied_by(name, &loaded) {
            loaded.insert(name.clone());
            resolution.order.push(name.clone());
        }
    }
    debug!("Seeded {} packages from the previous order", resolution.order.len());

    // Descending, scanned from the back: each pass visits names in ascending order
    let mut remaining: Vec<String> = pool
        .iter()
        .rev()
        .filter(|name| !loaded.contains(*name))
        .cloned()
        .collect();

    loop {
        let mut progress = false;
        let mut i = remaining.len();
        while i > 0 {
            i -= 1;
            if deps.satisfied_by(&remaining[i], &loaded) {
                let name = remaining.remove(i);
                loaded.insert(name.clone());
                resolution.order.push(name);
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }

    let stuck: BTreeSet<String> = remaining.iter().cloned().collect();
    for name in remaining {
        let reason = diagnose(&name, &graph, &deps, &pool, &stuck);
        warn!("Package {} cannot be loaded: {}", name, reason);
        resolution.unresolved.push(Unresolved { name, reason });
    }

    info!(
        "Resolved load order: {} packages, {} unresolved",
        resolution.order.len(),
        resolution.unresolved.len()
    );
    resolution
}

/// Remove every package that conflicts with a package still in the pool
fn exclude_conflicts(
    graph: &ConstraintGraph,
    pool: &mut BTreeSet<String>,
    unresolved: &mut Vec<Unresolved>,
) {
    let names: Vec<String> = pool.iter().rev().cloned().collect();
    for name in names {
        let with: Vec<String> = graph
            .conflicts_of(&name)
            .filter(|other| pool.contains(*other))
            .cloned()
            .collect();
        if with.is_empty() {
            continue;
        }

        warn!("Package {} conflicts with {}", name, with.join(", "));
        pool.remove(&name);
        unresolved.push(Unresolved {
            name,
            reason: UnresolvedReason::Conflict { with },
        });
    }
}

fn diagnose(
    name: &str,
    graph: &ConstraintGraph,
    deps: &Dependencies,
    pool: &BTreeSet<String>,
    stuck: &BTreeSet<String>,
) -> UnresolvedReason {
    let missing: Vec<String> = graph
        .declared_dependencies(name)
        .filter(|dep| !graph.contains(dep))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return UnresolvedReason::MissingDependency { missing };
    }

    if let Some(cycle) = deps.detect_cycle_involving(name, stuck) {
        return UnresolvedReason::CircularDependency { cycle };
    }

    let blockers = deps
        .of(name)
        .filter(|dep| stuck.contains(*dep) || !pool.contains(*dep))
        .cloned()
        .collect();
    UnresolvedReason::BlockedByUnresolved { blockers }
}
