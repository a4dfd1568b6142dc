// src/resolver/conflict.rs

//! Reasons a package cannot be activated

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// Conflicts with packages that stay activatable
    Conflict { with: Vec<String> },
    /// Depends on packages that were never discovered
    MissingDependency { missing: Vec<String> },
    /// Part of a dependency cycle; the cycle starts and ends with the package
    CircularDependency { cycle: Vec<String> },
    /// Depends on packages that could not be activated themselves
    BlockedByUnresolved { blockers: Vec<String> },
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::Conflict { with } => {
                write!(f, "conflicts with {}", with.join(", "))
            }
            UnresolvedReason::MissingDependency { missing } => {
                write!(f, "missing dependencies {}", missing.join(", "))
            }
            UnresolvedReason::CircularDependency { cycle } => {
                write!(f, "circular dependency: {}", cycle.join(" -> "))
            }
            UnresolvedReason::BlockedByUnresolved { blockers } => {
                write!(f, "depends on unresolved {}", blockers.join(", "))
            }
        }
    }
}

/// A package left out of the load order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub name: String,
    pub reason: UnresolvedReason,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let unresolved = Unresolved {
            name: "A".to_string(),
            reason: UnresolvedReason::CircularDependency {
                cycle: vec!["A".to_string(), "B".to_string(), "A".to_string()],
            },
        };
        assert_eq!(unresolved.to_string(), "A: circular dependency: A -> B -> A");

        let reason = UnresolvedReason::MissingDependency {
            missing: vec!["Core".to_string(), "Extras".to_string()],
        };
        assert_eq!(reason.to_string(), "missing dependencies Core, Extras");
    }
}
