// src/cache/mod.rs

//! Persistent, invalidation-aware caches
//!
//! Both caches address resources by [`CacheKey`] and detect change through
//! [`VersionFingerprint`]s:
//! - [`MergeCache`] memoizes the result of applying an ordered patch chain
//!   to a base document.
//! - [`MetadataIndexCache`] remembers which resources are already present in
//!   the metadata index and at which fingerprint.
//!
//! Each cache persists to its own file. A missing or corrupt file is never
//! fatal: the affected cache starts empty and rebuilds.

mod fingerprint;
pub mod index;
pub mod merge;
pub(crate) mod store;

pub use fingerprint::{FingerprintMode, VersionFingerprint};
pub use index::{IndexCandidate, IndexPlan, MetadataIndexCache};
pub use merge::{CleanOutcome, MergeCache, MergeOutcome, PatchFailure};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical address of a resource, independent of the file that provides it
///
/// Several packages may provide the same key; the one activated last wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub resource_type: String,
    pub id: String,
}

impl CacheKey {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}
