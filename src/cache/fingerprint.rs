// src/cache/fingerprint.rs

//! Version fingerprints
//!
//! A fingerprint is a comparable snapshot of a resource's mutation state.
//! Equal fingerprints mean the producing content is identical; any change
//! must produce a different fingerprint.

use crate::hash::{hash_file, Hash, HashAlgorithm, Hasher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// How file fingerprints are taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Size and modification time (cheap, the default)
    #[default]
    Metadata,
    /// Size and XXH128 digest of the content
    Content,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionFingerprint {
    Metadata { size: u64, modified_ns: u64 },
    Content { size: u64, digest: String },
    /// Derived from an ordered list of other fingerprints (a merge chain)
    Composite { digest: String },
    /// Recorded for a resource whose indexed content is known to be out of
    /// date or partial; equal to no candidate, so it is always re-indexed
    Incomplete,
}

impl VersionFingerprint {
    /// Fingerprint a file on disk
    pub fn of_file(path: &Path, mode: FingerprintMode) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let size = metadata.len();

        match mode {
            FingerprintMode::Metadata => {
                let modified_ns = metadata
                    .modified()?
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or(0);
                Ok(Self::Metadata { size, modified_ns })
            }
            FingerprintMode::Content => {
                let digest = hash_file(HashAlgorithm::Xxh128, path)?;
                Ok(Self::Content {
                    size,
                    digest: digest.value,
                })
            }
        }
    }

    /// SHA-256 over labelled fingerprints, in order
    ///
    /// Reordering, adding or removing a part changes the result.
    pub fn chain_digest<'a, I>(parts: I) -> Hash
    where
        I: IntoIterator<Item = (String, &'a VersionFingerprint)>,
    {
        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        for (label, fingerprint) in parts {
            hasher.update_field(&label, &fingerprint.to_string());
        }
        hasher.finalize()
    }

    pub fn composite(digest: &Hash) -> Self {
        Self::Composite {
            digest: digest.value.clone(),
        }
    }
}

impl fmt::Display for VersionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata { size, modified_ns } => write!(f, "meta:{}:{}", size, modified_ns),
            Self::Content { size, digest } => write!(f, "content:{}:{}", size, digest),
            Self::Composite { digest } => write!(f, "chain:{}", digest),
            Self::Incomplete => write!(f, "incomplete"),
        }
    }
}
