// src/cache/merge.rs

//! Merge result caching
//!
//! A merged document is a pure function of its base and its ordered patch
//! chain, so results are keyed by the full chain:
//! - the base resource's fingerprint
//! - every patch's `CacheKey`, origin package, source file and fingerprint,
//!   in application order
//!
//! Patch order is package activation order, then declaration order within a
//! package. Any difference in the chain (count, order, identity, fingerprint)
//! invalidates that one target only.
//!
//! Merged documents are stored content-addressed under the merged directory,
//! named by the SHA-256 chain digest and sharded by its first two
//! characters. The record list
//! itself lives in a single JSON file.

use super::store::{read_json, remove_if_exists, write_atomic, write_json_atomic};
use super::{CacheKey, FingerprintMode, VersionFingerprint};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::manifest::EntrySet;
use crate::merge::{DocumentMerger, MergeError, Patch};
use crate::package::Entry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One link of a merge chain
///
/// Two patches with equal fingerprints are still different links when they
/// come from different packages or files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub key: CacheKey,
    pub origin: String,
    pub source: PathBuf,
    pub fingerprint: VersionFingerprint,
}

impl ChainLink {
    fn of(entry: &Entry, fingerprint: VersionFingerprint) -> Self {
        Self {
            key: entry.key.clone(),
            origin: entry.origin.to_string(),
            source: entry.source_path.clone(),
            fingerprint,
        }
    }

    fn label(&self) -> String {
        format!("patch:{}:{}:{}", self.origin, self.key, self.source.display())
    }
}

/// A persisted merge result
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MergeRecord {
    target: CacheKey,
    base: VersionFingerprint,
    patches: Vec<ChainLink>,
    /// Location of the merged document, relative to the merged directory
    content: String,
}

/// The chain a target has in the current run
#[derive(Debug, Clone)]
struct Chain {
    base: VersionFingerprint,
    links: Vec<ChainLink>,
    /// Patch entries aligned with `links`
    patches: Vec<Entry>,
    digest: Hash,
    fingerprint: VersionFingerprint,
}

impl Chain {
    fn matches(&self, record: &MergeRecord) -> bool {
        self.base == record.base && self.links == record.patches
    }
}

/// Result of reconciling the cache against the complete entry set
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanOutcome {
    /// A previously merged target lost all of its patches, so whatever was
    /// indexed for it no longer reflects the plain base resource
    pub needs_base_rebuild: bool,
    /// Targets whose merge must be (re)computed this run
    pub preload: BTreeSet<CacheKey>,
    /// Targets that have patches but no base resource to apply them to
    pub orphaned: Vec<CacheKey>,
}

/// One patch that could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFailure {
    pub target: CacheKey,
    pub patch: CacheKey,
    pub source_path: PathBuf,
    pub reason: String,
}

/// Outcome of producing a target's merged content
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub content: String,
    /// Patches that were skipped; when non-empty the chain was not recorded
    pub failed: Vec<PatchFailure>,
    /// Whether the content came from the cache without merging
    pub cached: bool,
}

/// Summary of the persisted cache
#[derive(Debug, Clone, Default)]
pub struct MergeCacheStats {
    pub records: usize,
    pub patches: usize,
    pub stored_bytes: u64,
}

/// Memoizes merged documents across runs
#[derive(Debug)]
pub struct MergeCache {
    cache_file: PathBuf,
    merged_dir: PathBuf,
    mode: FingerprintMode,
    records: BTreeMap<CacheKey, MergeRecord>,
    /// Patches registered this run, per target, in application order
    pending: BTreeMap<CacheKey, Vec<Entry>>,
    chains: BTreeMap<CacheKey, Chain>,
    dirty: bool,
}

impl MergeCache {
    /// Open the cache; a missing or corrupt record file yields an empty cache
    pub fn open(cache_file: &Path, merged_dir: &Path, mode: FingerprintMode) -> Self {
        let records: Vec<MergeRecord> = read_json(cache_file, "merge cache").unwrap_or_default();
        let records: BTreeMap<_, _> = records
            .into_iter()
            .map(|record| (record.target.clone(), record))
            .collect();

        debug!("Loaded {} merge cache records", records.len());

        Self {
            cache_file: cache_file.to_path_buf(),
            merged_dir: merged_dir.to_path_buf(),
            mode,
            records,
            pending: BTreeMap::new(),
            chains: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Register a patch for its target; only JSON entries can patch
    pub fn add_patch(&mut self, entry: Entry) -> bool {
        if !entry.is_json() {
            warn!("Ignoring non-JSON merge patch {}", entry);
            return false;
        }
        self.pending.entry(entry.key.clone()).or_default().push(entry);
        true
    }

    pub fn has_merges(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_patched(&self, target: &CacheKey) -> bool {
        self.pending.contains_key(target)
    }

    /// Targets patched this run
    pub fn targets(&self) -> impl Iterator<Item = &CacheKey> {
        self.pending.keys()
    }

    /// Fingerprint of a target's current chain, once reconciled
    pub fn chain_fingerprint(&self, target: &CacheKey) -> Option<&VersionFingerprint> {
        self.chains.get(target).map(|chain| &chain.fingerprint)
    }

    /// Compare the persisted records with the chains the current entry set
    /// produces
    ///
    /// Records for targets that are gone or no longer patched are dropped.
    /// Targets without a valid record are returned for preloading; their old
    /// record stays until a successful merge replaces it.
    pub fn clean_with_complete_entry_set(&mut self, entries: &EntrySet) -> CleanOutcome {
        let mut outcome = CleanOutcome::default();
        self.chains.clear();

        let stale: Vec<CacheKey> = self
            .records
            .keys()
            .filter(|target| {
                !self.pending.contains_key(*target) || entries.resource(target).is_none()
            })
            .cloned()
            .collect();
        for target in stale {
            debug!("Dropping merge record for {}, it is no longer patched", target);
            self.drop_record(&target);
            outcome.needs_base_rebuild = true;
        }

        for (target, patches) in &self.pending {
            let Some(base) = entries.resource(target) else {
                warn!(
                    "{} is patched by {} but no such resource exists",
                    target,
                    patches[0].origin
                );
                outcome.orphaned.push(target.clone());
                continue;
            };

            let base_fingerprint = match base.fingerprint(self.mode) {
                Ok(fingerprint) => fingerprint.clone(),
                Err(e) => {
                    warn!("Cannot fingerprint base {}: {}", base, e);
                    outcome.orphaned.push(target.clone());
                    continue;
                }
            };

            let chain = build_chain(target, base_fingerprint, patches, self.mode);
            let valid = self
                .records
                .get(target)
                .is_some_and(|record| chain.matches(record));
            if !valid {
                outcome.preload.insert(target.clone());
            }
            self.chains.insert(target.clone(), chain);
        }

        info!(
            "Merge cache: {} patched targets, {} to merge",
            self.chains.len(),
            outcome.preload.len()
        );
        outcome
    }

    /// Cached merged content for a target, if its current chain is recorded
    pub fn merged_content(&self, target: &CacheKey) -> Option<String> {
        let chain = self.chains.get(target)?;
        let record = self.records.get(target)?;
        if !chain.matches(record) {
            return None;
        }

        let path = self.merged_dir.join(&record.content);
        match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("Cached merge for {} unreadable at {}: {}", target, path.display(), e);
                None
            }
        }
    }

    /// Produce the merged content of a target, reusing the cache when its
    /// chain is unchanged
    ///
    /// Patches that fail are logged and skipped; the remaining ones still
    /// apply in order. A merge with failures is returned but not recorded, so
    /// it is attempted again next run.
    pub fn merge_and_cache<M: DocumentMerger>(
        &mut self,
        target: &CacheKey,
        base_content: &str,
        merger: &M,
    ) -> Result<MergeOutcome> {
        if let Some(content) = self.merged_content(target) {
            debug!("Merge cache hit: {}", target);
            return Ok(MergeOutcome {
                content,
                failed: Vec::new(),
                cached: true,
            });
        }

        let chain = self
            .chains
            .get(target)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no merge chain for {}", target)))?;

        let mut document: serde_json::Value =
            serde_json::from_str(base_content).map_err(|source| MergeError::Malformed {
                patch: format!("base of {}", target),
                source,
            })?;

        let mut failed = Vec::new();
        for entry in &chain.patches {
            match apply_patch(document.clone(), entry, merger) {
                Ok(merged) => document = merged,
                Err(e) => {
                    warn!("Skipping patch for {}: {}", target, e);
                    failed.push(PatchFailure {
                        target: target.clone(),
                        patch: entry.key.clone(),
                        source_path: entry.source_path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let content = serde_json::to_string_pretty(&document)?;

        if failed.is_empty() {
            self.store(target, &chain, &content)?;
        }

        Ok(MergeOutcome {
            content,
            failed,
            cached: false,
        })
    }

    fn store(&mut self, target: &CacheKey, chain: &Chain, content: &str) -> Result<()> {
        let digest = &chain.digest;
        let relative = format!("{}/{}.json", digest.shard(), digest);
        write_atomic(&self.merged_dir.join(&relative), content.as_bytes())?;

        if let Some(old) = self.records.get(target)
            && old.content != relative
        {
            remove_if_exists(&self.merged_dir.join(&old.content))?;
        }

        debug!(
            "Cached merge of {} as {} {}",
            target,
            digest.algorithm,
            &digest.value[..16]
        );
        self.records.insert(
            target.clone(),
            MergeRecord {
                target: target.clone(),
                base: chain.base.clone(),
                patches: chain.links.clone(),
                content: relative,
            },
        );
        self.dirty = true;
        Ok(())
    }

    fn drop_record(&mut self, target: &CacheKey) {
        if let Some(record) = self.records.remove(target) {
            if let Err(e) = remove_if_exists(&self.merged_dir.join(&record.content)) {
                warn!("Failed to remove cached merge of {}: {}", target, e);
            }
            self.dirty = true;
        }
    }

    /// Persist the record list; does nothing when nothing changed
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            debug!("Merge cache unchanged, not saving");
            return Ok(());
        }

        let records: Vec<&MergeRecord> = self.records.values().collect();
        write_json_atomic(&self.cache_file, &records)?;
        self.dirty = false;
        info!("Saved {} merge cache records", records.len());
        Ok(())
    }

    pub fn stats(&self) -> MergeCacheStats {
        let mut stats = MergeCacheStats {
            records: self.records.len(),
            ..Default::default()
        };
        for record in self.records.values() {
            stats.patches += record.patches.len();
            if let Ok(metadata) = fs::metadata(self.merged_dir.join(&record.content)) {
                stats.stored_bytes += metadata.len();
            }
        }
        stats
    }

    /// Remove every record and stored document
    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.records.len();
        self.records.clear();
        self.chains.clear();

        if self.merged_dir.exists() {
            fs::remove_dir_all(&self.merged_dir)?;
        }
        remove_if_exists(&self.cache_file)?;
        self.dirty = false;

        info!("Cleared {} merge cache records", removed);
        Ok(removed)
    }
}

fn build_chain(
    target: &CacheKey,
    base: VersionFingerprint,
    patches: &[Entry],
    mode: FingerprintMode,
) -> Chain {
    let mut links = Vec::with_capacity(patches.len());
    let mut kept = Vec::with_capacity(patches.len());
    for entry in patches {
        match entry.fingerprint(mode) {
            Ok(fingerprint) => {
                links.push(ChainLink::of(entry, fingerprint.clone()));
                kept.push(entry.clone());
            }
            Err(e) => warn!("Skipping unreadable patch {}: {}", entry, e),
        }
    }

    let digest = VersionFingerprint::chain_digest(
        std::iter::once((format!("base:{}", target), &base))
            .chain(links.iter().map(|link| (link.label(), &link.fingerprint))),
    );

    Chain {
        base,
        links,
        patches: kept,
        fingerprint: VersionFingerprint::composite(&digest),
        digest,
    }
}

fn apply_patch<M: DocumentMerger>(
    base: serde_json::Value,
    entry: &Entry,
    merger: &M,
) -> std::result::Result<serde_json::Value, MergeError> {
    let identity = entry.to_string();
    let text = entry.read_text().map_err(|source| MergeError::Unreadable {
        patch: identity.clone(),
        source,
    })?;
    let document: serde_json::Value =
        serde_json::from_str(&text).map_err(|source| MergeError::Malformed {
            patch: identity,
            source,
        })?;

    merger.merge(
        base,
        &Patch {
            key: &entry.key,
            source: &entry.source_path,
            document: &document,
            format: entry.patch_format,
        },
    )
}
