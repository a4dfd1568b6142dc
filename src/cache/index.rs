// src/cache/index.rs

//! Index cache
//!
//! Remembers, per [`CacheKey`], the fingerprint a resource had when it was
//! last written to the metadata index. Each run the cache is reconciled with
//! the complete set of live resources:
//!
//! - unknown resources are queued for indexing (baseline resources excepted,
//!   the baseline index already holds them)
//! - resources whose fingerprint changed are queued again
//! - cached resources that no longer exist are leftovers
//!
//! A resource whose indexed content is out of date or partial is kept with
//! the [`VersionFingerprint::Incomplete`] sentinel rather than forgotten, so
//! it keeps being offered until a complete version is indexed. This matters
//! for baseline resources, which are never offered when absent from the cache.
//!
//! The index storage cannot delete cheaply, so a single leftover forces a
//! rebuild: the baseline index is copied back and every non-baseline
//! resource is indexed again.

use super::store::{read_json, remove_if_exists, write_json_atomic};
use super::{CacheKey, VersionFingerprint};
use crate::error::Result;
use crate::index::{IndexError, MetadataIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persisted form: a flat list
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedItem {
    key: CacheKey,
    fingerprint: VersionFingerprint,
}

#[derive(Debug, Clone)]
struct CacheItem {
    fingerprint: VersionFingerprint,
    touched: bool,
}

/// A live resource offered for indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCandidate {
    pub key: CacheKey,
    pub fingerprint: VersionFingerprint,
    /// Unmodified baseline content, already present in the baseline index
    pub is_baseline: bool,
}

/// What reconciliation decided
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPlan {
    pub rebuild_required: bool,
    /// Keys to index this run, in key order
    pub pending: Vec<CacheKey>,
    /// Cached keys whose fingerprint changed
    pub stale: Vec<CacheKey>,
    /// Keys never indexed before
    pub missing: Vec<CacheKey>,
    /// Cached keys with no live resource
    pub leftovers: Vec<CacheKey>,
}

#[derive(Debug)]
pub struct MetadataIndexCache {
    cache_path: PathBuf,
    index_path: PathBuf,
    items: BTreeMap<CacheKey, CacheItem>,
    ignored: BTreeSet<CacheKey>,
    has_changes: bool,
    force_save: bool,
    needs_reset: bool,
    cache_file_removed: bool,
}

impl MetadataIndexCache {
    /// Load the cache file
    ///
    /// A missing or corrupt cache file, or a missing index database, means
    /// nothing is known about the index contents; it is reset from the
    /// baseline on [`prepare`](Self::prepare).
    pub fn open(cache_path: &Path, index_path: &Path) -> Self {
        let persisted: Option<Vec<PersistedItem>> = read_json(cache_path, "index cache");
        let needs_reset = persisted.is_none() || !index_path.exists();

        let items: BTreeMap<_, _> = persisted
            .unwrap_or_default()
            .into_iter()
            .map(|item| {
                (
                    item.key,
                    CacheItem {
                        fingerprint: item.fingerprint,
                        touched: false,
                    },
                )
            })
            .collect();

        debug!(
            "Loaded {} index cache items{}",
            items.len(),
            if needs_reset { ", index will be reset" } else { "" }
        );

        Self {
            cache_path: cache_path.to_path_buf(),
            index_path: index_path.to_path_buf(),
            items,
            ignored: BTreeSet::new(),
            has_changes: false,
            force_save: false,
            needs_reset,
            cache_file_removed: false,
        }
    }

    /// Rewrite the cache and index at persist even when nothing changed
    pub fn set_force_save(&mut self, force: bool) {
        self.force_save = force;
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys whose indexed content is waiting to be replaced
    pub fn incomplete(&self) -> usize {
        self.items
            .values()
            .filter(|item| item.fingerprint == VersionFingerprint::Incomplete)
            .count()
    }

    /// Load the index, first resetting it to the baseline if the cache
    /// cannot vouch for its contents
    pub fn prepare<I: MetadataIndex>(&mut self, index: &mut I) -> Result<()> {
        if self.needs_reset {
            info!("Resetting metadata index from baseline");
            self.reset(index)?;
            self.needs_reset = false;
        } else {
            index.reload_from_disk()?;
        }
        Ok(())
    }

    /// Exclude a key from indexing for this run
    pub fn mark_ignored(&mut self, key: CacheKey) {
        self.ignored.insert(key);
    }

    /// Undo [`mark_ignored`](Self::mark_ignored), when a later contribution
    /// for the key asks to be indexed
    pub fn unmark_ignored(&mut self, key: &CacheKey) {
        self.ignored.remove(key);
    }

    pub fn is_ignored(&self, key: &CacheKey) -> bool {
        self.ignored.contains(key)
    }

    /// Compare the cache with the complete set of live resources
    ///
    /// `force_rebuild` requests a rebuild even without leftovers, e.g. when a
    /// merged resource reverted to its base content.
    pub fn reconcile<I: MetadataIndex>(
        &mut self,
        candidates: &[IndexCandidate],
        force_rebuild: bool,
        index: &mut I,
    ) -> Result<IndexPlan> {
        let mut plan = IndexPlan::default();

        for item in self.items.values_mut() {
            item.touched = false;
        }

        for candidate in candidates {
            if self.ignored.contains(&candidate.key) {
                continue;
            }

            match self.items.get_mut(&candidate.key) {
                Some(item) => {
                    item.touched = true;
                    if item.fingerprint != candidate.fingerprint {
                        debug!("{} changed since it was indexed", candidate.key);
                        plan.stale.push(candidate.key.clone());
                    }
                }
                None if !candidate.is_baseline => {
                    plan.missing.push(candidate.key.clone());
                }
                None => {}
            }
        }

        // The index holds outdated content until these are indexed again
        for key in &plan.stale {
            if let Some(item) = self.items.get_mut(key) {
                item.fingerprint = VersionFingerprint::Incomplete;
            }
            self.has_changes = true;
        }

        plan.leftovers = self
            .items
            .iter()
            .filter(|(_, item)| !item.touched)
            .map(|(key, _)| key.clone())
            .collect();

        plan.rebuild_required = force_rebuild || !plan.leftovers.is_empty();

        if plan.rebuild_required {
            if let Some(first) = plan.leftovers.first() {
                info!(
                    "{} indexed resources no longer exist (first: {}), rebuilding metadata index",
                    plan.leftovers.len(),
                    first
                );
            } else {
                info!("Rebuilding metadata index");
            }
            self.reset(index)?;
            plan.pending = candidates
                .iter()
                .filter(|c| !c.is_baseline && !self.ignored.contains(&c.key))
                .map(|c| c.key.clone())
                .collect();
        } else {
            plan.pending = plan
                .stale
                .iter()
                .chain(plan.missing.iter())
                .cloned()
                .collect();
        }

        plan.pending.sort();
        plan.pending.dedup();

        info!(
            "Index cache: {} to index ({} changed, {} new, {} leftovers)",
            plan.pending.len(),
            plan.stale.len(),
            plan.missing.len(),
            plan.leftovers.len()
        );
        Ok(plan)
    }

    /// Write one resource to the index
    ///
    /// With `record` the cache remembers the fingerprint. Without it the
    /// content is partial: the key is recorded as incomplete and offered
    /// again next run. On failure nothing new is recorded.
    pub fn index_entry<I: MetadataIndex>(
        &mut self,
        index: &mut I,
        key: &CacheKey,
        document: &Value,
        record: Option<&VersionFingerprint>,
    ) -> std::result::Result<(), IndexError> {
        self.invalidate_cache_file();

        index.index_resource(&key.resource_type, document)?;

        let fingerprint = record.cloned().unwrap_or(VersionFingerprint::Incomplete);
        self.items.insert(
            key.clone(),
            CacheItem {
                fingerprint,
                touched: true,
            },
        );
        self.has_changes = true;
        Ok(())
    }

    /// Make the index and the cache durable
    ///
    /// Returns whether anything was written.
    pub fn persist<I: MetadataIndex>(&mut self, index: &mut I) -> Result<bool> {
        if !self.has_changes && !self.force_save && !self.cache_file_removed {
            debug!("Index cache unchanged, not saving");
            return Ok(false);
        }

        index.write_to_disk(&self.index_path)?;

        let items: Vec<PersistedItem> = self
            .items
            .iter()
            .map(|(key, item)| PersistedItem {
                key: key.clone(),
                fingerprint: item.fingerprint.clone(),
            })
            .collect();
        write_json_atomic(&self.cache_path, &items)?;

        self.has_changes = false;
        self.cache_file_removed = false;
        info!("Saved index cache with {} items", items.len());
        Ok(true)
    }

    /// Forget everything; the next run resets the index from the baseline
    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.items.len();
        self.items.clear();
        remove_if_exists(&self.cache_path)?;
        self.needs_reset = true;
        info!("Cleared {} index cache items", removed);
        Ok(removed)
    }

    fn reset<I: MetadataIndex>(&mut self, index: &mut I) -> Result<()> {
        self.invalidate_cache_file();
        index.copy_baseline_to(&self.index_path)?;
        index.reload_from_disk()?;
        self.items.clear();
        self.has_changes = true;
        Ok(())
    }

    /// The cache file stops describing the index once the index is mutated,
    /// so it is removed until the next persist
    fn invalidate_cache_file(&mut self) {
        if self.cache_file_removed {
            return;
        }
        if let Err(e) = remove_if_exists(&self.cache_path) {
            warn!("Failed to remove index cache {}: {}", self.cache_path.display(), e);
        }
        self.cache_file_removed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recording {
        indexed: Vec<String>,
        resets: usize,
        writes: usize,
        fail_on: Option<String>,
    }

    impl MetadataIndex for Recording {
        fn index_resource(
            &mut self,
            resource_type: &str,
            document: &Value,
        ) -> std::result::Result<(), IndexError> {
            let id = document["id"].as_str().unwrap_or_default().to_string();
            if self.fail_on.as_deref() == Some(id.as_str()) {
                return Err(IndexError::Rejected {
                    resource_type: resource_type.to_string(),
                    reason: "refused".to_string(),
                });
            }
            self.indexed.push(id);
            Ok(())
        }

        fn reload_from_disk(&mut self) -> std::result::Result<(), IndexError> {
            Ok(())
        }

        fn write_to_disk(&mut self, path: &Path) -> std::result::Result<(), IndexError> {
            self.writes += 1;
            fs::write(path, b"db")?;
            Ok(())
        }

        fn copy_baseline_to(&mut self, path: &Path) -> std::result::Result<(), IndexError> {
            self.resets += 1;
            fs::write(path, b"baseline")?;
            Ok(())
        }
    }

    fn fp(n: u64) -> VersionFingerprint {
        VersionFingerprint::Metadata {
            size: n,
            modified_ns: n,
        }
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::new("MechDef", id)
    }

    fn candidate(id: &str, n: u64) -> IndexCandidate {
        IndexCandidate {
            key: key(id),
            fingerprint: fp(n),
            is_baseline: false,
        }
    }

    struct Fixture {
        temp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
            }
        }

        fn open(&self) -> MetadataIndexCache {
            MetadataIndexCache::open(
                &self.temp.path().join("index_cache.json"),
                &self.temp.path().join("metadata.db"),
            )
        }

        /// Run one reconcile-index-persist cycle
        fn cycle(&self, index: &mut Recording, candidates: &[IndexCandidate]) -> IndexPlan {
            let mut cache = self.open();
            cache.prepare(index).unwrap();
            let plan = cache.reconcile(candidates, false, index).unwrap();
            for pending in &plan.pending {
                let candidate = candidates.iter().find(|c| &c.key == pending).unwrap();
                let _ = cache.index_entry(
                    index,
                    pending,
                    &json!({"id": pending.id}),
                    Some(&candidate.fingerprint),
                );
            }
            cache.persist(index).unwrap();
            plan
        }
    }

    #[test]
    fn test_first_run_resets_and_indexes_everything() {
        let fixture = Fixture::new();
        let mut index = Recording::default();

        let plan = fixture.cycle(&mut index, &[candidate("a", 1), candidate("b", 1)]);
        assert!(!plan.rebuild_required);
        assert_eq!(plan.missing.len(), 2);
        assert_eq!(index.resets, 1);
        assert_eq!(index.indexed, vec!["a", "b"]);
    }

    #[test]
    fn test_unchanged_entry_stays_indexed() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        fixture.cycle(&mut index, &[candidate("x", 1)]);

        let mut index = Recording::default();
        let plan = fixture.cycle(&mut index, &[candidate("x", 1)]);
        assert!(!plan.rebuild_required);
        assert!(plan.pending.is_empty());
        assert!(index.indexed.is_empty());
        assert_eq!(index.writes, 0);
    }

    #[test]
    fn test_removed_entry_is_leftover_and_forces_rebuild() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        fixture.cycle(&mut index, &[candidate("x", 1), candidate("y", 1)]);

        let mut index = Recording::default();
        let plan = fixture.cycle(&mut index, &[candidate("y", 1)]);
        assert!(plan.rebuild_required);
        assert_eq!(plan.leftovers, vec![key("x")]);
        assert_eq!(index.resets, 1);
        assert_eq!(index.indexed, vec!["y"]);
    }

    #[test]
    fn test_changed_fingerprint_reindexes_only_that_entry() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        fixture.cycle(&mut index, &[candidate("x", 1), candidate("y", 1)]);

        let mut index = Recording::default();
        let plan = fixture.cycle(&mut index, &[candidate("x", 2), candidate("y", 1)]);
        assert!(!plan.rebuild_required);
        assert_eq!(plan.stale, vec![key("x")]);
        assert_eq!(index.indexed, vec!["x"]);
    }

    #[test]
    fn test_failed_entry_is_retried_next_run() {
        let fixture = Fixture::new();
        let mut index = Recording {
            fail_on: Some("bad".to_string()),
            ..Default::default()
        };
        fixture.cycle(&mut index, &[candidate("bad", 1), candidate("good", 1)]);
        assert_eq!(index.indexed, vec!["good"]);

        let mut index = Recording::default();
        let plan = fixture.cycle(&mut index, &[candidate("bad", 1), candidate("good", 1)]);
        assert_eq!(plan.pending, vec![key("bad")]);
        assert_eq!(index.indexed, vec!["bad"]);
    }

    #[test]
    fn test_baseline_candidates_are_not_indexed() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        let baseline = IndexCandidate {
            is_baseline: true,
            ..candidate("stock", 1)
        };

        let plan = fixture.cycle(&mut index, &[baseline]);
        assert!(plan.pending.is_empty());
        assert!(index.indexed.is_empty());
    }

    #[test]
    fn test_ignored_entry_skipped() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        let mut cache = fixture.open();
        cache.prepare(&mut index).unwrap();
        cache.mark_ignored(key("icon"));

        let plan = cache
            .reconcile(&[candidate("icon", 1), candidate("atlas", 1)], false, &mut index)
            .unwrap();
        assert_eq!(plan.pending, vec![key("atlas")]);
    }

    #[test]
    fn test_force_rebuild_without_leftovers() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        fixture.cycle(&mut index, &[candidate("x", 1)]);

        let mut index = Recording::default();
        let mut cache = fixture.open();
        cache.prepare(&mut index).unwrap();
        let plan = cache.reconcile(&[candidate("x", 1)], true, &mut index).unwrap();
        assert!(plan.rebuild_required);
        assert_eq!(plan.pending, vec![key("x")]);
        assert_eq!(index.resets, 1);
    }

    #[test]
    fn test_corrupt_cache_file_resets_index() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        fixture.cycle(&mut index, &[candidate("x", 1)]);
        fs::write(fixture.temp.path().join("index_cache.json"), b"[{").unwrap();

        let mut index = Recording::default();
        let plan = fixture.cycle(&mut index, &[candidate("x", 1)]);
        assert_eq!(index.resets, 1);
        assert_eq!(plan.missing, vec![key("x")]);
    }

    #[test]
    fn test_cache_file_removed_while_mutating() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        fixture.cycle(&mut index, &[candidate("x", 1)]);
        let cache_file = fixture.temp.path().join("index_cache.json");
        assert!(cache_file.exists());

        let mut cache = fixture.open();
        cache.prepare(&mut index).unwrap();
        cache
            .index_entry(&mut index, &key("y"), &json!({"id": "y"}), Some(&fp(1)))
            .unwrap();
        assert!(!cache_file.exists());

        cache.persist(&mut index).unwrap();
        assert!(cache_file.exists());
    }

    #[test]
    fn test_force_save_writes_without_changes() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        fixture.cycle(&mut index, &[candidate("x", 1)]);

        let mut index = Recording::default();
        let mut cache = fixture.open();
        cache.prepare(&mut index).unwrap();
        cache.reconcile(&[candidate("x", 1)], false, &mut index).unwrap();
        cache.set_force_save(true);
        assert!(cache.persist(&mut index).unwrap());
        assert_eq!(index.writes, 1);
    }

    #[test]
    fn test_partial_baseline_reindexed_once_unpatched() {
        let fixture = Fixture::new();
        let mut index = Recording::default();

        // A patched baseline resource whose merge was partial
        let mut cache = fixture.open();
        cache.prepare(&mut index).unwrap();
        let patched = candidate("atlas", 9);
        let plan = cache.reconcile(&[patched], false, &mut index).unwrap();
        assert_eq!(plan.pending, vec![key("atlas")]);
        cache
            .index_entry(&mut index, &key("atlas"), &json!({"id": "atlas"}), None)
            .unwrap();
        cache.persist(&mut index).unwrap();

        // Its patches are gone: the plain baseline version must replace it
        let mut index = Recording::default();
        let baseline = IndexCandidate {
            is_baseline: true,
            ..candidate("atlas", 1)
        };
        let plan = fixture.cycle(&mut index, &[baseline.clone()]);
        assert!(!plan.rebuild_required);
        assert_eq!(plan.stale, vec![key("atlas")]);
        assert_eq!(index.indexed, vec!["atlas"]);

        let mut index = Recording::default();
        let plan = fixture.cycle(&mut index, &[baseline]);
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn test_stale_entry_kept_until_reindexed() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        let baseline = |n| IndexCandidate {
            is_baseline: true,
            ..candidate("stock", n)
        };
        let mut cache = fixture.open();
        cache.prepare(&mut index).unwrap();
        cache
            .index_entry(&mut index, &key("stock"), &json!({"id": "stock"}), Some(&fp(1)))
            .unwrap();
        cache.persist(&mut index).unwrap();

        let mut index = Recording {
            fail_on: Some("stock".to_string()),
            ..Default::default()
        };
        let plan = fixture.cycle(&mut index, &[baseline(2)]);
        assert_eq!(plan.stale, vec![key("stock")]);
        assert!(index.indexed.is_empty());

        assert_eq!(fixture.open().incomplete(), 1);

        let mut index = Recording::default();
        let plan = fixture.cycle(&mut index, &[baseline(2)]);
        assert_eq!(plan.pending, vec![key("stock")]);
        assert_eq!(index.indexed, vec!["stock"]);
    }

    #[test]
    fn test_unmarked_entry_is_indexed_again() {
        let fixture = Fixture::new();
        let mut index = Recording::default();
        let mut cache = fixture.open();
        cache.prepare(&mut index).unwrap();
        cache.mark_ignored(key("icon"));
        cache.unmark_ignored(&key("icon"));

        assert!(!cache.is_ignored(&key("icon")));
        let plan = cache.reconcile(&[candidate("icon", 1)], false, &mut index).unwrap();
        assert_eq!(plan.pending, vec![key("icon")]);
    }
}
