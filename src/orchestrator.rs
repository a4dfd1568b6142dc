// src/orchestrator.rs

//! The run pipeline
//!
//! A run walks through fixed stages:
//!
//! ```text
//! Discover -> Resolve -> Expand (per package) -> Verify
//!          -> Merge (per stale target) -> Index (per pending resource)
//!          -> Persist -> Done
//! ```
//!
//! [`Orchestrator::run`] returns a [`Run`], an iterator the caller drains
//! one step at a time; each `next()` does one unit of work and yields its
//! [`ProgressReport`]. Dropping a run early leaves the persisted state as it
//! was, since nothing is written before the Persist stage apart from the
//! load order and content-addressed merge results.
//!
//! Per-item failures never end a run. They are logged and collected in the
//! [`RunSummary`]; only environment failures are yielded as errors.

use crate::cache::{
    CacheKey, IndexCandidate, IndexPlan, MergeCache, MetadataIndexCache, PatchFailure,
    VersionFingerprint,
};
use crate::config::Config;
use crate::error::Result;
use crate::index::MetadataIndex;
use crate::manifest::{EntrySet, ExpansionOptions, ManifestExpander, SkippedEntry};
use crate::merge::DocumentMerger;
use crate::package::{ContentSource, PackageDescriptor};
use crate::paths;
use crate::progress::{ProgressReport, ProgressSink};
use crate::resolver::{self, Resolution, Unresolved};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A resource that could not be indexed this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFailure {
    pub key: CacheKey,
    pub reason: String,
}

impl fmt::Display for IndexFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

/// Batch report of a run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub discovered: usize,
    pub order: Vec<String>,
    pub unresolved: Vec<Unresolved>,
    pub resources: usize,
    /// Merges computed this run (cache hits excluded)
    pub merged: usize,
    pub merge_failures: Vec<PatchFailure>,
    pub orphaned_patches: Vec<CacheKey>,
    pub indexed: usize,
    pub index_failures: Vec<IndexFailure>,
    pub rebuild_required: bool,
    pub index_saved: bool,
    pub skipped_entries: Vec<SkippedEntry>,
    /// Entries per overlay; overlay entries are not indexed
    pub overlays: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.unresolved.is_empty()
            || !self.merge_failures.is_empty()
            || !self.index_failures.is_empty()
            || !self.skipped_entries.is_empty()
    }
}

/// Drives runs over a content source with a merger and an index
pub struct Orchestrator<S, M, I> {
    config: Config,
    source: S,
    merger: M,
    index: I,
    force_save: bool,
}

impl<S, M, I> Orchestrator<S, M, I>
where
    S: ContentSource,
    M: DocumentMerger,
    I: MetadataIndex,
{
    pub fn new(config: Config, source: S, merger: M, index: I) -> Self {
        Self {
            config,
            source,
            merger,
            index,
            force_save: false,
        }
    }

    /// Rewrite the index and its cache even when nothing changed
    pub fn force_save(mut self, force: bool) -> Self {
        self.force_save = force;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn into_index(self) -> I {
        self.index
    }

    /// Start a run; nothing happens until the run is drained
    pub fn run(&mut self) -> Run<'_, S, M, I> {
        Run::new(self)
    }

    /// Drain a run, passing every report to `sink`
    pub fn run_to_completion(&mut self, sink: &mut dyn ProgressSink) -> Result<RunSummary> {
        let mut run = self.run();
        for report in run.by_ref() {
            sink.report(&report?);
        }
        sink.finish("Run complete");
        Ok(run.into_summary())
    }

    /// Discover and resolve without expanding anything
    pub fn resolve_only(&self) -> Result<Resolution> {
        let descriptors = admit_packages(&self.config, self.source.packages()?);
        let previous = resolver::load_order(&paths::load_order_file(&self.config.state_dir));
        Ok(resolver::resolve(&descriptors, &previous))
    }
}

/// Apply blocking and dependency filtering from the configuration
fn admit_packages(
    config: &Config,
    packages: Vec<PackageDescriptor>,
) -> BTreeMap<String, PackageDescriptor> {
    let mut admitted = BTreeMap::new();
    for mut package in packages {
        if config.blocked_mods.contains(&package.name) {
            warn!("Package {} is blocked", package.name);
            continue;
        }
        if let Some(existing) = admitted.get(&package.name) {
            let existing: &PackageDescriptor = existing;
            warn!(
                "Package {} in {} duplicates {}, skipping it",
                package.name,
                package.directory.display(),
                existing.directory.display()
            );
            continue;
        }
        package.ignore_dependencies(&config.ignore_missing_mods);
        admitted.insert(package.name.clone(), package);
    }
    admitted
}

/// Log a step that took longer than the threshold
fn log_if_slow(label: &str, started: Instant, threshold: Duration) {
    let elapsed = started.elapsed();
    if elapsed >= threshold {
        info!("{} took {:.2?}", label, elapsed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Discover,
    Resolve,
    Expand(usize),
    Verify,
    Merge(usize),
    Index(usize),
    Persist,
    Done,
    Finished,
}

impl Stage {
    /// Share of the run each stage starts at
    fn span(self) -> (f32, f32) {
        match self {
            Stage::Discover => (0.0, 0.05),
            Stage::Resolve => (0.05, 0.1),
            Stage::Expand(_) => (0.1, 0.4),
            Stage::Verify => (0.4, 0.45),
            Stage::Merge(_) => (0.45, 0.7),
            Stage::Index(_) => (0.7, 0.95),
            Stage::Persist => (0.95, 1.0),
            Stage::Done | Stage::Finished => (1.0, 1.0),
        }
    }

    fn fraction(self, done: usize, total: usize) -> f32 {
        let (start, end) = self.span();
        if total == 0 {
            return end;
        }
        start + (end - start) * (done as f32 / total as f32)
    }
}

/// Merged content produced this run
struct MergedDocument {
    content: String,
    /// Whether every patch applied, so the index may record it
    complete: bool,
}

/// A run in progress
pub struct Run<'a, S, M, I> {
    orchestrator: &'a mut Orchestrator<S, M, I>,
    stage: Stage,
    threshold: Duration,
    descriptors: BTreeMap<String, PackageDescriptor>,
    entries: EntrySet,
    merges: MergeCache,
    index_cache: MetadataIndexCache,
    options: ExpansionOptions,
    preload: Vec<CacheKey>,
    plan: IndexPlan,
    fingerprints: BTreeMap<CacheKey, VersionFingerprint>,
    merged: BTreeMap<CacheKey, MergedDocument>,
    /// Targets whose merge failed outright; not attempted again this run
    unmergeable: BTreeSet<CacheKey>,
    summary: RunSummary,
}

impl<'a, S, M, I> Run<'a, S, M, I>
where
    S: ContentSource,
    M: DocumentMerger,
    I: MetadataIndex,
{
    fn new(orchestrator: &'a mut Orchestrator<S, M, I>) -> Self {
        let config = &orchestrator.config;
        let state_dir = &config.state_dir;

        let merges = MergeCache::open(
            &paths::merge_cache_file(state_dir),
            &paths::merged_dir(state_dir),
            config.fingerprint,
        );
        let index_cache = MetadataIndexCache::open(
            &paths::index_cache_file(state_dir),
            &paths::metadata_db(state_dir),
        );
        let options = ExpansionOptions {
            implicit_manifest_dir: config.implicit_manifest_dir.clone(),
            implicit_manifest_merge_json: config.implicit_manifest_merge_json,
            content_pack_dir: config.content_pack_dir.clone(),
            available_content_packs: config.available_content_packs.clone(),
        };
        let threshold = Duration::from_millis(config.slow_step_threshold_ms);

        Self {
            orchestrator,
            stage: Stage::Discover,
            threshold,
            descriptors: BTreeMap::new(),
            entries: EntrySet::new(),
            merges,
            index_cache,
            options,
            preload: Vec::new(),
            plan: IndexPlan::default(),
            fingerprints: BTreeMap::new(),
            merged: BTreeMap::new(),
            unmergeable: BTreeSet::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }

    /// Do one unit of work
    fn step(&mut self) -> Result<Option<ProgressReport>> {
        loop {
            let started = Instant::now();
            let report = match self.stage {
                Stage::Finished => return Ok(None),
                Stage::Discover => Some(self.discover()?),
                Stage::Resolve => Some(self.resolve()?),
                Stage::Expand(i) => self.expand(i),
                Stage::Verify => Some(self.verify()?),
                Stage::Merge(i) => self.merge(i),
                Stage::Index(i) => self.index(i),
                Stage::Persist => Some(self.persist()?),
                Stage::Done => {
                    self.stage = Stage::Finished;
                    info!(
                        "Run complete: {} packages loaded, {} merged, {} indexed",
                        self.summary.order.len(),
                        self.summary.merged,
                        self.summary.indexed
                    );
                    Some(ProgressReport::major(1.0, "Done", ""))
                }
            };

            if let Some(report) = report {
                log_if_slow(&report.to_string(), started, self.threshold);
                return Ok(Some(report));
            }
        }
    }

    fn discover(&mut self) -> Result<ProgressReport> {
        let orchestrator = &*self.orchestrator;
        let packages = orchestrator.source.packages()?;
        self.descriptors = admit_packages(&orchestrator.config, packages);

        let baseline = orchestrator.source.baseline()?;
        let baseline_count = baseline.len();
        for entry in baseline {
            self.entries.add_resource(entry);
        }

        self.summary.discovered = self.descriptors.len();
        self.stage = Stage::Resolve;
        Ok(ProgressReport::major(
            Stage::Discover.span().1,
            "Discovering",
            format!(
                "{} packages, {} baseline resources",
                self.descriptors.len(),
                baseline_count
            ),
        ))
    }

    fn resolve(&mut self) -> Result<ProgressReport> {
        let order_file = paths::load_order_file(&self.orchestrator.config.state_dir);
        let previous = resolver::load_order(&order_file);
        let resolution = resolver::resolve(&self.descriptors, &previous);

        if resolution.order != previous {
            resolver::save_order(&order_file, &resolution.order)?;
        }

        self.summary.order = resolution.order;
        self.summary.unresolved = resolution.unresolved;
        self.stage = Stage::Expand(0);
        Ok(ProgressReport::major(
            Stage::Resolve.span().1,
            "Resolving load order",
            format!(
                "{} to load, {} unresolved",
                self.summary.order.len(),
                self.summary.unresolved.len()
            ),
        ))
    }

    fn expand(&mut self, i: usize) -> Option<ProgressReport> {
        let total = self.summary.order.len();
        let Some(name) = self.summary.order.get(i).cloned() else {
            self.stage = Stage::Verify;
            return None;
        };
        self.stage = Stage::Expand(i + 1);

        let Some(package) = self.descriptors.get(&name) else {
            return None;
        };
        let report = ManifestExpander::new(&self.options).expand(
            package,
            &mut self.entries,
            &mut self.merges,
            &mut self.index_cache,
        );
        self.summary.skipped_entries.extend(report.skipped);

        Some(ProgressReport::minor(
            Stage::Expand(i).fraction(i + 1, total),
            "Loading packages",
            name,
        ))
    }

    fn verify(&mut self) -> Result<ProgressReport> {
        let clean = self.merges.clean_with_complete_entry_set(&self.entries);
        self.summary.orphaned_patches = clean.orphaned;
        self.preload = clean.preload.into_iter().collect();

        self.index_cache.prepare(&mut self.orchestrator.index)?;

        let mode = self.orchestrator.config.fingerprint;
        let mut candidates = Vec::new();
        for entry in self.entries.resources().filter(|e| e.is_json()) {
            let patched = self.merges.chain_fingerprint(&entry.key);
            let fingerprint = match patched {
                Some(chain) => chain.clone(),
                None => match entry.fingerprint(mode) {
                    Ok(fingerprint) => fingerprint.clone(),
                    Err(e) => {
                        warn!("Cannot fingerprint {}: {}", entry, e);
                        continue;
                    }
                },
            };
            candidates.push(IndexCandidate {
                key: entry.key.clone(),
                fingerprint,
                is_baseline: entry.is_baseline() && patched.is_none(),
            });
        }

        self.plan = self.index_cache.reconcile(
            &candidates,
            clean.needs_base_rebuild,
            &mut self.orchestrator.index,
        )?;
        self.summary.rebuild_required = self.plan.rebuild_required;
        self.summary.resources = self.entries.len();
        self.summary.overlays = self
            .entries
            .overlay_names()
            .map(|name| {
                let count = self.entries.overlay(name).map_or(0, |entries| entries.len());
                (name.to_string(), count)
            })
            .collect();
        self.fingerprints = candidates
            .into_iter()
            .map(|c| (c.key, c.fingerprint))
            .collect();

        self.stage = Stage::Merge(0);
        Ok(ProgressReport::major(
            Stage::Verify.span().1,
            "Verifying caches",
            format!(
                "{} merges, {} resources to index",
                self.preload.len(),
                self.plan.pending.len()
            ),
        ))
    }

    fn merge(&mut self, i: usize) -> Option<ProgressReport> {
        let total = self.preload.len();
        let Some(target) = self.preload.get(i).cloned() else {
            self.stage = Stage::Index(0);
            return None;
        };
        self.stage = Stage::Merge(i + 1);

        self.merge_target(&target);
        Some(ProgressReport::minor(
            Stage::Merge(i).fraction(i + 1, total),
            "Merging",
            target.to_string(),
        ))
    }

    /// Produce a target's merged content, recording it for the index stage
    fn merge_target(&mut self, target: &CacheKey) -> Option<&MergedDocument> {
        if self.unmergeable.contains(target) {
            return None;
        }
        if !self.merged.contains_key(target) {
            let base = self.entries.resource(target)?;
            let base_content = match base.read_text() {
                Ok(content) => content,
                Err(e) => {
                    warn!("Cannot read base {}: {}", base, e);
                    self.unmergeable.insert(target.clone());
                    self.summary.merge_failures.push(PatchFailure {
                        target: target.clone(),
                        patch: target.clone(),
                        source_path: base.source_path.clone(),
                        reason: e.to_string(),
                    });
                    return None;
                }
            };
            let base_path = base.source_path.clone();

            match self
                .merges
                .merge_and_cache(target, &base_content, &self.orchestrator.merger)
            {
                Ok(outcome) => {
                    if !outcome.cached {
                        self.summary.merged += 1;
                    }
                    let complete = outcome.failed.is_empty();
                    self.summary.merge_failures.extend(outcome.failed);
                    self.merged.insert(
                        target.clone(),
                        MergedDocument {
                            content: outcome.content,
                            complete,
                        },
                    );
                }
                Err(e) => {
                    warn!("Merging {} failed: {}", target, e);
                    self.unmergeable.insert(target.clone());
                    self.summary.merge_failures.push(PatchFailure {
                        target: target.clone(),
                        patch: target.clone(),
                        source_path: base_path,
                        reason: e.to_string(),
                    });
                    return None;
                }
            }
        }
        self.merged.get(target)
    }

    fn index(&mut self, i: usize) -> Option<ProgressReport> {
        let total = self.plan.pending.len();
        let Some(key) = self.plan.pending.get(i).cloned() else {
            self.stage = Stage::Persist;
            return None;
        };
        self.stage = Stage::Index(i + 1);

        match self.index_resource(&key) {
            Ok(()) => self.summary.indexed += 1,
            Err(reason) => {
                warn!("Not indexing {}: {}", key, reason);
                self.summary.index_failures.push(IndexFailure { key: key.clone(), reason });
            }
        }

        Some(ProgressReport::minor(
            Stage::Index(i).fraction(i + 1, total),
            "Indexing",
            key.to_string(),
        ))
    }

    fn index_resource(&mut self, key: &CacheKey) -> std::result::Result<(), String> {
        let (text, complete) = if self.merges.is_patched(key) {
            let merged = self
                .merge_target(key)
                .ok_or_else(|| "merged content unavailable".to_string())?;
            (merged.content.clone(), merged.complete)
        } else {
            let entry = self
                .entries
                .resource(key)
                .ok_or_else(|| "resource no longer exists".to_string())?;
            let text = entry.read_text().map_err(|e| e.to_string())?;
            (text, true)
        };

        let document: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {}", e))?;
        let record = if complete {
            self.fingerprints.get(key)
        } else {
            None
        };

        self.index_cache
            .index_entry(&mut self.orchestrator.index, key, &document, record)
            .map_err(|e| e.to_string())
    }

    fn persist(&mut self) -> Result<ProgressReport> {
        self.merges.save()?;

        let force = self.orchestrator.force_save || self.orchestrator.config.always_save_index;
        self.index_cache.set_force_save(force);
        self.summary.index_saved = self.index_cache.persist(&mut self.orchestrator.index)?;

        debug!(
            "Persisted state (index {})",
            if self.summary.index_saved { "written" } else { "unchanged" }
        );
        self.stage = Stage::Done;
        Ok(ProgressReport::major(
            Stage::Persist.span().1,
            "Saving",
            if self.summary.index_saved { "index written" } else { "nothing changed" },
        ))
    }
}

impl<S, M, I> Iterator for Run<'_, S, M, I>
where
    S: ContentSource,
    M: DocumentMerger,
    I: MetadataIndex,
{
    type Item = Result<ProgressReport>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(report) => report.map(Ok),
            Err(e) => {
                warn!("Run aborted: {}", e);
                self.stage = Stage::Finished;
                Some(Err(e))
            }
        }
    }
}
