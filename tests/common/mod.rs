// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use modweave::index::{document_id, IndexError, MetadataIndex};
use modweave::merge::{DocumentMerger, JsonMerge, MergeError, Patch};
use modweave::{Config, DirectorySource, FingerprintMode, PackageDescriptor};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// A game directory with `Mods/`, `baseline/` and the state directory.
///
/// Keep the workspace alive for the duration of the test to prevent cleanup.
pub struct Workspace {
    temp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            temp: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Defaults below the workspace, fingerprinting by content so rewrites
    /// within one timestamp tick are still detected.
    pub fn config(&self) -> Config {
        let mut config = Config::default().relative_to(self.root());
        config.fingerprint = FingerprintMode::Content;
        config.slow_step_threshold_ms = 60_000;
        config
    }

    pub fn source(&self) -> DirectorySource {
        let config = self.config();
        DirectorySource::new(config.mods_dir, config.baseline_dir)
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn remove(&self, relative: &str) {
        let path = self.root().join(relative);
        if path.is_dir() {
            fs::remove_dir_all(path).unwrap();
        } else {
            fs::remove_file(path).unwrap();
        }
    }

    /// Write a baseline resource at `baseline/<type>/<id>.json`
    pub fn baseline(&self, resource_type: &str, id: &str, document: &str) -> PathBuf {
        self.write(&format!("baseline/{}/{}.json", resource_type, id), document)
    }

    /// Write `Mods/<name>/mod.json`
    pub fn package(&self, name: &str, descriptor: &str) -> PathBuf {
        self.write(&format!("Mods/{}/mod.json", name), descriptor)
    }

    /// Write a file inside a package directory
    pub fn package_file(&self, package: &str, relative: &str, content: &str) -> PathBuf {
        self.write(&format!("Mods/{}/{}", package, relative), content)
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.root().join(relative).exists()
    }
}

/// JSON merge that counts collaborator invocations; clones share the count.
#[derive(Clone, Default)]
pub struct CountingMerger {
    calls: Rc<Cell<usize>>,
}

impl CountingMerger {
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl DocumentMerger for CountingMerger {
    fn merge(&self, base: Value, patch: &Patch<'_>) -> Result<Value, MergeError> {
        self.calls.set(self.calls.get() + 1);
        JsonMerge.merge(base, patch)
    }
}

#[derive(Default)]
struct RecordingState {
    /// Committed documents, as written by `write_to_disk`
    committed: BTreeMap<String, Value>,
    /// Documents of the current run
    live: BTreeMap<String, Value>,
    index_calls: usize,
    resets: usize,
    writes: usize,
}

/// In-memory metadata index that mirrors its contents to a JSON file so the
/// index cache sees a database on disk; clones share state.
#[derive(Clone, Default)]
pub struct RecordingIndex {
    state: Rc<RefCell<RecordingState>>,
}

impl RecordingIndex {
    pub fn index_calls(&self) -> usize {
        self.state.borrow().index_calls
    }

    pub fn resets(&self) -> usize {
        self.state.borrow().resets
    }

    pub fn writes(&self) -> usize {
        self.state.borrow().writes
    }

    /// Committed document for `type:id`
    pub fn document(&self, resource_type: &str, id: &str) -> Option<Value> {
        self.state
            .borrow()
            .committed
            .get(&format!("{}:{}", resource_type, id))
            .cloned()
    }

    pub fn committed_keys(&self) -> Vec<String> {
        self.state.borrow().committed.keys().cloned().collect()
    }
}

impl MetadataIndex for RecordingIndex {
    fn index_resource(&mut self, resource_type: &str, document: &Value) -> Result<(), IndexError> {
        let mut state = self.state.borrow_mut();
        state.index_calls += 1;
        let id = document_id(document).ok_or_else(|| IndexError::MissingId {
            resource_type: resource_type.to_string(),
        })?;
        state
            .live
            .insert(format!("{}:{}", resource_type, id), document.clone());
        Ok(())
    }

    fn reload_from_disk(&mut self) -> Result<(), IndexError> {
        let mut state = self.state.borrow_mut();
        state.live = state.committed.clone();
        Ok(())
    }

    fn write_to_disk(&mut self, path: &Path) -> Result<(), IndexError> {
        let mut state = self.state.borrow_mut();
        state.committed = state.live.clone();
        state.writes += 1;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(&state.committed).unwrap())?;
        Ok(())
    }

    fn copy_baseline_to(&mut self, path: &Path) -> Result<(), IndexError> {
        let mut state = self.state.borrow_mut();
        state.committed.clear();
        state.live.clear();
        state.resets += 1;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, "{}")?;
        Ok(())
    }
}

/// Descriptors keyed by name, as the resolver takes them
pub fn descriptor_set(list: Vec<PackageDescriptor>) -> BTreeMap<String, PackageDescriptor> {
    list.into_iter().map(|d| (d.name.clone(), d)).collect()
}

/// Small deterministic generator for randomized package sets
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407))
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}
