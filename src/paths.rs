// src/paths.rs

//! Centralized path derivation for persisted state

use std::path::{Path, PathBuf};

/// Persisted previous load order
pub fn load_order_file(state_dir: &Path) -> PathBuf {
    state_dir.join("load_order.json")
}

/// Directory holding the merge cache
pub fn cache_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("cache")
}

/// Merge cache record list
pub fn merge_cache_file(state_dir: &Path) -> PathBuf {
    cache_dir(state_dir).join("merge_cache.json")
}

/// Content-addressed merged documents
pub fn merged_dir(state_dir: &Path) -> PathBuf {
    cache_dir(state_dir).join("merged")
}

/// Directory holding the metadata index and its cache
pub fn database_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("database")
}

pub fn index_cache_file(state_dir: &Path) -> PathBuf {
    database_dir(state_dir).join("index_cache.json")
}

pub fn metadata_db(state_dir: &Path) -> PathBuf {
    database_dir(state_dir).join("metadata.db")
}
