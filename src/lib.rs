// src/lib.rs

//! Modweave mod loader core
//!
//! Loads independently authored content packages, resolves a safe
//! activation order among them, merges JSON overrides onto shared base
//! resources and keeps a queryable metadata index over the result.
//!
//! # Architecture
//!
//! - Load order: conflicts are symmetrized into a read-only constraint graph;
//!   the previous run's order seeds the next one for stability
//! - Caches: merges and index state are keyed by `CacheKey` and invalidated
//!   by `VersionFingerprint`, so an unchanged run recomputes nothing
//! - Collaborators: discovery, document merging and index storage sit behind
//!   traits (`ContentSource`, `DocumentMerger`, `MetadataIndex`)
//! - Runs: a pull-based iterator of progress steps, persisted only at the end

pub mod cache;
pub mod config;
mod error;
pub mod hash;
pub mod index;
pub mod manifest;
pub mod merge;
pub mod orchestrator;
pub mod package;
pub mod paths;
pub mod progress;
pub mod resolver;

pub use cache::{CacheKey, FingerprintMode, MergeCache, MetadataIndexCache, VersionFingerprint};
pub use config::Config;
pub use error::{Error, Result};
pub use hash::{Hash, HashAlgorithm, Hasher};
pub use index::{IndexError, MetadataIndex, SqliteIndex};
pub use manifest::EntrySet;
pub use merge::{DocumentMerger, JsonMerge, MergeError, PatchFormat};
pub use orchestrator::{IndexFailure, Orchestrator, Run, RunSummary};
pub use package::{ContentSource, DirectorySource, Entry, PackageDescriptor};
pub use progress::{CallbackProgress, LogProgress, ProgressReport, ProgressSink, SilentProgress};
pub use resolver::{resolve, Resolution, Unresolved, UnresolvedReason};
