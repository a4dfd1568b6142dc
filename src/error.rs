// src/error.rs

//! Crate-wide error type
//!
//! Collaborator boundaries (document merging, metadata indexing) have their
//! own error enums; they convert into [`Error`] when a failure has to leave
//! the pipeline instead of being logged and skipped.

use crate::index::IndexError;
use crate::merge::MergeError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the modweave library
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid package descriptor {path}: {reason}")]
    InvalidDescriptor { path: PathBuf, reason: String },

    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("Indexing failed: {0}")]
    Index(#[from] IndexError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
