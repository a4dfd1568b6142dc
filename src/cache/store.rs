// src/cache/store.rs

//! Reading and atomically writing persisted JSON state files

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Read a JSON state file
///
/// Returns `None` when the file is absent or cannot be decoded; the caller
/// treats both as an empty cache.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Option<T> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path)
        .map_err(Error::from)
        .and_then(|text| serde_json::from_str(&text).map_err(Error::from))
    {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Loading {} from {} failed, rebuilding it: {}", what, path.display(), e);
            None
        }
    }
}

/// Write a JSON state file via a temporary file and rename
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, serde_json::to_string_pretty(value)?.as_bytes())
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Cache(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Remove a state file, ignoring a file that is already gone
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
