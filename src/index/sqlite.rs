// src/index/sqlite.rs

//! SQLite-backed metadata index
//!
//! All mutations made between a reload and the next write are held in one
//! transaction, so a run that is abandoned part-way leaves the database at
//! its last written state.

use super::{IndexError, MetadataIndex, document_id, document_tags};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

fn init_schema(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS resources (
            resource_type TEXT NOT NULL,
            id TEXT NOT NULL,
            document TEXT NOT NULL,
            indexed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (resource_type, id)
        );

        CREATE TABLE IF NOT EXISTS resource_tags (
            resource_type TEXT NOT NULL,
            id TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (resource_type, id, tag)
        );

        CREATE INDEX IF NOT EXISTS idx_resource_tags_tag ON resource_tags(tag);
        ",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

/// A stored resource
#[derive(Debug, Clone)]
pub struct IndexedResource {
    pub resource_type: String,
    pub id: String,
    pub document: Value,
    pub indexed_at: String,
    pub tags: Vec<String>,
}

impl IndexedResource {
    fn from_row(row: &Row) -> rusqlite::Result<(String, String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }
}

#[derive(Debug)]
pub struct SqliteIndex {
    path: PathBuf,
    baseline: Option<PathBuf>,
    conn: Option<Connection>,
}

impl SqliteIndex {
    /// Create an index stored at `path`; nothing is opened until
    /// [`MetadataIndex::reload_from_disk`]
    pub fn new(path: impl Into<PathBuf>, baseline: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            baseline,
            conn: None,
        }
    }

    /// Open an existing index for queries only
    pub fn open_read_only(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no metadata index at {}", path.display()),
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            path: path.to_path_buf(),
            baseline: None,
            conn: Some(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<&Connection, IndexError> {
        self.conn.as_ref().ok_or(IndexError::NotLoaded)
    }

    /// Number of stored resources
    pub fn count(&self) -> Result<usize, IndexError> {
        let count: i64 = self
            .connection()?
            .query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Resource types with their resource counts
    pub fn resource_types(&self) -> Result<Vec<(String, usize)>, IndexError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT resource_type, COUNT(*) FROM resources
             GROUP BY resource_type ORDER BY resource_type",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn find(&self, resource_type: &str, id: &str) -> Result<Option<IndexedResource>, IndexError> {
        let raw = self
            .connection()?
            .query_row(
                "SELECT resource_type, id, document, indexed_at FROM resources
                 WHERE resource_type = ?1 AND id = ?2",
                params![resource_type, id],
                IndexedResource::from_row,
            )
            .optional()?;

        raw.map(|raw| self.hydrate(raw)).transpose()
    }

    pub fn list(&self, resource_type: &str) -> Result<Vec<IndexedResource>, IndexError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT resource_type, id, document, indexed_at FROM resources
             WHERE resource_type = ?1 ORDER BY id",
        )?;
        let raws = stmt
            .query_map([resource_type], IndexedResource::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raws.into_iter().map(|raw| self.hydrate(raw)).collect()
    }

    /// Resources carrying `tag`
    pub fn with_tag(&self, tag: &str) -> Result<Vec<(String, String)>, IndexError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT resource_type, id FROM resource_tags WHERE tag = ?1
             ORDER BY resource_type, id",
        )?;
        let rows = stmt
            .query_map([tag], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn hydrate(
        &self,
        (resource_type, id, document, indexed_at): (String, String, String, String),
    ) -> Result<IndexedResource, IndexError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT tag FROM resource_tags WHERE resource_type = ?1 AND id = ?2 ORDER BY tag",
        )?;
        let tags = stmt
            .query_map(params![resource_type, id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let document = serde_json::from_str(&document).map_err(|e| IndexError::Rejected {
            resource_type: resource_type.clone(),
            reason: format!("stored document for {} is not JSON: {}", id, e),
        })?;

        Ok(IndexedResource {
            resource_type,
            id,
            document,
            indexed_at,
            tags,
        })
    }

    fn close(&mut self) {
        // Dropping the connection rolls back an open transaction
        if self.conn.take().is_some() {
            debug!("Closed metadata index {}", self.path.display());
        }
    }
}

impl MetadataIndex for SqliteIndex {
    fn index_resource(&mut self, resource_type: &str, document: &Value) -> Result<(), IndexError> {
        let id = document_id(document).ok_or_else(|| IndexError::MissingId {
            resource_type: resource_type.to_string(),
        })?;
        if resource_type.is_empty() {
            return Err(IndexError::Rejected {
                resource_type: resource_type.to_string(),
                reason: format!("document {} has an empty resource type", id),
            });
        }

        let conn = self.connection()?;
        let text = serde_json::to_string(document).map_err(|e| IndexError::Rejected {
            resource_type: resource_type.to_string(),
            reason: e.to_string(),
        })?;

        conn.execute(
            "INSERT OR REPLACE INTO resources (resource_type, id, document, indexed_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
            params![resource_type, id, text],
        )?;
        conn.execute(
            "DELETE FROM resource_tags WHERE resource_type = ?1 AND id = ?2",
            params![resource_type, id],
        )?;
        for tag in document_tags(document) {
            conn.execute(
                "INSERT OR IGNORE INTO resource_tags (resource_type, id, tag) VALUES (?1, ?2, ?3)",
                params![resource_type, id, tag],
            )?;
        }

        debug!("Indexed {}:{}", resource_type, id);
        Ok(())
    }

    fn reload_from_disk(&mut self) -> Result<(), IndexError> {
        self.close();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        init_schema(&conn)?;
        conn.execute_batch("BEGIN")?;
        self.conn = Some(conn);

        debug!("Loaded metadata index {}", self.path.display());
        Ok(())
    }

    fn write_to_disk(&mut self, path: &Path) -> Result<(), IndexError> {
        let conn = self.connection()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }

        if path != self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            if path.exists() {
                fs::remove_file(path)?;
            }
            conn.execute("VACUUM INTO ?1", [path.to_string_lossy()])?;
        }

        conn.execute_batch("BEGIN")?;
        info!("Wrote metadata index to {}", path.display());
        Ok(())
    }

    fn copy_baseline_to(&mut self, path: &Path) -> Result<(), IndexError> {
        if path == self.path {
            self.close();
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            fs::remove_file(path)?;
        }

        match &self.baseline {
            Some(baseline) if baseline.exists() => {
                fs::copy(baseline, path)?;
                info!("Copied baseline index {} to {}", baseline.display(), path.display());
            }
            other => {
                if let Some(baseline) = other {
                    warn!(
                        "Baseline index {} not found, starting from an empty index",
                        baseline.display()
                    );
                }
                let conn = Connection::open(path)?;
                init_schema(&conn)?;
                info!("Created empty metadata index at {}", path.display());
            }
        }
        Ok(())
    }
}
