// src/index/mod.rs

//! Metadata index collaborator
//!
//! The index cache decides what needs indexing; a [`MetadataIndex`] does the
//! storing. Storage is only expected to support adding or replacing a
//! resource, reloading, writing out and resetting to the baseline copy.
//! Targeted deletion is absent, so leftovers force a rebuild.

mod sqlite;

pub use sqlite::{IndexedResource, SqliteIndex};

use serde_json::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("{resource_type} document has no id")]
    MissingId { resource_type: String },

    #[error("index storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{resource_type} document rejected: {reason}")]
    Rejected {
        resource_type: String,
        reason: String,
    },

    #[error("index is not loaded")]
    NotLoaded,
}

/// Queryable store of resource metadata
pub trait MetadataIndex {
    /// Add or replace one resource
    fn index_resource(&mut self, resource_type: &str, document: &Value) -> Result<(), IndexError>;

    /// Discard unsaved state and load the index from its file
    fn reload_from_disk(&mut self) -> Result<(), IndexError>;

    /// Make all indexed resources durable at `path`
    fn write_to_disk(&mut self, path: &Path) -> Result<(), IndexError>;

    /// Replace the index file at `path` with the pristine baseline index
    fn copy_baseline_to(&mut self, path: &Path) -> Result<(), IndexError>;
}

impl<T: MetadataIndex + ?Sized> MetadataIndex for &mut T {
    fn index_resource(&mut self, resource_type: &str, document: &Value) -> Result<(), IndexError> {
        (**self).index_resource(resource_type, document)
    }

    fn reload_from_disk(&mut self) -> Result<(), IndexError> {
        (**self).reload_from_disk()
    }

    fn write_to_disk(&mut self, path: &Path) -> Result<(), IndexError> {
        (**self).write_to_disk(path)
    }

    fn copy_baseline_to(&mut self, path: &Path) -> Result<(), IndexError> {
        (**self).copy_baseline_to(path)
    }
}

/// Member names a resource id is read from, in order of preference
const ID_FIELDS: &[&str] = &["id", "Id", "ID", "identifier", "Identifier"];

/// Read the resource id a document declares
///
/// `Description.Id` wins over top-level id members.
pub fn document_id(document: &Value) -> Option<String> {
    let from_description = document
        .get("Description")
        .and_then(|description| description.get("Id"));

    from_description
        .into_iter()
        .chain(ID_FIELDS.iter().filter_map(|field| document.get(*field)))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Collect tags from `*Tags` members, either `{"items": [..]}` or a plain list
pub fn document_tags(document: &Value) -> Vec<String> {
    let Some(members) = document.as_object() else {
        return Vec::new();
    };

    let mut tags: Vec<String> = members
        .iter()
        .filter(|(name, _)| name.ends_with("Tags") || name.ends_with("tags"))
        .filter_map(|(_, value)| match value {
            Value::Object(tag_set) => tag_set.get("items").and_then(Value::as_array),
            Value::Array(items) => Some(items),
            _ => None,
        })
        .flatten()
        .filter_map(|tag| tag.as_str().map(str::to_string))
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_id_prefers_description() {
        let document = json!({"Description": {"Id": "mech_atlas"}, "id": "other"});
        assert_eq!(document_id(&document), Some("mech_atlas".to_string()));
    }

    #[test]
    fn test_document_id_fallbacks() {
        assert_eq!(document_id(&json!({"ID": "x"})), Some("x".to_string()));
        assert_eq!(document_id(&json!({"identifier": 42})), Some("42".to_string()));
        assert_eq!(document_id(&json!({"id": ""})), None);
        assert_eq!(document_id(&json!({"Name": "nothing"})), None);
    }

    #[test]
    fn test_document_tags() {
        let document = json!({
            "MechTags": {"items": ["unit_heavy", "unit_assault"]},
            "ComponentTags": ["component_type_stock", "unit_heavy"],
            "Tonnage": 100
        });
        assert_eq!(
            document_tags(&document),
            vec!["component_type_stock", "unit_assault", "unit_heavy"]
        );
    }
}
