// src/package/descriptor.rs

//! The `mod.json` package descriptor document

use super::{DeclaredEntry, PackageDescriptor};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// File name that marks a directory as a package
pub const DESCRIPTOR_FILE_NAME: &str = "mod.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescriptorFile {
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    optionally_depends_on: Vec<String>,
    #[serde(default)]
    conflicts_with: Vec<String>,
    #[serde(default = "default_true")]
    load_implicit_manifest: bool,
    #[serde(default)]
    manifest: Vec<ManifestEntryFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManifestEntryFile {
    path: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "Type")]
    resource_type: Option<String>,
    #[serde(default, rename = "ShouldMergeJSON")]
    merge_as_patch: bool,
    #[serde(default = "default_true", rename = "AddToDB")]
    add_to_index: bool,
    #[serde(default, rename = "AddToAddendum")]
    overlay: Option<String>,
    #[serde(default)]
    required_content_packs: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Parse descriptor text found in `directory`
pub fn parse_descriptor(text: &str, directory: &Path) -> Result<PackageDescriptor> {
    let invalid = |reason: String| Error::InvalidDescriptor {
        path: directory.join(DESCRIPTOR_FILE_NAME),
        reason,
    };

    let file: DescriptorFile = serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;

    let name = file.name.trim().to_string();
    if name.is_empty() {
        return Err(invalid("package name is empty".to_string()));
    }

    let mut entries = Vec::with_capacity(file.manifest.len());
    for (position, entry) in file.manifest.into_iter().enumerate() {
        if entry.path.trim().is_empty() {
            return Err(invalid(format!("manifest entry {} has no path", position)));
        }
        entries.push(DeclaredEntry {
            path: PathBuf::from(entry.path),
            id: entry.id.filter(|id| !id.is_empty()),
            resource_type: entry.resource_type.filter(|t| !t.is_empty()),
            merge_as_patch: entry.merge_as_patch,
            add_to_index: entry.add_to_index,
            overlay: entry.overlay.filter(|o| !o.is_empty()),
            required_content_packs: entry.required_content_packs,
        });
    }

    Ok(PackageDescriptor {
        name,
        directory: directory.to_path_buf(),
        depends_on: file.depends_on.into_iter().collect(),
        optionally_depends_on: file.optionally_depends_on.into_iter().collect(),
        conflicts_with: file.conflicts_with.into_iter().collect(),
        enabled: file.enabled,
        load_implicit_manifest: file.load_implicit_manifest,
        entries,
    })
}

/// Load the descriptor of the package in `directory`
pub fn load_descriptor(directory: &Path) -> Result<PackageDescriptor> {
    let path = directory.join(DESCRIPTOR_FILE_NAME);
    let text = fs::read_to_string(&path).map_err(|e| Error::InvalidDescriptor {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    parse_descriptor(&text, directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_descriptor() {
        let text = r#"{
            "Name": "Lasers",
            "DependsOn": ["Core"],
            "OptionallyDependsOn": ["Extras"],
            "ConflictsWith": ["OldLasers"],
            "Manifest": [
                { "Type": "WeaponDef", "Path": "weapons" },
                { "Type": "WeaponDef", "Path": "patches/laser.json", "ShouldMergeJSON": true },
                { "Type": "Sprite", "Path": "icons", "AddToDB": false, "AddToAddendum": "Icons" }
            ]
        }"#;

        let descriptor = parse_descriptor(text, Path::new("/mods/Lasers")).unwrap();
        assert_eq!(descriptor.name, "Lasers");
        assert!(descriptor.enabled);
        assert!(descriptor.load_implicit_manifest);
        assert!(descriptor.depends_on.contains("Core"));
        assert!(descriptor.optionally_depends_on.contains("Extras"));
        assert!(descriptor.conflicts_with.contains("OldLasers"));
        assert_eq!(descriptor.entries.len(), 3);

        assert!(!descriptor.entries[0].merge_as_patch);
        assert!(descriptor.entries[1].merge_as_patch);
        assert!(!descriptor.entries[2].add_to_index);
        assert_eq!(descriptor.entries[2].overlay.as_deref(), Some("Icons"));
        assert_eq!(descriptor.directory, PathBuf::from("/mods/Lasers"));
    }

    #[test]
    fn test_minimal_descriptor_defaults() {
        let descriptor = parse_descriptor(r#"{"Name": "Bare"}"#, Path::new("/mods/Bare")).unwrap();
        assert!(descriptor.enabled);
        assert!(descriptor.entries.is_empty());
        assert!(descriptor.depends_on.is_empty());
    }

    #[test]
    fn test_disabled_descriptor() {
        let descriptor =
            parse_descriptor(r#"{"Name": "Off", "Enabled": false}"#, Path::new("/mods/Off"))
                .unwrap();
        assert!(!descriptor.enabled);
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = parse_descriptor(r#"{"Name": "  "}"#, Path::new("/mods/x"));
        assert!(matches!(result, Err(Error::InvalidDescriptor { .. })));
    }

    #[test]
    fn test_entry_without_path_rejected() {
        let result = parse_descriptor(
            r#"{"Name": "x", "Manifest": [{"Path": ""}]}"#,
            Path::new("/mods/x"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_json_names_file() {
        let err = parse_descriptor("{ nope", Path::new("/mods/Broken")).unwrap_err();
        assert!(err.to_string().contains("/mods/Broken/mod.json"));
    }
}
