// src/package/mod.rs

//! Packages and their entries
//!
//! A package ("mod") declares dependency and conflict relationships to other
//! packages plus an ordered manifest of resource contributions. Declarations
//! are kept as written ([`DeclaredEntry`]); manifest expansion turns them into
//! concrete [`Entry`] values with a resolved [`CacheKey`].

mod descriptor;
mod discovery;

pub use descriptor::{load_descriptor, parse_descriptor, DESCRIPTOR_FILE_NAME};
pub use discovery::{ContentSource, DirectorySource};

use crate::cache::{CacheKey, FingerprintMode, VersionFingerprint};
use crate::merge::PatchFormat;
use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A discovered package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// Unique package name
    pub name: String,
    /// Directory the descriptor was found in; manifest paths are relative to it
    pub directory: PathBuf,
    pub depends_on: BTreeSet<String>,
    pub optionally_depends_on: BTreeSet<String>,
    pub conflicts_with: BTreeSet<String>,
    pub enabled: bool,
    /// Whether the implicit content directory is scanned in addition to `entries`
    pub load_implicit_manifest: bool,
    /// Manifest entries in declaration order
    pub entries: Vec<DeclaredEntry>,
}

impl PackageDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directory: PathBuf::new(),
            depends_on: BTreeSet::new(),
            optionally_depends_on: BTreeSet::new(),
            conflicts_with: BTreeSet::new(),
            enabled: true,
            load_implicit_manifest: true,
            entries: Vec::new(),
        }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.depends_on.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn optionally_depends_on(mut self, names: &[&str]) -> Self {
        self.optionally_depends_on
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn conflicts_with(mut self, names: &[&str]) -> Self {
        self.conflicts_with.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn with_entry(mut self, entry: DeclaredEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Drop dependency names that should be treated as always satisfied
    pub fn ignore_dependencies(&mut self, ignored: &BTreeSet<String>) {
        self.depends_on.retain(|name| !ignored.contains(name));
        self.optionally_depends_on
            .retain(|name| !ignored.contains(name));
    }

    /// Resolve a manifest path against the package directory
    pub fn resolve_path(&self, relative: &Path) -> PathBuf {
        self.directory.join(relative)
    }
}

/// A manifest entry as declared in a package descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredEntry {
    /// File or directory, relative to the package directory
    pub path: PathBuf,
    /// Defaults to the file stem
    pub id: Option<String>,
    /// Inferred from existing resources when absent
    pub resource_type: Option<String>,
    pub merge_as_patch: bool,
    pub add_to_index: bool,
    /// Named overlay the entry is redirected to
    pub overlay: Option<String>,
    pub required_content_packs: Vec<String>,
}

impl DeclaredEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id: None,
            resource_type: None,
            merge_as_patch: false,
            add_to_index: true,
            overlay: None,
            required_content_packs: Vec::new(),
        }
    }

    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn as_patch(mut self) -> Self {
        self.merge_as_patch = true;
        self
    }
}

/// Where an entry comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryOrigin {
    /// Shipped reference content; already present in the baseline index
    Baseline,
    /// Contributed by the named package
    Package(String),
}

impl fmt::Display for EntryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Package(name) => write!(f, "{}", name),
        }
    }
}

/// One concrete resource contribution
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: CacheKey,
    pub source_path: PathBuf,
    pub origin: EntryOrigin,
    pub merge_as_patch: bool,
    pub patch_format: PatchFormat,
    pub add_to_index: bool,
    pub overlay: Option<String>,
    pub required_content_packs: Vec<String>,
    fingerprint: OnceCell<VersionFingerprint>,
}

impl Entry {
    pub fn baseline(key: CacheKey, source_path: impl Into<PathBuf>) -> Self {
        Self {
            key,
            source_path: source_path.into(),
            origin: EntryOrigin::Baseline,
            merge_as_patch: false,
            patch_format: PatchFormat::Document,
            add_to_index: true,
            overlay: None,
            required_content_packs: Vec::new(),
            fingerprint: OnceCell::new(),
        }
    }

    /// Build the entry a package declaration produces for one file
    pub fn from_declaration(
        package: &str,
        key: CacheKey,
        source_path: impl Into<PathBuf>,
        declared: &DeclaredEntry,
    ) -> Self {
        Self {
            key,
            source_path: source_path.into(),
            origin: EntryOrigin::Package(package.to_string()),
            merge_as_patch: declared.merge_as_patch,
            patch_format: PatchFormat::Document,
            add_to_index: declared.add_to_index,
            overlay: declared.overlay.clone(),
            required_content_packs: declared.required_content_packs.clone(),
            fingerprint: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }

    pub fn resource_type(&self) -> &str {
        &self.key.resource_type
    }

    pub fn is_baseline(&self) -> bool {
        self.origin == EntryOrigin::Baseline
    }

    pub fn is_json(&self) -> bool {
        self.source_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }

    /// Lower-cased extension, empty when there is none
    pub fn extension(&self) -> String {
        self.source_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// Fingerprint of the source file, computed on first use
    pub fn fingerprint(&self, mode: FingerprintMode) -> io::Result<&VersionFingerprint> {
        if let Some(fingerprint) = self.fingerprint.get() {
            return Ok(fingerprint);
        }
        let fingerprint = VersionFingerprint::of_file(&self.source_path, mode)?;
        Ok(self.fingerprint.get_or_init(|| fingerprint))
    }

    pub fn read_text(&self) -> io::Result<String> {
        fs::read_to_string(&self.source_path)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} ({})",
            self.key,
            self.origin,
            self.source_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_dependencies() {
        let mut descriptor = PackageDescriptor::new("a")
            .depends_on(&["b", "legacy"])
            .optionally_depends_on(&["legacy", "c"]);

        let ignored: BTreeSet<String> = ["legacy".to_string()].into_iter().collect();
        descriptor.ignore_dependencies(&ignored);

        assert_eq!(descriptor.depends_on.len(), 1);
        assert!(descriptor.depends_on.contains("b"));
        assert!(!descriptor.optionally_depends_on.contains("legacy"));
    }

    #[test]
    fn test_entry_json_detection() {
        let entry = Entry::baseline(CacheKey::new("MechDef", "atlas"), "x/atlas.JSON");
        assert!(entry.is_json());
        assert_eq!(entry.extension(), "json");

        let entry = Entry::baseline(CacheKey::new("Sprite", "icon"), "x/icon.png");
        assert!(!entry.is_json());
    }

    #[test]
    fn test_entry_fingerprint_is_lazy_and_cached() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("atlas.json");
        fs::write(&path, b"{}").unwrap();

        let entry = Entry::baseline(CacheKey::new("MechDef", "atlas"), &path);
        let first = entry.fingerprint(FingerprintMode::Content).unwrap().clone();

        // The file changing after the first read does not change the snapshot
        fs::write(&path, b"{\"changed\": true}").unwrap();
        let second = entry.fingerprint(FingerprintMode::Content).unwrap();
        assert_eq!(&first, second);
    }

    #[test]
    fn test_entry_from_declaration_copies_flags() {
        let declared = DeclaredEntry::new("weapons/laser.json")
            .with_type("WeaponDef")
            .as_patch();
        let entry = Entry::from_declaration(
            "Lasers",
            CacheKey::new("WeaponDef", "laser"),
            "/mods/Lasers/weapons/laser.json",
            &declared,
        );

        assert!(entry.merge_as_patch);
        assert!(entry.add_to_index);
        assert_eq!(entry.origin, EntryOrigin::Package("Lasers".to_string()));
        assert!(!entry.is_baseline());
    }
}
