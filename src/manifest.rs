// src/manifest.rs

//! Manifest expansion
//!
//! Activated packages are expanded one at a time, in load order, into the
//! live [`EntrySet`]. Each declared entry becomes zero or more concrete
//! entries which are routed:
//! - JSON patches for an existing resource go to the merge cache
//! - entries naming an overlay go to that overlay only
//! - everything else adds or replaces the live resource for its key
//!
//! Two declaration shapes expand specially. A file declared with the
//! [`ADVANCED_MERGE_TYPE`] type becomes one instruction patch per target it
//! names. The content pack directory, laid out as `<pack>/<Type>/<file>`,
//! becomes one declaration per type directory that requires its pack.

use crate::cache::{CacheKey, MergeCache, MetadataIndexCache};
use crate::merge::PatchFormat;
use crate::package::{DeclaredEntry, Entry, PackageDescriptor};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Declared type of advanced merge files
pub const ADVANCED_MERGE_TYPE: &str = "AdvancedJSONMerge";

/// The live resources of a run, later additions replacing earlier ones
#[derive(Debug, Default)]
pub struct EntrySet {
    resources: BTreeMap<CacheKey, Entry>,
    overlays: BTreeMap<String, BTreeMap<CacheKey, Entry>>,
}

impl EntrySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, returning the entry it replaced
    pub fn add_resource(&mut self, entry: Entry) -> Option<Entry> {
        let replaced = self.resources.insert(entry.key.clone(), entry);
        if let Some(previous) = &replaced {
            debug!("{} replaces {}", previous.key, previous.source_path.display());
        }
        replaced
    }

    pub fn add_to_overlay(&mut self, overlay: &str, entry: Entry) {
        self.overlays
            .entry(overlay.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
    }

    pub fn resource(&self, key: &CacheKey) -> Option<&Entry> {
        self.resources.get(key)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Entry> {
        self.resources.values()
    }

    pub fn overlay(&self, name: &str) -> Option<&BTreeMap<CacheKey, Entry>> {
        self.overlays.get(name)
    }

    pub fn overlay_names(&self) -> impl Iterator<Item = &str> {
        self.overlays.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Find the type of the single live resource with this id and extension
    pub fn infer_type(&self, id: &str, extension: &str) -> Result<String, String> {
        let matches: Vec<&CacheKey> = self
            .resources
            .values()
            .filter(|entry| entry.id() == id && entry.extension() == extension)
            .map(|entry| &entry.key)
            .collect();

        match matches.as_slice() {
            [] => Err(format!("no existing resource with id {}", id)),
            [key] => Ok(key.resource_type.clone()),
            several => Err(format!(
                "id {} is ambiguous between {} resource types",
                id,
                several.len()
            )),
        }
    }
}

/// How packages are expanded
#[derive(Debug, Clone)]
pub struct ExpansionOptions {
    /// Directory below each package laid out as `<ResourceType>/<file>`
    pub implicit_manifest_dir: String,
    /// Treat JSON files in the implicit directories as merge patches
    pub implicit_manifest_merge_json: bool,
    /// Directory below each package laid out as `<pack>/<ResourceType>/<file>`
    pub content_pack_dir: String,
    /// `None` means every content pack is available
    pub available_content_packs: Option<BTreeSet<String>>,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            implicit_manifest_dir: "content".to_string(),
            implicit_manifest_merge_json: true,
            content_pack_dir: "content_packs".to_string(),
            available_content_packs: None,
        }
    }
}

/// A declared entry that contributed nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub package: String,
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for SkippedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.package, self.path.display(), self.reason)
    }
}

/// What expanding one package produced
#[derive(Debug, Clone, Default)]
pub struct ExpansionReport {
    pub resources: usize,
    pub patches: usize,
    /// Entries redirected to an overlay
    pub overlays: usize,
    pub skipped: Vec<SkippedEntry>,
}

/// The part of an advanced merge file that decides where it applies
#[derive(Debug, Deserialize)]
struct AdvancedMergeTargets {
    #[serde(rename = "TargetType")]
    target_type: String,
    #[serde(rename = "TargetID", default)]
    target_id: Option<String>,
    #[serde(rename = "TargetIDs", default)]
    target_ids: Vec<String>,
}

impl AdvancedMergeTargets {
    fn read(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
        let targets: Self = serde_json::from_str(&text)
            .map_err(|e| format!("invalid advanced merge: {}", e))?;
        if targets.target_type.trim().is_empty() {
            return Err("advanced merge has no TargetType".to_string());
        }
        Ok(targets)
    }

    /// Named targets in order; the file stem when none are named
    fn ids(&self, path: &Path) -> Vec<String> {
        let mut ids: Vec<String> = self
            .target_id
            .iter()
            .chain(&self.target_ids)
            .filter(|id| !id.is_empty())
            .cloned()
            .collect();
        if ids.is_empty()
            && let Some(stem) = path.file_stem()
        {
            ids.push(stem.to_string_lossy().to_string());
        }
        ids
    }
}

/// Expands packages into the entry set and the caches
pub struct ManifestExpander<'a> {
    options: &'a ExpansionOptions,
}

impl<'a> ManifestExpander<'a> {
    pub fn new(options: &'a ExpansionOptions) -> Self {
        Self { options }
    }

    /// Expand one activated package
    pub fn expand(
        &self,
        package: &PackageDescriptor,
        entries: &mut EntrySet,
        merges: &mut MergeCache,
        index_cache: &mut MetadataIndexCache,
    ) -> ExpansionReport {
        let mut report = ExpansionReport::default();

        let mut declarations = package.entries.clone();
        if package.load_implicit_manifest {
            declarations.extend(self.implicit_declarations(package));
        }
        let declarations = self.expand_content_packs(package, declarations);

        for declared in &declarations {
            let path = package.resolve_path(&declared.path);
            let mut skip = |reason: String| {
                report.skipped.push(SkippedEntry {
                    package: package.name.clone(),
                    path: path.clone(),
                    reason,
                });
            };

            if !path.exists() {
                warn!("{}: manifest path {} does not exist", package.name, path.display());
                skip("path does not exist".to_string());
                continue;
            }

            if let Some(missing) = self.missing_content_pack(declared) {
                info!(
                    "{}: skipping {}, content pack {} is not available",
                    package.name,
                    path.display(),
                    missing
                );
                skip(format!("requires unavailable content pack {}", missing));
                continue;
            }

            let is_dir = path.is_dir();
            for file in expand_path(&path) {
                if declared.resource_type.as_deref() == Some(ADVANCED_MERGE_TYPE) {
                    self.expand_advanced_merge(package, &file, declared, merges, &mut report);
                    continue;
                }

                let id = match (&declared.id, is_dir) {
                    (Some(id), false) => id.clone(),
                    _ => match file.file_stem() {
                        Some(stem) => stem.to_string_lossy().to_string(),
                        None => continue,
                    },
                };

                let resource_type = match &declared.resource_type {
                    Some(resource_type) => resource_type.clone(),
                    None => {
                        let extension = file
                            .extension()
                            .map(|ext| ext.to_string_lossy().to_lowercase())
                            .unwrap_or_default();
                        match entries.infer_type(&id, &extension) {
                            Ok(resource_type) => resource_type,
                            Err(reason) => {
                                warn!(
                                    "{}: cannot determine type of {}: {}",
                                    package.name,
                                    file.display(),
                                    reason
                                );
                                report.skipped.push(SkippedEntry {
                                    package: package.name.clone(),
                                    path: file.clone(),
                                    reason,
                                });
                                continue;
                            }
                        }
                    }
                };

                let entry = Entry::from_declaration(
                    &package.name,
                    CacheKey::new(resource_type, id),
                    &file,
                    declared,
                );
                self.route(entry, entries, merges, index_cache, &mut report);
            }
        }

        debug!(
            "{}: {} resources, {} patches, {} overlay entries, {} skipped",
            package.name,
            report.resources,
            report.patches,
            report.overlays,
            report.skipped.len()
        );
        report
    }

    fn route(
        &self,
        entry: Entry,
        entries: &mut EntrySet,
        merges: &mut MergeCache,
        index_cache: &mut MetadataIndexCache,
        report: &mut ExpansionReport,
    ) {
        if entry.merge_as_patch && entry.is_json() {
            if entries.resource(&entry.key).is_some() {
                if merges.add_patch(entry) {
                    report.patches += 1;
                }
                return;
            }
            debug!("{} patches nothing, adding it as a resource", entry);
        }

        if let Some(overlay) = entry.overlay.clone() {
            debug!("{} goes to overlay {}", entry, overlay);
            entries.add_to_overlay(&overlay, entry);
            report.overlays += 1;
            return;
        }

        // The latest contribution for a key decides whether it is indexed
        if entry.add_to_index {
            index_cache.unmark_ignored(&entry.key);
        } else {
            index_cache.mark_ignored(entry.key.clone());
        }
        entries.add_resource(entry);
        report.resources += 1;
    }

    /// One instruction patch per target the file names
    fn expand_advanced_merge(
        &self,
        package: &PackageDescriptor,
        file: &Path,
        declared: &DeclaredEntry,
        merges: &mut MergeCache,
        report: &mut ExpansionReport,
    ) {
        let targets = match AdvancedMergeTargets::read(file) {
            Ok(targets) => targets,
            Err(reason) => {
                warn!("{}: skipping {}: {}", package.name, file.display(), reason);
                report.skipped.push(SkippedEntry {
                    package: package.name.clone(),
                    path: file.to_path_buf(),
                    reason,
                });
                return;
            }
        };

        for id in targets.ids(file) {
            let mut entry = Entry::from_declaration(
                &package.name,
                CacheKey::new(targets.target_type.clone(), id),
                file,
                declared,
            );
            entry.merge_as_patch = true;
            entry.patch_format = PatchFormat::Instructions;
            if merges.add_patch(entry) {
                report.patches += 1;
            }
        }
    }

    /// Replace a declaration of the content pack directory with one
    /// declaration per `<pack>/<Type>` directory
    fn expand_content_packs(
        &self,
        package: &PackageDescriptor,
        declarations: Vec<DeclaredEntry>,
    ) -> Vec<DeclaredEntry> {
        let base = Path::new(&self.options.content_pack_dir);
        let mut expanded = Vec::with_capacity(declarations.len());

        for declared in declarations {
            let dir = package.resolve_path(&declared.path);
            if declared.path != base || !dir.is_dir() {
                expanded.push(declared);
                continue;
            }

            for pack in subdirectories(&dir) {
                for resource_type in subdirectories(&dir.join(&pack)) {
                    let mut copy = declared.clone();
                    copy.path = declared.path.join(&pack).join(&resource_type);
                    copy.id = None;
                    copy.resource_type = Some(resource_type);
                    copy.required_content_packs = vec![pack.clone()];
                    expanded.push(copy);
                }
            }
        }
        expanded
    }

    fn missing_content_pack<'d>(&self, declared: &'d DeclaredEntry) -> Option<&'d str> {
        let available = self.options.available_content_packs.as_ref()?;
        declared
            .required_content_packs
            .iter()
            .find(|pack| !available.contains(*pack))
            .map(String::as_str)
    }

    /// One declaration per resource type directory in the implicit manifest,
    /// plus the content pack directory when present
    fn implicit_declarations(&self, package: &PackageDescriptor) -> Vec<DeclaredEntry> {
        let merge_json = self.options.implicit_manifest_merge_json;
        let root = Path::new(&self.options.implicit_manifest_dir);

        let mut declarations: Vec<DeclaredEntry> = subdirectories(&package.resolve_path(root))
            .into_iter()
            .map(|resource_type| {
                let mut declared =
                    DeclaredEntry::new(root.join(&resource_type)).with_type(resource_type);
                declared.merge_as_patch = merge_json;
                declared
            })
            .collect();

        let packs = Path::new(&self.options.content_pack_dir);
        if package.resolve_path(packs).is_dir() {
            let mut declared = DeclaredEntry::new(packs);
            declared.merge_as_patch = merge_json;
            declarations.push(declared);
        }
        declarations
    }
}

/// Names of the directories directly below `dir`, sorted
fn subdirectories(dir: &Path) -> Vec<String> {
    if !dir.is_dir() {
        return Vec::new();
    }

    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect()
}

/// A file expands to itself, a directory to its files in name order
fn expand_path(path: &Path) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path.to_path_buf()];
    }

    WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.into_path())
        .collect()
}
