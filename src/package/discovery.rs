// src/package/discovery.rs

//! Package and baseline discovery

use super::descriptor::{load_descriptor, DESCRIPTOR_FILE_NAME};
use super::{Entry, PackageDescriptor};
use crate::cache::CacheKey;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Supplies the packages and baseline content of a run
pub trait ContentSource {
    /// Enabled, successfully parsed packages in discovery order
    fn packages(&self) -> Result<Vec<PackageDescriptor>>;

    /// Reference resources present before any package is applied
    fn baseline(&self) -> Result<Vec<Entry>>;
}

/// Discovers packages and baseline content on the file system
#[derive(Debug, Clone)]
pub struct DirectorySource {
    mods_dir: PathBuf,
    baseline_dir: PathBuf,
    search_subdirectories: bool,
}

impl DirectorySource {
    pub fn new(mods_dir: impl Into<PathBuf>, baseline_dir: impl Into<PathBuf>) -> Self {
        Self {
            mods_dir: mods_dir.into(),
            baseline_dir: baseline_dir.into(),
            search_subdirectories: true,
        }
    }

    pub fn search_subdirectories(mut self, search: bool) -> Self {
        self.search_subdirectories = search;
        self
    }

    /// Directories containing a descriptor, in path order
    fn package_dirs(&self) -> Vec<PathBuf> {
        let max_depth = if self.search_subdirectories { usize::MAX } else { 2 };

        WalkDir::new(&self.mods_dir)
            .min_depth(2)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() == DESCRIPTOR_FILE_NAME)
            .filter_map(|e| e.path().parent().map(Path::to_path_buf))
            .collect()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

impl ContentSource for DirectorySource {
    fn packages(&self) -> Result<Vec<PackageDescriptor>> {
        if !self.mods_dir.is_dir() {
            info!("Package directory {} does not exist", self.mods_dir.display());
            return Ok(Vec::new());
        }

        let mut packages = Vec::new();
        for dir in self.package_dirs() {
            match load_descriptor(&dir) {
                Ok(descriptor) if !descriptor.enabled => {
                    info!("Package {} is disabled", descriptor.name);
                }
                Ok(descriptor) => {
                    debug!("Found package {} in {}", descriptor.name, dir.display());
                    packages.push(descriptor);
                }
                Err(e) => warn!("Skipping package: {}", e),
            }
        }

        info!("Discovered {} packages", packages.len());
        Ok(packages)
    }

    fn baseline(&self) -> Result<Vec<Entry>> {
        if !self.baseline_dir.is_dir() {
            debug!("Baseline directory {} does not exist", self.baseline_dir.display());
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for type_dir in WalkDir::new(&self.baseline_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            let resource_type = type_dir.file_name().to_string_lossy().to_string();

            for file in WalkDir::new(type_dir.path())
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_hidden(e))
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let Some(stem) = file.path().file_stem() else {
                    continue;
                };
                let key = CacheKey::new(resource_type.clone(), stem.to_string_lossy());
                entries.push(Entry::baseline(key, file.into_path()));
            }
        }

        debug!("Found {} baseline resources", entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_discovers_enabled_packages() {
        let temp = TempDir::new().unwrap();
        let mods = temp.path().join("Mods");
        write(&mods, "Core/mod.json", r#"{"Name": "Core"}"#);
        write(&mods, "Off/mod.json", r#"{"Name": "Off", "Enabled": false}"#);
        write(&mods, "Broken/mod.json", "{");
        write(&mods, "Group/Nested/mod.json", r#"{"Name": "Nested"}"#);
        write(&mods, ".modweave/Hidden/mod.json", r#"{"Name": "Hidden"}"#);

        let source = DirectorySource::new(&mods, temp.path().join("baseline"));
        let names: Vec<String> = source
            .packages()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Core", "Nested"]);
    }

    #[test]
    fn test_top_level_only() {
        let temp = TempDir::new().unwrap();
        let mods = temp.path().join("Mods");
        write(&mods, "Core/mod.json", r#"{"Name": "Core"}"#);
        write(&mods, "Group/Nested/mod.json", r#"{"Name": "Nested"}"#);

        let source =
            DirectorySource::new(&mods, temp.path().join("baseline")).search_subdirectories(false);
        let packages = source.packages().unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].directory, mods.join("Core"));
    }

    #[test]
    fn test_missing_directories_are_empty() {
        let temp = TempDir::new().unwrap();
        let source = DirectorySource::new(temp.path().join("none"), temp.path().join("none"));
        assert!(source.packages().unwrap().is_empty());
        assert!(source.baseline().unwrap().is_empty());
    }

    #[test]
    fn test_baseline_entries() {
        let temp = TempDir::new().unwrap();
        let baseline = temp.path().join("baseline");
        write(&baseline, "MechDef/atlas.json", "{}");
        write(&baseline, "MechDef/variants/atlas_ii.json", "{}");
        write(&baseline, "Sprite/icon.png", "png");

        let source = DirectorySource::new(temp.path().join("Mods"), &baseline);
        let keys: Vec<String> = source
            .baseline()
            .unwrap()
            .iter()
            .map(|e| e.key.to_string())
            .collect();
        assert_eq!(
            keys,
            vec!["MechDef:atlas", "MechDef:atlas_ii", "Sprite:icon"]
        );
    }
}
