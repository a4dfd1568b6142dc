// src/config.rs

//! Configuration file
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. A file that cannot be read or parsed is reported and the
//! defaults are used instead.

use crate::cache::FingerprintMode;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "modweave.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory searched for packages
    pub mods_dir: PathBuf,
    /// Reference content laid out as `<ResourceType>/<file>`
    pub baseline_dir: PathBuf,
    /// Caches, load order and the metadata index live here
    pub state_dir: PathBuf,
    /// Pristine metadata index copied into place on rebuild
    pub baseline_index: Option<PathBuf>,

    /// Find `mod.json` at any depth below `mods_dir`
    pub search_subdirectories: bool,
    /// Directory below each package scanned as an implicit manifest
    pub implicit_manifest_dir: String,
    /// Treat JSON files in the implicit manifest as merge patches
    pub implicit_manifest_merge_json: bool,
    /// Directory below each package laid out as `<pack>/<ResourceType>/<file>`
    pub content_pack_dir: String,

    pub fingerprint: FingerprintMode,

    /// Packages never loaded
    pub blocked_mods: BTreeSet<String>,
    /// Dependency names treated as satisfied
    pub ignore_missing_mods: BTreeSet<String>,
    /// Installed content packs; absent means all
    pub available_content_packs: Option<BTreeSet<String>>,

    /// Rewrite the index and its cache even when nothing changed
    pub always_save_index: bool,

    pub log_level: String,
    /// Steps slower than this are logged
    pub slow_step_threshold_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mods_dir: PathBuf::from("Mods"),
            baseline_dir: PathBuf::from("baseline"),
            state_dir: PathBuf::from("Mods/.modweave"),
            baseline_index: None,
            search_subdirectories: true,
            implicit_manifest_dir: "content".to_string(),
            implicit_manifest_merge_json: true,
            content_pack_dir: "content_packs".to_string(),
            fingerprint: FingerprintMode::default(),
            blocked_mods: BTreeSet::new(),
            ignore_missing_mods: BTreeSet::new(),
            available_content_packs: None,
            always_save_index: false,
            log_level: "info".to_string(),
            slow_step_threshold_ms: 1000,
        }
    }
}

impl Config {
    /// Parse configuration text; relative paths stay relative
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file, falling back to defaults
    ///
    /// Relative paths in the file are resolved against the file's directory.
    pub fn load(path: &Path) -> Self {
        let base = path.parent().unwrap_or(Path::new(""));

        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Self::default().relative_to(base);
        }

        let parsed = fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|text| Self::parse(&text));
        match parsed {
            Ok(config) => config.relative_to(base),
            Err(e) => {
                warn!("Ignoring configuration {}: {}", path.display(), e);
                Self::default().relative_to(base)
            }
        }
    }

    /// Resolve relative paths against `base`
    pub fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.mods_dir);
        resolve(&mut self.baseline_dir);
        resolve(&mut self.state_dir);
        if let Some(index) = self.baseline_index.as_mut() {
            resolve(index);
        }
        self
    }

    /// Render the effective configuration
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_file() {
        let config = Config::parse(
            r#"
            mods_dir = "/games/bt/Mods"
            fingerprint = "content"
            blocked_mods = ["Broken"]
            available_content_packs = ["flashpoint"]
            "#,
        )
        .unwrap();

        assert_eq!(config.mods_dir, PathBuf::from("/games/bt/Mods"));
        assert_eq!(config.fingerprint, FingerprintMode::Content);
        assert!(config.blocked_mods.contains("Broken"));
        assert!(config.available_content_packs.unwrap().contains("flashpoint"));
        assert!(config.search_subdirectories);
        assert_eq!(config.slow_step_threshold_ms, 1000);
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "mods_dir = [not toml").unwrap();

        let config = Config::load(&path);
        assert_eq!(config.mods_dir, temp.path().join("Mods"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_relative_paths_resolved_against_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "state_dir = \"state\"\nbaseline_index = \"db/base.db\"\n").unwrap();

        let config = Config::load(&path);
        assert_eq!(config.state_dir, temp.path().join("state"));
        assert_eq!(config.baseline_index, Some(temp.path().join("db/base.db")));
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let config = Config::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::parse(&text).unwrap(), config);
    }
}
