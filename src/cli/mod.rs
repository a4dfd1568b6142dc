// src/cli/mod.rs

//! CLI definitions for modweave
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `run` - Resolve, merge and index all packages
//! - `order` - Show the load order without loading anything
//! - `cache` - Inspect or clear the persisted caches
//! - `query` - Look up resources in the metadata index
//! - `config` - Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cache;

pub use cache::CacheCommands;

#[derive(Parser)]
#[command(name = "modweave")]
#[command(author = "Modweave Contributors")]
#[command(version)]
#[command(about = "Mod loader core: load order, cached JSON merging and metadata indexing", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = modweave::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the load order, merge patches and update the metadata index
    Run {
        /// Rewrite the index and its cache even when nothing changed
        #[arg(long)]
        force_save: bool,

        /// Log progress instead of drawing a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show the load order and the packages that cannot be loaded
    Order,

    /// Persisted cache management
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Look up resources in the metadata index
    ///
    /// Without a type, lists the indexed resource types with their counts.
    Query {
        /// Resource type, e.g. MechDef
        resource_type: Option<String>,

        /// Resource id (lists the type when omitted)
        id: Option<String>,

        /// List resources carrying this tag instead
        #[arg(long, conflicts_with_all = ["resource_type", "id"])]
        tag: Option<String>,
    },

    /// Print the effective configuration
    Config,
}
