// src/cli/cache.rs

//! Cache management commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show what the merge and index caches hold
    Status,

    /// Delete both caches; the next run rebuilds everything
    Clear {
        /// Also delete the stored load order
        #[arg(long)]
        order: bool,
    },
}
