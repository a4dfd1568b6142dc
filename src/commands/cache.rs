// src/commands/cache.rs

//! Cache inspection and cleanup commands

use anyhow::Result;
use modweave::{paths, Config, MergeCache, MetadataIndexCache};
use std::fs;
use tracing::info;

fn open_caches(config: &Config) -> (MergeCache, MetadataIndexCache) {
    let state_dir = &config.state_dir;
    let merges = MergeCache::open(
        &paths::merge_cache_file(state_dir),
        &paths::merged_dir(state_dir),
        config.fingerprint,
    );
    let index_cache = MetadataIndexCache::open(
        &paths::index_cache_file(state_dir),
        &paths::metadata_db(state_dir),
    );
    (merges, index_cache)
}

/// Show what the persisted caches hold
pub fn cmd_cache_status(config: &Config) -> Result<()> {
    let (merges, index_cache) = open_caches(config);
    let stats = merges.stats();

    println!("State directory: {}", config.state_dir.display());
    println!("Merge cache:");
    println!("  Merged documents: {}", stats.records);
    println!("  Patches applied:  {}", stats.patches);
    println!("  Stored content:   {} bytes", stats.stored_bytes);
    println!("Index cache:");
    println!("  Indexed resources: {}", index_cache.len());
    println!("  Awaiting reindex:  {}", index_cache.incomplete());
    println!(
        "  Metadata index:    {}",
        if index_cache.index_path().exists() {
            index_cache.index_path().display().to_string()
        } else {
            "not built".to_string()
        }
    );
    Ok(())
}

/// Delete both caches so the next run rebuilds everything
pub fn cmd_cache_clear(config: &Config, order: bool) -> Result<()> {
    let (mut merges, mut index_cache) = open_caches(config);

    let merged = merges.clear()?;
    let indexed = index_cache.clear()?;
    println!("Cleared {} merged documents and {} index entries", merged, indexed);

    if order {
        let order_file = paths::load_order_file(&config.state_dir);
        if order_file.exists() {
            fs::remove_file(&order_file)?;
            info!("Removed {}", order_file.display());
            println!("Removed stored load order");
        }
    }
    Ok(())
}
