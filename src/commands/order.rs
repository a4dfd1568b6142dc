// src/commands/order.rs

//! The `order` command: resolution without loading

use anyhow::Result;
use modweave::orchestrator::Orchestrator;
use modweave::{paths, Config, DirectorySource, JsonMerge, SqliteIndex};

/// Print the load order and every package that cannot be loaded
pub fn cmd_order(config: Config) -> Result<()> {
    let source = DirectorySource::new(&config.mods_dir, &config.baseline_dir)
        .search_subdirectories(config.search_subdirectories);
    let index = SqliteIndex::new(paths::metadata_db(&config.state_dir), None);
    let orchestrator = Orchestrator::new(config, source, JsonMerge, index);

    let resolution = orchestrator.resolve_only()?;

    if resolution.order.is_empty() {
        println!("No packages to load.");
    } else {
        println!("Load order:");
        for (position, name) in resolution.order.iter().enumerate() {
            println!("  {:>3}. {}", position + 1, name);
        }
    }

    if !resolution.unresolved.is_empty() {
        println!("\nNot loaded:");
        for unresolved in &resolution.unresolved {
            println!("  {}", unresolved);
        }
    }

    println!(
        "\nTotal: {} loaded, {} not loaded",
        resolution.order.len(),
        resolution.unresolved.len()
    );
    println!(
        "Graph: {} packages, {} dependencies ({} optional), {} conflict pairs",
        resolution.stats.total_packages,
        resolution.stats.total_dependencies,
        resolution.stats.optional_dependencies,
        resolution.stats.conflict_pairs
    );
    Ok(())
}
