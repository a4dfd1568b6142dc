// src/commands/run.rs

//! The `run` command: the full load pipeline

use super::progress::RunProgress;
use anyhow::Result;
use modweave::orchestrator::{Orchestrator, RunSummary};
use modweave::progress::{LogProgress, ProgressSink};
use modweave::{paths, Config, DirectorySource, JsonMerge, SqliteIndex};
use tracing::info;

/// Resolve, merge and index every package
pub fn cmd_run(config: Config, force_save: bool, no_progress: bool) -> Result<()> {
    info!("Loading packages from {}", config.mods_dir.display());

    let source = DirectorySource::new(&config.mods_dir, &config.baseline_dir)
        .search_subdirectories(config.search_subdirectories);
    let index = SqliteIndex::new(
        paths::metadata_db(&config.state_dir),
        config.baseline_index.clone(),
    );

    let mut orchestrator = Orchestrator::new(config, source, JsonMerge, index).force_save(force_save);

    let mut sink: Box<dyn ProgressSink> = if no_progress {
        Box::new(LogProgress::new("run"))
    } else {
        Box::new(RunProgress::new())
    };
    let summary = orchestrator.run_to_completion(sink.as_mut())?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Loaded {} of {} packages, {} resources",
        summary.order.len(),
        summary.discovered,
        summary.resources
    );
    println!(
        "Merged {} documents, indexed {} resources{}",
        summary.merged,
        summary.indexed,
        if summary.rebuild_required { " (index rebuilt)" } else { "" }
    );

    for (overlay, count) in &summary.overlays {
        println!("Overlay {}: {} entries (not indexed)", overlay, count);
    }

    if !summary.unresolved.is_empty() {
        println!("\nNot loaded:");
        for unresolved in &summary.unresolved {
            println!("  {}", unresolved);
        }
    }
    if !summary.skipped_entries.is_empty() {
        println!("\nSkipped manifest entries:");
        for skipped in &summary.skipped_entries {
            println!("  {}", skipped);
        }
    }
    if !summary.merge_failures.is_empty() {
        println!("\nMerge failures:");
        for failure in &summary.merge_failures {
            println!(
                "  {} <- {} ({}): {}",
                failure.target,
                failure.patch,
                failure.source_path.display(),
                failure.reason
            );
        }
    }
    if !summary.orphaned_patches.is_empty() {
        println!("\nPatches without a base document:");
        for key in &summary.orphaned_patches {
            println!("  {}", key);
        }
    }
    if !summary.index_failures.is_empty() {
        println!("\nIndex failures:");
        for failure in &summary.index_failures {
            println!("  {}", failure);
        }
    }
}
