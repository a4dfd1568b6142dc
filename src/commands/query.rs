// src/commands/query.rs

//! Metadata index queries

use anyhow::{Context, Result};
use modweave::{paths, Config, SqliteIndex};

fn open_index(config: &Config) -> Result<SqliteIndex> {
    let path = paths::metadata_db(&config.state_dir);
    SqliteIndex::open_read_only(&path)
        .context("Cannot open the metadata index (run `modweave run` first)")
}

/// Look up one resource, list a type, or summarize the index
pub fn cmd_query(config: &Config, resource_type: Option<&str>, id: Option<&str>) -> Result<()> {
    let index = open_index(config)?;

    match (resource_type, id) {
        (Some(resource_type), Some(id)) => match index.find(resource_type, id)? {
            Some(resource) => {
                println!(
                    "{}:{} (indexed {})",
                    resource.resource_type, resource.id, resource.indexed_at
                );
                if !resource.tags.is_empty() {
                    println!("Tags: {}", resource.tags.join(", "));
                }
                println!("{}", serde_json::to_string_pretty(&resource.document)?);
            }
            None => println!("No {} with id '{}' in the index.", resource_type, id),
        },
        (Some(resource_type), None) => {
            let resources = index.list(resource_type)?;
            if resources.is_empty() {
                println!("No {} resources in the index.", resource_type);
            } else {
                println!("{} resources:", resource_type);
                for resource in &resources {
                    println!("  {}", resource.id);
                }
                println!("\nTotal: {} resource(s)", resources.len());
            }
        }
        (None, _) => {
            let types = index.resource_types()?;
            if types.is_empty() {
                println!("The metadata index is empty.");
            } else {
                println!("Indexed resource types:");
                for (resource_type, count) in &types {
                    println!("  {:<32} {}", resource_type, count);
                }
                println!("\nTotal: {} resource(s)", index.count()?);
            }
        }
    }
    Ok(())
}

/// List resources carrying a tag
pub fn cmd_query_tag(config: &Config, tag: &str) -> Result<()> {
    let index = open_index(config)?;
    let tagged = index.with_tag(tag)?;

    if tagged.is_empty() {
        println!("No resources tagged '{}'.", tag);
    } else {
        println!("Resources tagged '{}':", tag);
        for (resource_type, id) in &tagged {
            println!("  {}:{}", resource_type, id);
        }
    }
    Ok(())
}
