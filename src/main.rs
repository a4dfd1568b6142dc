// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser};
use modweave::Config;
use tracing::debug;

mod cli;
mod commands;

use cli::{CacheCommands, Cli, Commands};

/// Build the log filter: `RUST_LOG` wins over the configured level
fn log_filter(level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config);

    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config.log_level))
        .init();
    debug!("Using configuration {}", cli.config.display());

    match cli.command {
        Some(Commands::Run {
            force_save,
            no_progress,
        }) => commands::cmd_run(config, force_save, no_progress),
        Some(Commands::Order) => commands::cmd_order(config),
        Some(Commands::Cache(CacheCommands::Status)) => commands::cmd_cache_status(&config),
        Some(Commands::Cache(CacheCommands::Clear { order })) => {
            commands::cmd_cache_clear(&config, order)
        }
        Some(Commands::Query {
            tag: Some(tag), ..
        }) => commands::cmd_query_tag(&config, &tag),
        Some(Commands::Query {
            resource_type, id, ..
        }) => commands::cmd_query(&config, resource_type.as_deref(), id.as_deref()),
        Some(Commands::Config) => commands::cmd_config(&config, &cli.config),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["modweave", "run", "--force-save"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Run {
                force_save: true,
                no_progress: false
            })
        ));
        assert_eq!(cli.config, std::path::PathBuf::from("modweave.toml"));
    }

    #[test]
    fn test_parse_query_and_global_config() {
        let cli = Cli::try_parse_from(["modweave", "query", "MechDef", "atlas", "-c", "alt.toml"])
            .unwrap();
        assert_eq!(cli.config, std::path::PathBuf::from("alt.toml"));
        match cli.command {
            Some(Commands::Query {
                resource_type, id, tag,
            }) => {
                assert_eq!(resource_type.as_deref(), Some("MechDef"));
                assert_eq!(id.as_deref(), Some("atlas"));
                assert!(tag.is_none());
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_tag_conflicts_with_type() {
        assert!(Cli::try_parse_from(["modweave", "query", "MechDef", "--tag", "heavy"]).is_err());
    }

    #[test]
    fn test_parse_cache_clear() {
        let cli = Cli::try_parse_from(["modweave", "cache", "clear", "--order"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Cache(CacheCommands::Clear { order: true }))
        ));
    }
}
