// src/commands/mod.rs

//! Command handlers for the modweave CLI

mod cache;
mod config;
mod order;
pub mod progress;
mod query;
mod run;

pub use cache::{cmd_cache_clear, cmd_cache_status};
pub use config::cmd_config;
pub use order::cmd_order;
pub use query::{cmd_query, cmd_query_tag};
pub use run::cmd_run;
