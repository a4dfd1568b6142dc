// src/resolver/order.rs

//! Persisted load order
//!
//! The order of the previous run seeds the next resolution so an unchanged
//! package set loads in the same order.

use crate::cache::store::{read_json, write_json_atomic};
use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// Read the previous load order; missing or corrupt files give an empty seed
pub fn load_order(path: &Path) -> Vec<String> {
    let order: Vec<String> = read_json(path, "load order").unwrap_or_default();
    debug!("Previous load order has {} packages", order.len());
    order
}

pub fn save_order(path: &Path, order: &[String]) -> Result<()> {
    write_json_atomic(path, &order)
}
