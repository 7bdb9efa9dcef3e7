// ABOUTME: Library module for mysql-bigquery-replicator
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod bigquery;
pub mod config;
pub mod deadletter;
pub mod logging;
pub mod mysql;
pub mod schema;
pub mod sync;
pub mod types;
pub mod utils;
