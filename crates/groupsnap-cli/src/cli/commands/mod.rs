//! CLI command handlers.

pub mod composite;
pub mod config;
pub mod serve;
