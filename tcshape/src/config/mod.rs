//! Configuration management for tcshape.
//!
//! This module provides:
//! - CLI argument parsing
//! - JSON5 profile lookup
//! - Merging of defaults, profile and flags into an [`AppConfig`]
//! - Configuration validation

pub mod app_config;
pub mod cli;
pub mod profile_loader;

pub use app_config::{AppConfig, LogLevel};
pub use cli::{Action, CliConfig, parse_port_list};
pub use profile_loader::ProfileLoader;
