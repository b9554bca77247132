//! Runtime configuration: TOML file, command-line overrides and validation.

pub mod config;
pub mod types;

pub use config::{CliArgs, Config};
pub use types::*;
