//! Configuration loading and validation
//!
//! - `model.rs`: the TOML data model with its defaults.
//! - `loader.rs`: reading the file and building the unit graph from it.

pub mod loader;
pub mod model;

pub use loader::{load_from_path, parse, ConfigError};
pub use model::{
    CommandLine, ConfigFile, GroupConfig, ServiceConfig, TmuxSection, UnitConfig, WebSection,
};

use std::path::PathBuf;

/// Default configuration path, relative to the working directory
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config.toml")
}
