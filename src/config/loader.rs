//! Turn a configuration file into a validated unit graph

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::model::{CommandLine, ConfigFile, ServiceConfig, UnitConfig};
use crate::drivers::{DstDriver, LifecycleDriver, SimpleDriver, StartMode, StopMode};
use crate::manager::{GraphError, UnitGraph};
use crate::units::{sanitize_container_name, GroupUnit, ServiceUnit, Unit};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unit {unit}: {reason}")]
    InvalidUnit { unit: String, reason: String },

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn invalid(unit: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidUnit {
        unit: unit.to_string(),
        reason: reason.into(),
    }
}

/// Read and decode a configuration file without building units
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents)
}

/// Decode and check global settings
pub fn parse(contents: &str) -> Result<ConfigFile, ConfigError> {
    let config: ConfigFile = toml::from_str(contents)?;
    if config.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "poll_interval_secs must be at least 1".to_string(),
        ));
    }
    if config.tmux.session_name.is_empty() {
        return Err(ConfigError::Invalid(
            "tmux.session_name cannot be empty".to_string(),
        ));
    }
    Ok(config)
}

impl ConfigFile {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Build the unit graph described by `[[units]]`
    pub fn build_graph(&self) -> Result<UnitGraph, ConfigError> {
        let units = self
            .units
            .iter()
            .map(build_unit)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UnitGraph::new(units)?)
    }
}

fn build_unit(cfg: &UnitConfig) -> Result<Unit, ConfigError> {
    if cfg.name.is_empty() {
        return Err(ConfigError::Invalid("unit name cannot be empty".to_string()));
    }

    let unit = match (&cfg.service, &cfg.group) {
        (Some(service), None) => Unit::service(&cfg.name, build_service(&cfg.name, service)?),
        (None, Some(group)) => Unit::group(&cfg.name, GroupUnit::new(group.requires.clone())),
        (Some(_), Some(_)) => {
            return Err(invalid(&cfg.name, "has both a service and a group section"))
        }
        (None, None) => return Err(invalid(&cfg.name, "needs a service or a group section")),
    };

    Ok(unit
        .with_description(&cfg.description)
        .with_styles(&cfg.styles)
        .hidden(cfg.hidden))
}

fn build_service(name: &str, cfg: &ServiceConfig) -> Result<ServiceUnit, ConfigError> {
    let container = match &cfg.tmux_window_name {
        Some(window) => window.clone(),
        None => sanitize_container_name(name),
    };

    let driver = match &cfg.dont_starve_together {
        Some(dst) => {
            if cfg.start_command.is_some() || cfg.start_script.is_some() {
                return Err(invalid(
                    name,
                    "dont_starve_together cannot be combined with start_command or start_script",
                ));
            }
            LifecycleDriver::Dst(check_dst(name, dst)?)
        }
        None => LifecycleDriver::Simple(build_simple(name, cfg)?),
    };

    Ok(ServiceUnit::new(container, driver))
}

fn build_simple(name: &str, cfg: &ServiceConfig) -> Result<SimpleDriver, ConfigError> {
    let start = match (&cfg.start_command, &cfg.start_script) {
        (Some(command), None) => StartMode::Command(command_argv(name, "start_command", command)?),
        (None, Some(script)) => StartMode::Script(command_argv(name, "start_script", script)?),
        (Some(_), Some(_)) => {
            return Err(invalid(name, "start_command and start_script are exclusive"))
        }
        (None, None) => return Err(invalid(name, "missing start_command or start_script")),
    };

    let stop = match (&cfg.stop_input, &cfg.stop_script) {
        (Some(input), None) => StopMode::Input(
            input
                .argv()
                .ok_or_else(|| invalid(name, "stop_input has unbalanced quotes"))?,
        ),
        (None, Some(script)) => StopMode::Script(command_argv(name, "stop_script", script)?),
        (Some(_), Some(_)) => {
            return Err(invalid(name, "stop_input and stop_script are exclusive"))
        }
        (None, None) => {
            log::warn!("Unit {} has no stop_input or stop_script", name);
            StopMode::Input(Vec::new())
        }
    };

    Ok(SimpleDriver::new(start, stop))
}

fn command_argv(unit: &str, field: &str, command: &CommandLine) -> Result<Vec<String>, ConfigError> {
    match command.argv() {
        Some(argv) if !argv.is_empty() => Ok(argv),
        Some(_) => Err(invalid(unit, format!("{} cannot be empty", field))),
        None => Err(invalid(unit, format!("{} has unbalanced quotes", field))),
    }
}

fn check_dst(name: &str, dst: &DstDriver) -> Result<DstDriver, ConfigError> {
    let missing = [
        ("game_install", dst.game_install.as_os_str().is_empty()),
        ("data_dir", dst.data_dir.as_os_str().is_empty()),
        ("cluster", dst.cluster.is_empty()),
        ("shards", dst.shards.is_empty()),
    ];
    if let Some((field, _)) = missing.iter().find(|(_, empty)| *empty) {
        return Err(invalid(name, format!("field {} cannot be empty", field)));
    }
    Ok(dst.clone())
}
