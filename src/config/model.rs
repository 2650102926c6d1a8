//! TOML-backed configuration model
//!
//! ```toml
//! max_running_units = 2
//!
//! [tmux]
//! session_name = "tmaxhoc-managed"
//!
//! [[units]]
//! name = "minecraft"
//! description = "Survival world"
//! [units.service]
//! start_command = "java -jar server.jar nogui"
//! stop_input = ["stop", "Enter"]
//!
//! [[units]]
//! name = "weekend"
//! [units.group]
//! requires = ["minecraft"]
//! ```
//!
//! Every section is optional; defaults match an empty file.

use std::path::PathBuf;

use serde::Deserialize;

use crate::drivers::DstDriver;

pub const DEFAULT_SESSION_NAME: &str = "tmaxhoc-managed";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// Admission limit on running services; 0 means unlimited
    #[serde(default)]
    pub max_running_units: usize,

    /// Seconds between reconciliation sweeps
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub tmux: TmuxSection,

    #[serde(default)]
    pub web: WebSection,

    /// Units in display order
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            max_running_units: 0,
            poll_interval_secs: default_poll_interval_secs(),
            tmux: TmuxSection::default(),
            web: WebSection::default(),
            units: Vec::new(),
        }
    }
}

/// `[tmux]` section
#[derive(Debug, Clone, Deserialize)]
pub struct TmuxSection {
    #[serde(default = "default_session_name")]
    pub session_name: String,

    #[serde(default = "default_executable")]
    pub executable: PathBuf,
}

fn default_session_name() -> String {
    DEFAULT_SESSION_NAME.to_string()
}

fn default_executable() -> PathBuf {
    PathBuf::from("tmux")
}

impl Default for TmuxSection {
    fn default() -> Self {
        Self {
            session_name: default_session_name(),
            executable: default_executable(),
        }
    }
}

/// `[web]` section, read by the web panel
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_static_files_dir")]
    pub static_files_dir: PathBuf,
}

fn default_static_files_dir() -> PathBuf {
    PathBuf::from("static")
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            static_files_dir: default_static_files_dir(),
        }
    }
}

/// One `[[units]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct UnitConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub styles: String,

    #[serde(default)]
    pub hidden: bool,

    pub service: Option<ServiceConfig>,

    #[serde(alias = "target")]
    pub group: Option<GroupConfig>,
}

/// `[units.service]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    /// Container name; derived from the unit name when unset
    pub tmux_window_name: Option<String>,

    pub start_command: Option<CommandLine>,
    pub start_script: Option<CommandLine>,
    pub stop_input: Option<CommandLine>,
    pub stop_script: Option<CommandLine>,

    pub dont_starve_together: Option<DstDriver>,
}

/// `[units.group]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub requires: Vec<String>,
}

/// A command given either as an argv array or as one shell-quoted string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Argv(Vec<String>),
    Shell(String),
}

impl CommandLine {
    /// Split into argv; `None` if the string has unbalanced quotes
    pub fn argv(&self) -> Option<Vec<String>> {
        match self {
            Self::Argv(argv) => Some(argv.clone()),
            Self::Shell(line) => shlex::split(line),
        }
    }
}
