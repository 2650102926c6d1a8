//! Terminal multiplexer backend interface
//!
//! The supervisor only talks to the multiplexer through this trait, so the
//! reconciliation logic can run against tmux in production and an in-memory
//! fake in tests.

use std::future::Future;
use std::path::Path;

use super::process::ContainerId;

/// Window index reserved for the keepalive shell; never a managed process
pub const RESERVED_WINDOW: u32 = 0;

/// One container as reported by enumerating the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub window_index: u32,
    pub id: ContainerId,
    pub pid: i32,
    pub name: String,
}

/// Operations the supervisor needs from the multiplexer and the OS
pub trait Backend: Send + Sync + 'static {
    /// Name of the session all containers live in
    fn session(&self) -> &str;

    /// Create the session with its keepalive window unless it already exists
    fn ensure_session(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Launch `argv` in a new container named `name`, returning its id and pid
    ///
    /// Input replication across the container's panes is switched on so stop
    /// input reaches every process in it.
    fn spawn(
        &self,
        name: &str,
        argv: &[String],
        cwd: Option<&Path>,
    ) -> impl Future<Output = Result<(ContainerId, i32), BackendError>> + Send;

    /// Type literal input (key names or text) into a container
    fn send_input(
        &self,
        id: &ContainerId,
        tokens: &[String],
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Enumerate every container in the session, the reserved window included
    fn list(&self) -> impl Future<Output = Result<Vec<ContainerInfo>, BackendError>> + Send;

    /// Destroy the session and everything in it
    fn kill_session(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Zero-signal liveness check
    fn probe(&self, pid: i32) -> bool;

    /// Hard kill by pid
    fn kill(&self, pid: i32) -> Result<(), BackendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("`{command}` failed ({}): {stderr}", status_label(.status))]
    Command {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Failed to run multiplexer: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed multiplexer output: {0}")]
    Malformed(String),

    #[error("Signal delivery failed: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("No such container: {0}")]
    NoSuchContainer(ContainerId),
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}
