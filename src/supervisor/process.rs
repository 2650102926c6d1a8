//! Managed process records and helper-script execution

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::Instant;

/// Backend identifier of a container (a tmux pane id such as `%12`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One OS process hosted in a backend container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub id: ContainerId,
    pub pid: i32,
    /// Container name, used to attribute the process to a service unit
    pub name: String,
    /// Set when a stop was requested for this process
    pub stopping_since: Option<Instant>,
    /// Discovered by enumeration instead of spawned by us
    pub adopted: bool,
    /// Confirmed dead by a reconciliation sweep
    pub dead: bool,
}

impl ManagedProcess {
    /// A process we launched ourselves
    pub fn spawned(id: ContainerId, pid: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            pid,
            name: name.into(),
            stopping_since: None,
            adopted: false,
            dead: false,
        }
    }

    /// A process found by enumerating the backend session
    pub fn adopted(id: ContainerId, pid: i32, name: impl Into<String>) -> Self {
        Self {
            adopted: true,
            ..Self::spawned(id, pid, name)
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping_since.is_some()
    }
}

/// Run a helper program to completion and return its stdout
///
/// Fails if the program cannot be launched or exits non-zero.
pub async fn run_helper(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<String, ScriptError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let output = cmd.output().await.map_err(|e| ScriptError::Launch {
        program: program.to_string(),
        source: e,
    })?;

    if !output.status.success() {
        return Err(ScriptError::Failed {
            program: program.to_string(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse the stdout of a start script
///
/// Each line is `<container id>\t<pid>`. Blank lines are ignored and
/// malformed lines are skipped with a warning so partial output still
/// yields the processes that were reported correctly.
pub fn parse_script_output(stdout: &str) -> Vec<(ContainerId, i32)> {
    let mut records = Vec::new();

    for line in stdout.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match parse_record(line) {
            Some(record) => records.push(record),
            None => log::warn!("Skipping unparsable start script line: {:?}", line),
        }
    }

    records
}

fn parse_record(line: &str) -> Option<(ContainerId, i32)> {
    let (id, pid) = line.split_once('\t')?;
    let id = id.trim();
    if id.is_empty() {
        return None;
    }
    let pid = pid.trim().parse::<i32>().ok().filter(|p| *p > 0)?;
    Some((ContainerId::new(id), pid))
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        /// Whatever the program printed before failing
        stdout: String,
        stderr: String,
    },
}

impl ScriptError {
    /// Output captured before the program failed; empty if it never ran
    pub fn stdout(&self) -> &str {
        match self {
            ScriptError::Launch { .. } => "",
            ScriptError::Failed { stdout, .. } => stdout,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "a signal".to_string(),
    }
}
