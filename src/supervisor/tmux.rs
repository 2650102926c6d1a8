//! tmux implementation of [`Backend`]
//!
//! Containers are tmux panes addressed by pane id (`%N`). Every managed
//! process gets its own window in a single session; window 0 runs a shell
//! that keeps the session alive while nothing else is running.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use super::backend::{Backend, BackendError, ContainerInfo};
use super::process::ContainerId;

const PANE_FORMAT: &str = "#{window_index}\t#{pane_id}\t#{pane_pid}\t#{window_name}";
const SPAWN_FORMAT: &str = "#{pane_id}\t#{pane_pid}";

/// Talks to a tmux server through its command line client
#[derive(Debug, Clone)]
pub struct TmuxBackend {
    executable: PathBuf,
    session: String,
}

impl TmuxBackend {
    pub fn new(executable: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            session: session.into(),
        }
    }

    /// `session:` target, which tmux resolves to the session's current window
    fn session_target(&self) -> String {
        format!("{}:", self.session)
    }

    async fn run(&self, args: &[String]) -> Result<String, BackendError> {
        let output = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(BackendError::Command {
                command: format!("{} {}", self.executable.display(), args.join(" ")),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Backend for TmuxBackend {
    fn session(&self) -> &str {
        &self.session
    }

    async fn ensure_session(&self) -> Result<(), BackendError> {
        let exists = self
            .run(&["has-session".into(), "-t".into(), format!("={}", self.session)])
            .await
            .is_ok();
        if exists {
            log::debug!("Reusing tmux session {}", self.session);
            return Ok(());
        }

        self.run(&[
            "new-session".into(),
            "-d".into(),
            "-s".into(),
            self.session.clone(),
            "/bin/sh".into(),
        ])
        .await?;
        log::info!("Created tmux session {}", self.session);
        Ok(())
    }

    async fn spawn(
        &self,
        name: &str,
        argv: &[String],
        cwd: Option<&Path>,
    ) -> Result<(ContainerId, i32), BackendError> {
        let mut args: Vec<String> = vec![
            "new-window".into(),
            "-d".into(),
            "-t".into(),
            self.session_target(),
            "-n".into(),
            name.into(),
            "-P".into(),
            "-F".into(),
            SPAWN_FORMAT.into(),
        ];
        if let Some(dir) = cwd {
            args.push("-c".into());
            args.push(dir.display().to_string());
        }
        args.extend(argv.iter().cloned());

        let out = self.run(&args).await?;
        let (id, pid) = parse_spawn_output(&out)?;

        // Composite containers need every pane to receive the same stop input
        let sync = self
            .run(&[
                "set-option".into(),
                "-w".into(),
                "-t".into(),
                id.to_string(),
                "synchronize-panes".into(),
                "on".into(),
            ])
            .await;
        if let Err(e) = sync {
            log::warn!("Failed to enable synchronize-panes on {}: {}", id, e);
        }

        Ok((id, pid))
    }

    async fn send_input(&self, id: &ContainerId, tokens: &[String]) -> Result<(), BackendError> {
        let mut args: Vec<String> = vec!["send-keys".into(), "-t".into(), id.to_string()];
        args.extend(tokens.iter().cloned());
        self.run(&args).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError> {
        let out = self
            .run(&[
                "list-panes".into(),
                "-s".into(),
                "-t".into(),
                self.session_target(),
                "-F".into(),
                PANE_FORMAT.into(),
            ])
            .await?;
        parse_pane_list(&out)
    }

    async fn kill_session(&self) -> Result<(), BackendError> {
        self.run(&["kill-session".into(), "-t".into(), format!("={}", self.session)])
            .await?;
        log::info!("Killed tmux session {}", self.session);
        Ok(())
    }

    fn probe(&self, pid: i32) -> bool {
        // EPERM still means the process exists
        matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
    }

    fn kill(&self, pid: i32) -> Result<(), BackendError> {
        kill(Pid::from_raw(pid), Signal::SIGKILL)?;
        Ok(())
    }
}

fn parse_spawn_output(out: &str) -> Result<(ContainerId, i32), BackendError> {
    let line = out.lines().next().unwrap_or("").trim();
    let (id, pid) = line
        .split_once('\t')
        .ok_or_else(|| BackendError::Malformed(line.to_string()))?;
    let pid = pid
        .trim()
        .parse()
        .map_err(|_| BackendError::Malformed(line.to_string()))?;
    Ok((ContainerId::new(id.trim()), pid))
}

/// Parse `list-panes` output formatted with [`PANE_FORMAT`]
///
/// Any malformed line fails the whole listing.
fn parse_pane_list(out: &str) -> Result<Vec<ContainerInfo>, BackendError> {
    let mut panes = Vec::new();

    for line in out.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let mut parts = line.splitn(4, '\t');
        let (Some(index), Some(id), Some(pid), Some(name)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(BackendError::Malformed(line.to_string()));
        };

        let window_index = index
            .parse()
            .map_err(|_| BackendError::Malformed(line.to_string()))?;
        let pid = pid
            .parse()
            .map_err(|_| BackendError::Malformed(line.to_string()))?;

        panes.push(ContainerInfo {
            window_index,
            id: ContainerId::new(id),
            pid,
            name: name.to_string(),
        });
    }

    Ok(panes)
}
