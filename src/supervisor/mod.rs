//! Process supervisor
//!
//! Owns the authoritative set of managed processes and keeps it in sync with
//! the multiplexer session through periodic reconciliation:
//!
//! ```text
//!   spawn / adopt ──► live ──stop requested──► suspect
//!                      │                          │
//!                probe fails                probe fails
//!                      │                          │
//!                      └────────► pruned ◄────────┘
//! ```
//!
//! Every known process is in exactly one of `live` or `suspect`. Spawn and
//! prune events are delivered to a [`ProcessObserver`] passed into the sweep,
//! which is how service units learn about processes they did not start.

mod backend;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
mod process;
mod tmux;

pub use backend::{Backend, BackendError, ContainerInfo, RESERVED_WINDOW};
pub use process::{parse_script_output, run_helper, ContainerId, ManagedProcess, ScriptError};
pub use tmux::TmuxBackend;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tokio::time::Instant;

/// Receives process lifecycle events from a reconciliation sweep
pub trait ProcessObserver {
    /// A process appeared that the supervisor did not spawn
    fn process_spawned(&mut self, process: &ManagedProcess);

    /// A process was confirmed dead and dropped from all indices
    fn process_pruned(&mut self, process: &ManagedProcess);
}

/// What a reconciliation sweep changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Live processes that died without a stop request
    pub crashed: Vec<ContainerId>,
    /// Stopping processes confirmed dead
    pub stopped: Vec<ContainerId>,
    /// Containers adopted from the session
    pub adopted: Vec<ContainerId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.crashed.is_empty() && self.stopped.is_empty() && self.adopted.is_empty()
    }
}

pub struct Supervisor<B> {
    backend: B,
    /// Processes believed to be running normally
    live: BTreeMap<ContainerId, ManagedProcess>,
    /// Processes asked to stop whose death is not yet confirmed
    suspect: BTreeMap<ContainerId, ManagedProcess>,
}

impl<B: Backend> Supervisor<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            live: BTreeMap::new(),
            suspect: BTreeMap::new(),
        }
    }

    pub fn session(&self) -> &str {
        self.backend.session()
    }

    /// Make sure the backend session exists
    pub async fn init(&self) -> Result<(), SupervisorError> {
        self.backend.ensure_session().await?;
        Ok(())
    }

    /// Look up a tracked process, live or stopping
    pub fn get(&self, id: &ContainerId) -> Option<&ManagedProcess> {
        self.live.get(id).or_else(|| self.suspect.get(id))
    }

    pub fn is_tracked(&self, id: &ContainerId) -> bool {
        self.live.contains_key(id) || self.suspect.contains_key(id)
    }

    pub fn is_live(&self, id: &ContainerId) -> bool {
        self.live.contains_key(id)
    }

    pub fn is_suspect(&self, id: &ContainerId) -> bool {
        self.suspect.contains_key(id)
    }

    /// All tracked processes, live first
    pub fn processes(&self) -> impl Iterator<Item = &ManagedProcess> {
        self.live.values().chain(self.suspect.values())
    }

    pub fn tracked_count(&self) -> usize {
        self.live.len() + self.suspect.len()
    }

    /// Launch one process in a new container named `name`
    ///
    /// Nothing is recorded if the backend rejects the container.
    pub async fn spawn_direct(
        &mut self,
        name: &str,
        argv: &[String],
        cwd: Option<&Path>,
    ) -> Result<ManagedProcess, SupervisorError> {
        if argv.is_empty() {
            return Err(SupervisorError::EmptyCommand(name.to_string()));
        }

        let (id, pid) = self.backend.spawn(name, argv, cwd).await?;
        let process = ManagedProcess::spawned(id, pid, name);
        log::info!("Spawned {} as {} (PID {})", name, process.id, pid);
        self.insert_live(process.clone());
        Ok(process)
    }

    /// Run a start script that creates its own containers
    ///
    /// The script gets `args` followed by the session name, and reports one
    /// `<container id>\t<pid>` line per process it started. Every reported
    /// process is attributed to `name`. If the script fails after reporting
    /// some processes, those stay tracked and come back in
    /// [`SupervisorError::PartialStart`].
    pub async fn spawn_by_script(
        &mut self,
        name: &str,
        program: &str,
        args: &[String],
    ) -> Result<Vec<ManagedProcess>, SupervisorError> {
        let mut script_args = args.to_vec();
        script_args.push(self.backend.session().to_string());

        let (stdout, failure) = match run_helper(program, &script_args, None).await {
            Ok(stdout) => (stdout, None),
            Err(e) => (e.stdout().to_string(), Some(e)),
        };

        let mut spawned = Vec::new();
        for (id, pid) in parse_script_output(&stdout) {
            if self.is_tracked(&id) {
                log::warn!("Start script for {} reported already tracked {}", name, id);
                continue;
            }
            let process = ManagedProcess::spawned(id, pid, name);
            log::info!("Script started {} as {} (PID {})", name, process.id, pid);
            self.insert_live(process.clone());
            spawned.push(process);
        }

        match failure {
            Some(source) if spawned.is_empty() => Err(source.into()),
            Some(source) => {
                log::warn!(
                    "Start script for {} failed after starting {} processes",
                    name,
                    spawned.len()
                );
                Err(SupervisorError::PartialStart {
                    name: name.to_string(),
                    spawned,
                    source,
                })
            }
            None if spawned.is_empty() => Err(SupervisorError::NoProcesses(name.to_string())),
            None => Ok(spawned),
        }
    }

    /// Type input into a tracked process's container
    pub async fn send_input(
        &self,
        id: &ContainerId,
        tokens: &[String],
    ) -> Result<(), SupervisorError> {
        if !self.is_tracked(id) {
            return Err(SupervisorError::Unknown(id.clone()));
        }
        self.backend.send_input(id, tokens).await?;
        Ok(())
    }

    /// SIGKILL a tracked process; failures are logged, not returned
    pub fn force_kill(&self, id: &ContainerId) {
        let Some(process) = self.get(id) else {
            log::warn!("Force kill requested for untracked container {}", id);
            return;
        };

        log::warn!("Force killing {} {} (PID {})", process.name, id, process.pid);
        if let Err(e) = self.backend.kill(process.pid) {
            log::error!("Failed to force kill PID {}: {}", process.pid, e);
        }
    }

    /// Record a stop request: the process moves to the suspect set
    ///
    /// The earliest stop timestamp is kept if the process was already stopping.
    pub fn mark_stopping(&mut self, id: &ContainerId, at: Instant) {
        if let Some(mut process) = self.live.remove(id) {
            process.stopping_since = Some(at);
            self.suspect.insert(id.clone(), process);
        } else if let Some(process) = self.suspect.get_mut(id) {
            process.stopping_since.get_or_insert(at);
        }
    }

    /// Reconcile the model with the session
    ///
    /// Runs the liveness sweep, the suspect sweep and the discovery sweep in
    /// that order. A process pruned by this call is never re-adopted by it.
    /// An enumeration failure aborts discovery; prunes already made stand.
    pub async fn poll_and_reconcile<O: ProcessObserver>(
        &mut self,
        observer: &mut O,
    ) -> Result<SweepReport, SupervisorError> {
        let mut report = SweepReport::default();

        // Liveness: processes that died without being asked to
        let crashed: Vec<ContainerId> = self
            .live
            .values()
            .filter(|p| !self.backend.probe(p.pid))
            .map(|p| p.id.clone())
            .collect();
        for id in crashed {
            if let Some(mut process) = self.live.remove(&id) {
                process.dead = true;
                log::warn!(
                    "Process {} {} (PID {}) exited unexpectedly",
                    process.name,
                    id,
                    process.pid
                );
                observer.process_pruned(&process);
                report.crashed.push(id);
            }
        }

        // Suspects: confirm stops
        let stopped: Vec<ContainerId> = self
            .suspect
            .values()
            .filter(|p| !self.backend.probe(p.pid))
            .map(|p| p.id.clone())
            .collect();
        for id in stopped {
            if let Some(mut process) = self.suspect.remove(&id) {
                process.dead = true;
                log::info!("Process {} {} (PID {}) stopped", process.name, id, process.pid);
                observer.process_pruned(&process);
                report.stopped.push(id);
            }
        }

        // Discovery: containers created by someone else, or before we started
        let pruned: HashSet<&ContainerId> =
            report.crashed.iter().chain(report.stopped.iter()).collect();
        let containers = self.backend.list().await?;
        let mut adopted = Vec::new();
        for info in containers {
            if info.window_index == RESERVED_WINDOW {
                continue;
            }
            if self.is_tracked(&info.id) || pruned.contains(&info.id) {
                continue;
            }
            if !self.backend.probe(info.pid) {
                log::debug!("Ignoring container {} with dead PID {}", info.id, info.pid);
                continue;
            }

            let process = ManagedProcess::adopted(info.id.clone(), info.pid, info.name);
            log::info!(
                "Adopted {} as {} (PID {})",
                process.name,
                process.id,
                process.pid
            );
            self.insert_live(process.clone());
            observer.process_spawned(&process);
            adopted.push(info.id);
        }
        report.adopted = adopted;

        Ok(report)
    }

    /// Release the backend session
    ///
    /// The session is destroyed only when nothing is left running in it, so
    /// workloads outlive a supervisor restart and get adopted next time.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        if self.tracked_count() > 0 {
            log::info!(
                "Leaving session {} with {} running processes",
                self.session(),
                self.tracked_count()
            );
            return Ok(());
        }
        self.backend.kill_session().await?;
        Ok(())
    }

    fn insert_live(&mut self, process: ManagedProcess) {
        self.suspect.remove(&process.id);
        self.live.insert(process.id.clone(), process);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Empty command for {0}")]
    EmptyCommand(String),

    #[error("Start script for {0} reported no processes")]
    NoProcesses(String),

    #[error("Start script for {name} failed: {source}")]
    PartialStart {
        name: String,
        /// Processes the script reported before failing; still tracked
        spawned: Vec<ManagedProcess>,
        #[source]
        source: ScriptError,
    },

    #[error("Container {0} is not tracked")]
    Unknown(ContainerId),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SupervisorError {
    /// Processes that were started and tracked despite the error
    pub fn spawned(&self) -> &[ManagedProcess] {
        match self {
            SupervisorError::PartialStart { spawned, .. } => spawned,
            _ => &[],
        }
    }
}
