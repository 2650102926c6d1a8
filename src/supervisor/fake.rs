//! In-memory [`Backend`] used by tests
//!
//! Models a single session whose containers can be created, exited, or
//! injected from "outside" to simulate processes started by an operator.
//! Clones share state, so a test can keep a handle after moving one into a
//! supervisor.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{Backend, BackendError, ContainerInfo, RESERVED_WINDOW};
use super::process::ContainerId;

const KEEPALIVE_PID: i32 = 1000;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub window_index: u32,
    pub id: ContainerId,
    pub pid: i32,
    pub name: String,
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct FakeState {
    session_exists: bool,
    containers: Vec<FakeContainer>,
    alive: HashSet<i32>,
    next_window: u32,
    next_pane: u32,
    next_pid: i32,
    inputs: Vec<(ContainerId, Vec<String>)>,
    killed: Vec<i32>,
    failing_names: HashSet<String>,
    fail_list: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a container as if someone typed `tmux new-window` by hand
    pub fn inject(&self, name: &str) -> (ContainerId, i32) {
        self.state().create(name, Vec::new(), None)
    }

    /// Make the process in a container exit; tmux closes its window
    pub fn exit(&self, id: &ContainerId) {
        let mut state = self.state();
        if let Some(pos) = state.containers.iter().position(|c| &c.id == id) {
            let container = state.containers.remove(pos);
            state.alive.remove(&container.pid);
        }
    }

    /// Make every container named `name` exit
    pub fn exit_named(&self, name: &str) {
        let ids: Vec<ContainerId> = self
            .containers()
            .into_iter()
            .filter(|c| c.name == name)
            .map(|c| c.id)
            .collect();
        for id in &ids {
            self.exit(id);
        }
    }

    /// Make the process exit but keep its window listed (`remain-on-exit`)
    pub fn exit_keep_window(&self, id: &ContainerId) {
        let mut state = self.state();
        if let Some(pid) = state.containers.iter().find(|c| &c.id == id).map(|c| c.pid) {
            state.alive.remove(&pid);
        }
    }

    /// Replace the process in a container with a new one (`respawn-pane -k`)
    ///
    /// Returns the new pid, or `None` if there is no such container.
    pub fn respawn(&self, id: &ContainerId) -> Option<i32> {
        let mut state = self.state();
        state.next_pid += 1;
        let new_pid = 2000 + state.next_pid;
        let old_pid = {
            let container = state.containers.iter_mut().find(|c| &c.id == id)?;
            std::mem::replace(&mut container.pid, new_pid)
        };
        state.alive.remove(&old_pid);
        state.alive.insert(new_pid);
        Some(new_pid)
    }

    /// Fail every spawn of a container with this name
    pub fn fail_spawns_named(&self, name: &str) {
        self.state().failing_names.insert(name.to_string());
    }

    /// Fail the next enumeration of the session
    pub fn fail_next_list(&self) {
        self.state().fail_list = true;
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state().containers.clone()
    }

    pub fn inputs(&self) -> Vec<(ContainerId, Vec<String>)> {
        self.state().inputs.clone()
    }

    /// Inputs delivered to one container, in order
    pub fn inputs_for(&self, id: &ContainerId) -> Vec<Vec<String>> {
        self.state()
            .inputs
            .iter()
            .filter(|(target, _)| target == id)
            .map(|(_, tokens)| tokens.clone())
            .collect()
    }

    pub fn killed(&self) -> Vec<i32> {
        self.state().killed.clone()
    }

    pub fn session_exists(&self) -> bool {
        self.state().session_exists
    }
}

impl FakeState {
    fn create(&mut self, name: &str, argv: Vec<String>, cwd: Option<PathBuf>) -> (ContainerId, i32) {
        self.next_window += 1;
        self.next_pane += 1;
        self.next_pid += 1;

        let id = ContainerId::new(format!("%{}", self.next_pane));
        let pid = 2000 + self.next_pid;
        self.containers.push(FakeContainer {
            window_index: self.next_window,
            id: id.clone(),
            pid,
            name: name.to_string(),
            argv,
            cwd,
        });
        self.alive.insert(pid);
        (id, pid)
    }
}

impl Backend for FakeBackend {
    fn session(&self) -> &str {
        "fake"
    }

    async fn ensure_session(&self) -> Result<(), BackendError> {
        let mut state = self.state();
        if !state.session_exists {
            state.session_exists = true;
            state.alive.insert(KEEPALIVE_PID);
        }
        Ok(())
    }

    async fn spawn(
        &self,
        name: &str,
        argv: &[String],
        cwd: Option<&Path>,
    ) -> Result<(ContainerId, i32), BackendError> {
        let mut state = self.state();
        if state.failing_names.contains(name) {
            return Err(BackendError::Command {
                command: format!("new-window -n {}", name),
                status: Some(1),
                stderr: "spawn rejected".to_string(),
            });
        }
        Ok(state.create(name, argv.to_vec(), cwd.map(Path::to_path_buf)))
    }

    async fn send_input(&self, id: &ContainerId, tokens: &[String]) -> Result<(), BackendError> {
        let mut state = self.state();
        if !state.containers.iter().any(|c| &c.id == id) {
            return Err(BackendError::NoSuchContainer(id.clone()));
        }
        state.inputs.push((id.clone(), tokens.to_vec()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError> {
        let mut state = self.state();
        if state.fail_list {
            state.fail_list = false;
            return Err(BackendError::Malformed("injected listing failure".to_string()));
        }

        let mut panes = Vec::new();
        if state.session_exists {
            panes.push(ContainerInfo {
                window_index: RESERVED_WINDOW,
                id: ContainerId::new("%0"),
                pid: KEEPALIVE_PID,
                name: "sh".to_string(),
            });
        }
        panes.extend(state.containers.iter().map(|c| ContainerInfo {
            window_index: c.window_index,
            id: c.id.clone(),
            pid: c.pid,
            name: c.name.clone(),
        }));
        Ok(panes)
    }

    async fn kill_session(&self) -> Result<(), BackendError> {
        let mut state = self.state();
        state.session_exists = false;
        state.containers.clear();
        state.alive.clear();
        Ok(())
    }

    fn probe(&self, pid: i32) -> bool {
        self.state().alive.contains(&pid)
    }

    fn kill(&self, pid: i32) -> Result<(), BackendError> {
        let mut state = self.state();
        if !state.alive.remove(&pid) {
            return Err(BackendError::Signal(nix::errno::Errno::ESRCH));
        }
        state.killed.push(pid);
        state.containers.retain(|c| c.pid != pid);
        Ok(())
    }
}
