//! Service units: workloads backed by one or more managed processes

use std::time::Duration;

use tokio::time::Instant;

use crate::drivers::LifecycleDriver;
use crate::manager::UnitStatus;
use crate::supervisor::ContainerId;

/// How long a stop must be pending before a hard kill is allowed
pub const FORCE_STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct ServiceUnit {
    /// Container name processes of this unit run under
    pub container_name: String,
    pub driver: LifecycleDriver,
    processes: Vec<ContainerId>,
    stopping_since: Option<Instant>,
}

impl ServiceUnit {
    pub fn new(container_name: impl Into<String>, driver: LifecycleDriver) -> Self {
        Self {
            container_name: container_name.into(),
            driver,
            processes: Vec::new(),
            stopping_since: None,
        }
    }

    /// Processes attributed to this unit, in attribution order
    pub fn processes(&self) -> &[ContainerId] {
        &self.processes
    }

    pub fn stopping_since(&self) -> Option<Instant> {
        self.stopping_since
    }

    pub fn status(&self) -> UnitStatus {
        UnitStatus::for_service(self.processes.len(), self.stopping_since.is_some())
    }

    /// Whether a hard kill is permitted at `now`
    pub fn force_stop_allowed_at(&self, now: Instant) -> bool {
        match (self.status(), self.stopping_since) {
            (UnitStatus::Stopping, Some(since)) => now.duration_since(since) > FORCE_STOP_GRACE,
            _ => false,
        }
    }

    pub fn force_stop_allowed(&self) -> bool {
        self.force_stop_allowed_at(Instant::now())
    }

    /// Attribute a process to this unit; returns false if it already was
    pub fn attach(&mut self, id: ContainerId) -> bool {
        if self.processes.contains(&id) {
            return false;
        }
        self.processes.push(id);
        true
    }

    /// Drop a process; clears the stop timestamp once none are left
    pub fn detach(&mut self, id: &ContainerId) -> bool {
        let Some(pos) = self.processes.iter().position(|p| p == id) else {
            return false;
        };
        self.processes.remove(pos);
        if self.processes.is_empty() {
            self.stopping_since = None;
        }
        true
    }

    /// Record a stop request, keeping the first one if already stopping
    pub fn mark_stopping(&mut self, at: Instant) {
        if !self.processes.is_empty() {
            self.stopping_since.get_or_insert(at);
        }
    }

    /// Forget a stop request none of the current processes received
    pub fn clear_stopping(&mut self) {
        self.stopping_since = None;
    }
}
