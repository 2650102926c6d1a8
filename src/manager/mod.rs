//! Unit manager
//!
//! Owns the unit graph and the process supervisor, and implements the unit
//! operations on top of them: start, stop, force stop and reconciliation.

mod deps;
mod graph;
mod state;

pub use deps::{CycleError, DepGraph};
pub use graph::{GraphError, UnitGraph};
pub use state::UnitStatus;

use tokio::time::Instant;

use crate::drivers::Escalation;
use crate::protocol::{ProcessInfo, UnitInfo};
use crate::supervisor::{
    Backend, ContainerId, ManagedProcess, Supervisor, SupervisorError, SweepReport,
};
use crate::units::{UnitId, UnitKind, FORCE_STOP_GRACE};

/// Unit graph plus the processes backing it
pub struct Manager<B> {
    graph: UnitGraph,
    supervisor: Supervisor<B>,
    /// Admission limit on running services; 0 means unlimited
    max_running: usize,
}

impl<B: Backend> Manager<B> {
    pub fn new(graph: UnitGraph, supervisor: Supervisor<B>) -> Self {
        Self {
            graph,
            supervisor,
            max_running: 0,
        }
    }

    pub fn with_max_running(mut self, max_running: usize) -> Self {
        self.max_running = max_running;
        self
    }

    pub fn graph(&self) -> &UnitGraph {
        &self.graph
    }

    pub fn supervisor(&self) -> &Supervisor<B> {
        &self.supervisor
    }

    fn lookup(&self, name: &str) -> Result<UnitId, ManagerError> {
        self.graph
            .lookup(name)
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))
    }

    pub fn status(&self, name: &str) -> Option<UnitStatus> {
        self.graph.lookup(name).map(|id| self.graph.status(id))
    }

    /// Tracked processes of a service unit, in attribution order
    pub fn processes_of(&self, name: &str) -> Vec<&ManagedProcess> {
        self.graph
            .by_name(name)
            .and_then(|u| u.as_service())
            .map(|s| {
                s.processes()
                    .iter()
                    .filter_map(|id| self.supervisor.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn running_services(&self) -> usize {
        self.graph.running_services()
    }

    /// Start a unit; groups start their services in declaration order
    ///
    /// A group stops at the first service that fails to start. Services
    /// already started are left running.
    pub async fn start(&mut self, name: &str) -> Result<(), ManagerError> {
        let id = self.lookup(name)?;

        if self.max_running > 0
            && !self.graph.status(id).is_running()
            && self.graph.running_services() >= self.max_running
        {
            return Err(ManagerError::TooManyRunning(self.max_running));
        }

        for service in self.graph.services_of(id) {
            self.start_service(service).await?;
        }
        Ok(())
    }

    async fn start_service(&mut self, id: UnitId) -> Result<(), ManagerError> {
        let unit = self.graph.get(id);
        let UnitKind::Service(service) = &unit.kind else {
            return Ok(());
        };

        if !service.processes().is_empty() {
            log::debug!("{} is already running", unit.name);
            return Ok(());
        }

        log::info!("Starting {}", unit.name);
        let name = unit.name.clone();
        let result = service
            .driver
            .start(&service.container_name, &mut self.supervisor)
            .await;

        // A failed start may still have left processes behind
        let spawned = match &result {
            Ok(spawned) => spawned.as_slice(),
            Err(e) => e.spawned(),
        };
        if let Some(service) = self.graph.service_mut(id) {
            for process in spawned {
                service.attach(process.id.clone());
            }
        }

        let spawned = result.map_err(|source| ManagerError::Start {
            unit: name.clone(),
            source,
        })?;
        log::info!("Started {} with {} processes", name, spawned.len());
        Ok(())
    }

    /// Ask a unit to stop
    ///
    /// Returns follow-up input the caller should deliver later. A service
    /// surfaces its driver's error; a group stops every service it pulls in
    /// and only logs failures.
    pub async fn stop(&mut self, name: &str) -> Result<Vec<Escalation>, ManagerError> {
        let id = self.lookup(name)?;

        if self.graph.get(id).is_service() {
            return Ok(self.stop_service(id).await?.into_iter().collect());
        }

        let mut escalations = Vec::new();
        for service in self.graph.services_of(id) {
            match self.stop_service(service).await {
                Ok(escalation) => escalations.extend(escalation),
                Err(e) => log::warn!("{}: {}", name, e),
            }
        }
        Ok(escalations)
    }

    async fn stop_service(&mut self, id: UnitId) -> Result<Option<Escalation>, ManagerError> {
        let unit = self.graph.get(id);
        let UnitKind::Service(service) = &unit.kind else {
            return Ok(None);
        };

        if service.processes().is_empty() {
            return Ok(None);
        }

        let name = unit.name.clone();
        let processes: Vec<ManagedProcess> = service
            .processes()
            .iter()
            .filter_map(|pid| self.supervisor.get(pid).cloned())
            .collect();

        log::info!("Stopping {} ({} processes)", name, processes.len());
        let result = service.driver.stop(&processes, &self.supervisor).await;

        // The stop was requested even if the driver reported a failure
        let now = Instant::now();
        for process in &processes {
            self.supervisor.mark_stopping(&process.id, now);
        }
        if let Some(service) = self.graph.service_mut(id) {
            service.mark_stopping(now);
        }

        result.map_err(|source| ManagerError::Stop { unit: name, source })
    }

    /// Whether `name` may be hard killed right now
    pub fn force_stop_allowed(&self, name: &str) -> bool {
        self.graph
            .by_name(name)
            .and_then(|u| u.as_service())
            .is_some_and(|s| s.force_stop_allowed())
    }

    /// Hard kill every process of a service stuck in Stopping
    pub fn force_stop(&mut self, name: &str) -> Result<(), ManagerError> {
        let id = self.lookup(name)?;
        let UnitKind::Service(service) = &self.graph.get(id).kind else {
            return Err(ManagerError::GroupForceStop(name.to_string()));
        };

        if !service.force_stop_allowed() {
            let reason = match service.status() {
                UnitStatus::Running => "unit is running; stop it first".to_string(),
                UnitStatus::Stopped => "unit is not running".to_string(),
                UnitStatus::Stopping => format!(
                    "stop requested less than {}s ago",
                    FORCE_STOP_GRACE.as_secs()
                ),
            };
            return Err(ManagerError::ForceStopNotAllowed {
                unit: name.to_string(),
                reason,
            });
        }

        log::warn!("Force stopping {}", name);
        let stopping = service
            .processes()
            .iter()
            .filter(|id| self.supervisor.get(id).is_some_and(|p| p.is_stopping()));
        for id in stopping {
            self.supervisor.force_kill(id);
        }
        Ok(())
    }

    /// Run one reconciliation sweep against the backend
    pub async fn poll(&mut self) -> Result<SweepReport, ManagerError> {
        let report = self
            .supervisor
            .poll_and_reconcile(&mut self.graph)
            .await
            .map_err(ManagerError::Reconcile)?;
        self.clear_stale_stops();
        if !report.is_empty() {
            log::debug!(
                "Sweep: {} crashed, {} stopped, {} adopted",
                report.crashed.len(),
                report.stopped.len(),
                report.adopted.len()
            );
        }
        Ok(report)
    }

    /// Return units to Running whose stopping processes are all gone
    ///
    /// Happens when a process adopted after the stop request outlives the
    /// ones that were asked to stop.
    fn clear_stale_stops(&mut self) {
        let stale: Vec<UnitId> = self
            .graph
            .iter()
            .filter_map(|(id, unit)| Some((id, unit.as_service()?)))
            .filter(|(_, service)| {
                service.stopping_since().is_some()
                    && !service
                        .processes()
                        .iter()
                        .any(|p| self.supervisor.get(p).is_some_and(|p| p.is_stopping()))
            })
            .map(|(id, _)| id)
            .collect();

        for id in stale {
            if let Some(service) = self.graph.service_mut(id) {
                service.clear_stopping();
                log::info!("{} has no stopping processes left", self.graph.get(id).name);
            }
        }
    }

    /// Type `input` into those of `targets` still tracked
    ///
    /// Returns how many containers got it; 0 means the escalation is over.
    pub async fn deliver(&self, targets: &[ContainerId], input: &[String]) -> usize {
        let mut delivered = 0;
        for id in targets.iter().filter(|id| self.supervisor.is_tracked(id)) {
            match self.supervisor.send_input(id, input).await {
                Ok(()) => delivered += 1,
                Err(e) => log::warn!("Failed to deliver {:?} to {}: {}", input, id, e),
            }
        }
        delivered
    }

    /// Snapshot of one unit
    pub fn unit_info(&self, name: &str) -> Option<UnitInfo> {
        self.graph.lookup(name).map(|id| self.snapshot(id))
    }

    /// Snapshot of every unit in configuration order
    pub fn list(&self, include_hidden: bool) -> Vec<UnitInfo> {
        self.graph
            .iter()
            .filter(|(_, u)| include_hidden || !u.hidden)
            .map(|(id, _)| self.snapshot(id))
            .collect()
    }

    /// Names of a unit's direct requirements
    pub fn requirements(&self, name: &str) -> Result<Vec<String>, ManagerError> {
        let id = self.lookup(name)?;
        Ok(self
            .graph
            .requirements(id)
            .iter()
            .map(|&r| self.graph.get(r).name.clone())
            .collect())
    }

    fn snapshot(&self, id: UnitId) -> UnitInfo {
        let unit = self.graph.get(id);
        let (container, processes, force_stop_allowed) = match &unit.kind {
            UnitKind::Service(service) => (
                Some(service.container_name.clone()),
                service
                    .processes()
                    .iter()
                    .filter_map(|pid| self.supervisor.get(pid))
                    .map(ProcessInfo::from)
                    .collect(),
                service.force_stop_allowed(),
            ),
            UnitKind::Group(_) => (None, Vec::new(), false),
        };

        UnitInfo {
            name: unit.name.clone(),
            kind: unit.unit_type().to_string(),
            status: self.graph.status(id),
            description: unit.description.clone(),
            styles: unit.styles.clone(),
            hidden: unit.hidden,
            container,
            processes,
            running_requirements: unit
                .is_group()
                .then(|| self.graph.running_requirements(id)),
            force_stop_allowed,
        }
    }

    /// Release the backend session if nothing is left running in it
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        self.supervisor
            .shutdown()
            .await
            .map_err(ManagerError::Reconcile)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Unit not found: {0}")]
    NotFound(String),

    #[error("Failed to start {unit}: {source}")]
    Start {
        unit: String,
        #[source]
        source: SupervisorError,
    },

    #[error("Failed to stop {unit}: {source}")]
    Stop {
        unit: String,
        #[source]
        source: SupervisorError,
    },

    #[error("Cannot force stop {unit}: {reason}")]
    ForceStopNotAllowed { unit: String, reason: String },

    #[error("Unit is a group (no processes): {0}")]
    GroupForceStop(String),

    #[error("Too many running units (limit {0})")]
    TooManyRunning(usize),

    #[error("Supervisor error: {0}")]
    Reconcile(#[source] SupervisorError),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::drivers::{LifecycleDriver, SimpleDriver, StartMode, StopMode};
    use crate::supervisor::fake::FakeBackend;
    use crate::units::{GroupUnit, ServiceUnit, Unit};

    fn service(name: &str) -> Unit {
        let driver = SimpleDriver::new(
            StartMode::Command(vec!["sleep".into(), "100".into()]),
            StopMode::Input(vec!["stop".into(), "Enter".into()]),
        );
        Unit::service(name, ServiceUnit::new(name, LifecycleDriver::Simple(driver)))
    }

    fn group(name: &str, requires: &[&str]) -> Unit {
        Unit::group(
            name,
            GroupUnit::new(requires.iter().map(|s| s.to_string()).collect()),
        )
    }

    async fn manager(units: Vec<Unit>) -> (Manager<FakeBackend>, FakeBackend) {
        let backend = FakeBackend::new();
        let supervisor = Supervisor::new(backend.clone());
        supervisor.init().await.unwrap();
        let graph = UnitGraph::new(units).unwrap();
        (Manager::new(graph, supervisor), backend)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (mut mgr, backend) = manager(vec![service("alpha")]).await;

        assert_ok!(mgr.start("alpha").await);
        assert_ok!(mgr.start("alpha").await);
        assert_eq!(backend.containers().len(), 1);
        assert_eq!(mgr.status("alpha"), Some(UnitStatus::Running));
    }

    #[tokio::test]
    async fn test_unknown_unit() {
        let (mut mgr, _backend) = manager(vec![service("alpha")]).await;
        assert!(matches!(
            mgr.start("nope").await,
            Err(ManagerError::NotFound(_))
        ));
        assert!(mgr.unit_info("nope").is_none());
    }

    #[tokio::test]
    async fn test_failed_start_stays_stopped() {
        let (mut mgr, backend) = manager(vec![service("alpha")]).await;
        backend.fail_spawns_named("alpha");

        let err = assert_err!(mgr.start("alpha").await);
        assert!(matches!(err, ManagerError::Start { .. }));
        assert_eq!(mgr.status("alpha"), Some(UnitStatus::Stopped));
        assert_eq!(mgr.supervisor().tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_stopped_unit_is_noop() {
        let (mut mgr, backend) = manager(vec![service("alpha")]).await;
        assert!(assert_ok!(mgr.stop("alpha").await).is_empty());
        assert!(backend.inputs().is_empty());
        assert_eq!(mgr.status("alpha"), Some(UnitStatus::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_stop_after_grace_window() {
        let (mut mgr, backend) = manager(vec![service("alpha")]).await;
        assert_ok!(mgr.start("alpha").await);
        let pid = backend.containers()[0].pid;
        assert_ok!(mgr.stop("alpha").await);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!mgr.force_stop_allowed("alpha"));
        assert!(matches!(
            mgr.force_stop("alpha"),
            Err(ManagerError::ForceStopNotAllowed { .. })
        ));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(mgr.force_stop_allowed("alpha"));
        assert_ok!(mgr.force_stop("alpha"));
        assert_eq!(backend.killed(), vec![pid]);

        assert_ok!(mgr.poll().await);
        assert_eq!(mgr.status("alpha"), Some(UnitStatus::Stopped));
        assert!(!mgr.force_stop_allowed("alpha"));
    }

    #[tokio::test]
    async fn test_group_force_stop_rejected() {
        let (mut mgr, _backend) =
            manager(vec![service("alpha"), group("bundle", &["alpha"])]).await;
        assert!(matches!(
            mgr.force_stop("bundle"),
            Err(ManagerError::GroupForceStop(_))
        ));
        assert!(!mgr.force_stop_allowed("bundle"));
    }

    #[tokio::test]
    async fn test_admission_limit() {
        let (mgr, _backend) = manager(vec![service("alpha"), service("beta")]).await;
        let mut mgr = mgr.with_max_running(1);

        assert_ok!(mgr.start("alpha").await);
        assert!(matches!(
            mgr.start("beta").await,
            Err(ManagerError::TooManyRunning(1))
        ));
        // starting a running unit again is not a new admission
        assert_ok!(mgr.start("alpha").await);
    }

    #[tokio::test]
    async fn test_list_hides_hidden_units() {
        let (mgr, _backend) =
            manager(vec![service("alpha"), service("secret").hidden(true)]).await;

        let names: Vec<_> = mgr.list(false).into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["alpha"]);
        assert_eq!(mgr.list(true).len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_of_running_service() {
        let (mut mgr, _backend) =
            manager(vec![service("alpha"), group("bundle", &["alpha"])]).await;
        assert_ok!(mgr.start("alpha").await);

        let info = mgr.unit_info("alpha").unwrap();
        assert_eq!(info.kind, "service");
        assert_eq!(info.status, UnitStatus::Running);
        assert_eq!(info.container.as_deref(), Some("alpha"));
        assert_eq!(info.processes.len(), 1);
        assert!(!info.processes[0].adopted);
        assert_eq!(info.running_requirements, None);

        let bundle = mgr.unit_info("bundle").unwrap();
        assert_eq!(bundle.kind, "group");
        assert_eq!(bundle.running_requirements, Some(1));
        assert_eq!(mgr.requirements("bundle").unwrap(), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_deliver_skips_untracked() {
        let (mut mgr, backend) = manager(vec![service("alpha")]).await;
        assert_ok!(mgr.start("alpha").await);
        let id = backend.containers()[0].id.clone();

        let input = vec!["C-c".to_string()];
        assert_eq!(mgr.deliver(&[id.clone(), ContainerId::new("%99")], &input).await, 1);

        backend.exit(&id);
        assert_ok!(mgr.poll().await);
        assert_eq!(mgr.deliver(&[id], &input).await, 0);
    }
}
