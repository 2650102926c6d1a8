//! Lifecycle drivers
//!
//! A driver decides how a service unit turns into processes and how those
//! processes are asked to go away. The driver is picked when the unit graph
//! is built and never changes afterwards.

mod dst;
mod simple;

pub use dst::DstDriver;
pub use simple::{SimpleDriver, StartMode, StopMode};

use std::time::Duration;

use crate::supervisor::{Backend, ContainerId, ManagedProcess, Supervisor, SupervisorError};

/// Start/stop strategy of a service unit
#[derive(Debug, Clone)]
pub enum LifecycleDriver {
    /// Direct command or helper scripts
    Simple(SimpleDriver),
    /// Don't Starve Together cluster, one container per shard
    Dst(DstDriver),
}

impl LifecycleDriver {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Simple(_) => "simple",
            Self::Dst(_) => "dont_starve_together",
        }
    }

    /// Start the workload under `container`, returning every spawned process
    pub async fn start<B: Backend>(
        &self,
        container: &str,
        supervisor: &mut Supervisor<B>,
    ) -> Result<Vec<ManagedProcess>, SupervisorError> {
        match self {
            Self::Simple(d) => d.start(container, supervisor).await,
            Self::Dst(d) => d.start(container, supervisor).await,
        }
    }

    /// Ask `processes` to stop
    ///
    /// Returns follow-up input to deliver later if the workload needs more
    /// than one nudge.
    pub async fn stop<B: Backend>(
        &self,
        processes: &[ManagedProcess],
        supervisor: &Supervisor<B>,
    ) -> Result<Option<Escalation>, SupervisorError> {
        match self {
            Self::Simple(d) => d.stop(processes, supervisor).await.map(|()| None),
            Self::Dst(d) => Ok(Some(d.stop(processes, supervisor).await)),
        }
    }
}

/// Input to type into stopping containers after the initial stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    pub targets: Vec<ContainerId>,
    pub steps: Vec<EscalationStep>,
}

/// One delayed input; `delay` is measured from the previous step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationStep {
    pub delay: Duration,
    pub input: Vec<String>,
}

impl EscalationStep {
    pub fn new(delay: Duration, input: &[&str]) -> Self {
        Self {
            delay,
            input: input.iter().map(|s| s.to_string()).collect(),
        }
    }
}
