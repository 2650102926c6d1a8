//! Application runtime
//!
//! Wraps the [`Manager`] in the process-wide lock and runs the background
//! work around it: the periodic reconciliation sweep and delayed stop input.
//! Every mutation takes the write lock; snapshots take the read lock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::drivers::Escalation;
use crate::manager::{Manager, ManagerError};
use crate::supervisor::{Backend, SweepReport};

/// Shared manager state accessible from the control socket and timers
pub type SharedManager<B> = Arc<RwLock<Manager<B>>>;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct Runtime<B> {
    manager: SharedManager<B>,
    poller: Mutex<Option<JoinHandle<()>>>,
    stop_poller: Mutex<Option<oneshot::Sender<()>>>,
}

impl<B: Backend> Runtime<B> {
    /// Run an initial sweep, then reconcile every `interval`
    pub async fn start(manager: Manager<B>, interval: Duration) -> Self {
        let manager = Arc::new(RwLock::new(manager));

        if let Err(e) = manager.write().await.poll().await {
            log::error!("Initial reconciliation failed: {}", e);
        }

        let (tx, rx) = oneshot::channel();
        let poller = tokio::spawn(poll_loop(Arc::clone(&manager), interval, rx));

        Self {
            manager,
            poller: Mutex::new(Some(poller)),
            stop_poller: Mutex::new(Some(tx)),
        }
    }

    pub fn manager(&self) -> SharedManager<B> {
        Arc::clone(&self.manager)
    }

    pub async fn start_unit(&self, name: &str) -> Result<(), ManagerError> {
        self.manager.write().await.start(name).await
    }

    /// Stop a unit and schedule any follow-up input its driver asked for
    pub async fn stop_unit(&self, name: &str) -> Result<(), ManagerError> {
        let escalations = self.manager.write().await.stop(name).await?;
        for escalation in escalations {
            spawn_escalation(self.manager(), escalation);
        }
        Ok(())
    }

    pub async fn force_stop_unit(&self, name: &str) -> Result<(), ManagerError> {
        self.manager.write().await.force_stop(name)
    }

    /// Sweep now instead of waiting for the next tick
    pub async fn reconcile(&self) -> Result<SweepReport, ManagerError> {
        self.manager.write().await.poll().await
    }

    /// Stop the poll task and release the session if it is idle
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        let stop = self
            .stop_poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(tx) = stop {
            let _ = tx.send(());
        }

        let poller = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = poller {
            if let Err(e) = handle.await {
                log::warn!("Poll task ended abnormally: {}", e);
            }
        }

        self.manager.read().await.shutdown().await
    }
}

async fn poll_loop<B: Backend>(
    manager: SharedManager<B>,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the startup sweep already ran
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut mgr = manager.write().await;
                if let Err(e) = mgr.poll().await {
                    log::error!("Reconciliation failed, retrying next tick: {}", e);
                }
            }
            _ = &mut stop => {
                log::debug!("Poll task stopping");
                break;
            }
        }
    }
}

/// Deliver an escalation's steps in the background
///
/// The lock is only held while a step is typed in. The task ends early once
/// none of the targets is tracked anymore.
pub fn spawn_escalation<B: Backend>(
    manager: SharedManager<B>,
    escalation: Escalation,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for step in &escalation.steps {
            tokio::time::sleep(step.delay).await;

            let delivered = manager
                .write()
                .await
                .deliver(&escalation.targets, &step.input)
                .await;
            if delivered == 0 {
                log::debug!("Escalation targets gone, skipping remaining steps");
                break;
            }
            log::info!("Sent {:?} to {} stopping containers", step.input, delivered);
        }
    })
}
