//! Simple driver: one direct command or a pair of helper scripts

use crate::supervisor::{run_helper, Backend, ManagedProcess, Supervisor, SupervisorError};

/// How processes are started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    /// Spawn one container running this argv
    Command(Vec<String>),
    /// Run a script that creates its own containers and reports them on stdout
    Script(Vec<String>),
}

/// How processes are asked to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopMode {
    /// Type these tokens into every container (`stop`, `Enter`)
    Input(Vec<String>),
    /// Run a script with `<container id> <pid>` pairs appended
    Script(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleDriver {
    pub start: StartMode,
    pub stop: StopMode,
}

impl SimpleDriver {
    pub fn new(start: StartMode, stop: StopMode) -> Self {
        Self { start, stop }
    }

    pub(super) async fn start<B: Backend>(
        &self,
        container: &str,
        supervisor: &mut Supervisor<B>,
    ) -> Result<Vec<ManagedProcess>, SupervisorError> {
        match &self.start {
            StartMode::Command(argv) => {
                let process = supervisor.spawn_direct(container, argv, None).await?;
                Ok(vec![process])
            }
            StartMode::Script(argv) => {
                let (program, args) = argv
                    .split_first()
                    .ok_or_else(|| SupervisorError::EmptyCommand(container.to_string()))?;
                supervisor.spawn_by_script(container, program, args).await
            }
        }
    }

    pub(super) async fn stop<B: Backend>(
        &self,
        processes: &[ManagedProcess],
        supervisor: &Supervisor<B>,
    ) -> Result<(), SupervisorError> {
        match &self.stop {
            StopMode::Input(tokens) => {
                if tokens.is_empty() {
                    log::warn!("No stop input configured; waiting for processes to exit");
                    return Ok(());
                }
                // Every container gets the input even if one of them fails
                let mut first_err = None;
                for process in processes {
                    if let Err(e) = supervisor.send_input(&process.id, tokens).await {
                        log::warn!("Failed to send stop input to {}: {}", process.id, e);
                        first_err.get_or_insert(e);
                    }
                }
                first_err.map_or(Ok(()), Err)
            }
            StopMode::Script(argv) => {
                let (program, fixed) = argv.split_first().ok_or_else(|| {
                    let name = processes.first().map_or("", |p| p.name.as_str());
                    SupervisorError::EmptyCommand(name.to_string())
                })?;

                let mut args = fixed.to_vec();
                for process in processes {
                    args.push(process.id.to_string());
                    args.push(process.pid.to_string());
                }
                run_helper(program, &args, None).await?;
                Ok(())
            }
        }
    }
}
