//! Don't Starve Together cluster driver
//!
//! A cluster runs one dedicated server process per shard (`Master`,
//! `Caves`, ...), each in its own container named `<container>/<shard>`.
//! Shards sharing one mod directory must not update it concurrently, so a
//! shared update runs once, to completion, before any shard starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::{Escalation, EscalationStep};
use crate::supervisor::{run_helper, Backend, ManagedProcess, Supervisor, SupervisorError};
use crate::units::shard_container_name;

const BINARY_32: &str = "dontstarve_dedicated_server_nullrenderer";
const BINARY_64: &str = "dontstarve_dedicated_server_nullrenderer_x64";

const SHUTDOWN_INPUT: &[&str] = &["c_shutdown()", "Enter"];
const INTERRUPT_INPUT: &[&str] = &["C-c"];
const FIRST_INTERRUPT_DELAY: Duration = Duration::from_secs(2);
const SECOND_INTERRUPT_DELAY: Duration = Duration::from_secs(1);

const RLWRAP_PREFIX: &[&str] = &[
    "rlwrap",
    "-pGreen",
    "-C",
    "dont_starve_together",
    "-S",
    "> ",
    "-m",
    "-M",
    ".lua",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DstDriver {
    /// Game installation directory
    pub game_install: PathBuf,
    /// Cluster data directory; its parent is the persistent storage root
    pub data_dir: PathBuf,
    pub cluster: String,
    pub shards: Vec<String>,
    #[serde(default)]
    pub use_32bit: bool,
    #[serde(default)]
    pub use_rlwrap: bool,
    #[serde(default)]
    pub lan_only: bool,
    /// Every shard keeps its own mod directory
    #[serde(default)]
    pub shard_unique_mods: bool,
    #[serde(default)]
    pub update_mods: bool,
}

impl DstDriver {
    /// Directory the server binary runs from
    pub fn working_dir(&self) -> PathBuf {
        let bin = if self.use_32bit { "bin" } else { "bin64" };
        self.game_install.join(bin)
    }

    fn binary(&self) -> PathBuf {
        let name = if self.use_32bit { BINARY_32 } else { BINARY_64 };
        self.working_dir().join(name)
    }

    /// `-persistent_storage_root` and `-conf_dir` split out of `data_dir`
    fn storage_args(&self) -> Vec<String> {
        let conf_dir = self
            .data_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let root = match self.data_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        vec![
            "-persistent_storage_root".into(),
            root.display().to_string(),
            "-conf_dir".into(),
            conf_dir,
            "-ugc_directory".into(),
            "../ugc_mods".into(),
        ]
    }

    /// Shards skip their own mod update when it is shared or disabled
    fn shards_skip_update(&self) -> bool {
        !self.shard_unique_mods || !self.update_mods
    }

    /// One-off invocation that updates the shared mods and exits
    pub fn update_command(&self) -> Option<Vec<String>> {
        if self.shard_unique_mods || !self.update_mods {
            return None;
        }
        let first = self.shards.first()?;

        let mut argv = vec![self.binary().display().to_string()];
        argv.extend(self.storage_args());
        argv.extend([
            "-cluster".into(),
            self.cluster.clone(),
            "-shard".into(),
            first.clone(),
            "-only_update_server_mods".into(),
        ]);
        Some(argv)
    }

    /// Command line of one shard's server process
    pub fn shard_command(&self, shard: &str) -> Vec<String> {
        let mut argv: Vec<String> = Vec::new();
        if self.use_rlwrap {
            argv.extend(RLWRAP_PREFIX.iter().map(|s| s.to_string()));
        }
        argv.push(self.binary().display().to_string());
        argv.extend(self.storage_args());
        if self.lan_only {
            argv.push("-lan".into());
        }
        argv.extend([
            "-cluster".into(),
            self.cluster.clone(),
            "-shard".into(),
            shard.to_string(),
            "-console".into(),
        ]);
        if self.shards_skip_update() {
            argv.push("-skip_update_server_mods".into());
        }
        argv
    }

    pub(super) async fn start<B: Backend>(
        &self,
        container: &str,
        supervisor: &mut Supervisor<B>,
    ) -> Result<Vec<ManagedProcess>, SupervisorError> {
        let cwd = self.working_dir();

        if let Some(update) = self.update_command() {
            log::info!("Updating mods for {} before starting shards", container);
            if let Some((program, args)) = update.split_first() {
                if let Err(e) = run_helper(program, args, Some(&cwd)).await {
                    log::warn!("Mod update for {} failed: {}", container, e);
                }
            }
        }

        let mut spawned = Vec::new();
        let mut last_err = None;
        for shard in &self.shards {
            let name = shard_container_name(container, shard);
            match supervisor
                .spawn_direct(&name, &self.shard_command(shard), Some(&cwd))
                .await
            {
                Ok(process) => spawned.push(process),
                Err(e) => {
                    log::warn!("Failed to start shard {}: {}", name, e);
                    last_err = Some(e);
                }
            }
        }

        match (spawned.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            (true, None) => Err(SupervisorError::EmptyCommand(container.to_string())),
            (false, _) => Ok(spawned),
        }
    }

    pub(super) async fn stop<B: Backend>(
        &self,
        processes: &[ManagedProcess],
        supervisor: &Supervisor<B>,
    ) -> Escalation {
        let shutdown: Vec<String> = SHUTDOWN_INPUT.iter().map(|s| s.to_string()).collect();
        for process in processes {
            if let Err(e) = supervisor.send_input(&process.id, &shutdown).await {
                log::warn!("Failed to send shutdown to {}: {}", process.name, e);
            }
        }

        Escalation {
            targets: processes.iter().map(|p| p.id.clone()).collect(),
            steps: vec![
                EscalationStep::new(FIRST_INTERRUPT_DELAY, INTERRUPT_INPUT),
                EscalationStep::new(SECOND_INTERRUPT_DELAY, INTERRUPT_INPUT),
            ],
        }
    }
}
