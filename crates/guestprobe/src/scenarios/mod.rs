//! Built-in verification scenarios.

mod dm_save_restore;
mod kvp_pool;

pub use dm_save_restore::{DmSaveRestore, DmSettings};
pub use kvp_pool::{KvpPoolPlacement, KvpSettings};

use crate::config::GuestprobeConfig;
use clap::ValueEnum;
use guestprobe_core::{run_with_params, CommandRunner, ProcessRunner, StateReporter};
use guestprobe_vm::{GuestShell, HyperVControl, KvpClient};
use std::sync::Arc;

/// Scenario selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioKind {
    /// Dynamic Memory counters across save/restore of two VMs.
    DmSaveRestore,
    /// KVP key is listed in pool 0 only.
    KvpPoolPlacement,
}

impl ScenarioKind {
    /// Keys the scenario cannot run without.
    pub fn required(&self) -> &'static [&'static str] {
        match self {
            Self::DmSaveRestore => DmSettings::REQUIRED,
            Self::KvpPoolPlacement => KvpSettings::REQUIRED,
        }
    }
}

/// Run `kind` against real tools.
pub async fn run_scenario(
    kind: ScenarioKind,
    raw: &str,
    config: &GuestprobeConfig,
    reporter: &mut StateReporter,
) -> bool {
    let runner = Arc::new(ProcessRunner::new().with_timeout(config.command_timeout));
    run_scenario_with(kind, raw, config, runner, reporter).await
}

/// Run `kind` with every external command going through `runner`.
pub async fn run_scenario_with<R>(
    kind: ScenarioKind,
    raw: &str,
    config: &GuestprobeConfig,
    runner: Arc<R>,
    reporter: &mut StateReporter,
) -> bool
where
    R: CommandRunner + 'static,
{
    tracing::info!(scenario = ?kind, "Running scenario");
    match kind {
        ScenarioKind::DmSaveRestore => {
            run_with_params(raw, kind.required(), reporter, |params| {
                let settings = DmSettings::from_params(params)?;
                let control =
                    HyperVControl::new(runner, config.powershell.clone(), settings.hv_server.clone());
                Ok(DmSaveRestore::new(control, settings))
            })
            .await
        }
        ScenarioKind::KvpPoolPlacement => {
            run_with_params(raw, kind.required(), reporter, |params| {
                let settings = KvpSettings::from_params(params)?;
                let control = HyperVControl::new(
                    runner.clone(),
                    config.powershell.clone(),
                    settings.hv_server.clone(),
                );
                let shell = GuestShell::new(settings.ipv4.clone())
                    .program(config.ssh.clone())
                    .user(settings.ssh_user.clone())
                    .identity(settings.ssh_key.clone());
                Ok(KvpPoolPlacement::new(control, KvpClient::new(runner, shell), settings))
            })
            .await
        }
    }
}
