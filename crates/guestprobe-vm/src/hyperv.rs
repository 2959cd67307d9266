//! Hyper-V management through the PowerShell Hyper-V module.
//!
//! Every operation is a one-line script run with `-NonInteractive`. The
//! script sets `$ErrorActionPreference = 'Stop'`, so a cmdlet error becomes a
//! non-zero exit code with the error record on stderr.

use crate::error::{Result, VmError};
use crate::machine::{VmControl, VmInfo};
use async_trait::async_trait;
use guestprobe_core::CommandRunner;

/// Quote a value as a PowerShell single-quoted string.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// [`VmControl`] backed by Hyper-V cmdlets.
pub struct HyperVControl<R> {
    runner: R,
    program: String,
    server: String,
}

impl<R: CommandRunner> HyperVControl<R> {
    /// Create a controller that manages VMs on `server` using `program`
    /// (typically `powershell` or `pwsh`).
    pub fn new(runner: R, program: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            server: server.into(),
        }
    }

    /// Hyper-V host the controller targets.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// `-Name '<vm>' -ComputerName '<server>'`
    fn target(&self, vm: &str) -> String {
        format!("-Name {} -ComputerName {}", quote(vm), quote(&self.server))
    }

    fn args(script: String) -> Vec<String> {
        vec![
            "-NoProfile".into(),
            "-NonInteractive".into(),
            "-Command".into(),
            format!("$ErrorActionPreference = 'Stop'; {script}"),
        ]
    }

    /// Run a script and return stdout, mapping failures to [`VmError`].
    async fn invoke(&self, operation: &'static str, vm: &str, script: String) -> Result<String> {
        tracing::debug!(operation, vm = %vm, server = %self.server, "Invoking management cmdlet");
        let output = self.runner.run(&self.program, &Self::args(script)).await?;
        if output.success() {
            return Ok(output.stdout);
        }

        let message = output.stderr.trim().to_string();
        tracing::warn!(operation, vm = %vm, exit_code = output.exit_code, error = %message, "Management cmdlet failed");
        if message.contains("ObjectNotFound")
            || message.to_lowercase().contains("unable to find a virtual machine")
        {
            return Err(VmError::NotFound { vm: vm.to_string() });
        }
        Err(VmError::Command {
            operation,
            target: vm.to_string(),
            exit_code: output.exit_code,
            message,
        })
    }
}

#[async_trait]
impl<R: CommandRunner> VmControl for HyperVControl<R> {
    async fn info(&self, vm: &str) -> Result<VmInfo> {
        let script = format!(
            "Get-VM {} | Select-Object Name,@{{Name='State';Expression={{$_.State.ToString()}}}},MemoryAssigned,MemoryDemand | ConvertTo-Json -Compress",
            self.target(vm)
        );
        let stdout = self.invoke("Get-VM", vm, script).await?;
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Err(VmError::NotFound { vm: vm.to_string() });
        }
        let info: VmInfo = serde_json::from_str(stdout).map_err(|e| VmError::Output {
            operation: "Get-VM",
            message: format!("{e}: {stdout}"),
        })?;
        tracing::trace!(vm = %vm, state = %info.state, assigned = info.memory_assigned, demand = info.memory_demand, "VM info");
        Ok(info)
    }

    async fn start(&self, vm: &str) -> Result<()> {
        tracing::info!(vm = %vm, "Starting VM");
        self.invoke("Start-VM", vm, format!("Start-VM {}", self.target(vm)))
            .await
            .map(|_| ())
    }

    async fn stop(&self, vm: &str, force: bool) -> Result<()> {
        tracing::info!(vm = %vm, force, "Stopping VM");
        let flags = if force { "-TurnOff -Force" } else { "-Force" };
        self.invoke("Stop-VM", vm, format!("Stop-VM {} {flags}", self.target(vm)))
            .await
            .map(|_| ())
    }

    async fn save(&self, vm: &str) -> Result<()> {
        tracing::info!(vm = %vm, "Saving VM");
        self.invoke("Save-VM", vm, format!("Save-VM {}", self.target(vm)))
            .await
            .map(|_| ())
    }

    async fn heartbeat_ok(&self, vm: &str) -> Result<bool> {
        let script = format!(
            "(Get-VMIntegrationService -VMName {} -ComputerName {} -Name Heartbeat).PrimaryStatusDescription",
            quote(vm),
            quote(&self.server)
        );
        let stdout = self
            .invoke("Get-VMIntegrationService", vm, script)
            .await?;
        Ok(stdout.trim().eq_ignore_ascii_case("OK"))
    }
}
