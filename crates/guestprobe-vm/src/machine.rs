//! VM state and memory counters as reported by the management API.

use crate::error::Result;
use async_trait::async_trait;
use guestprobe_core::{poll, HarnessError, PollSettings};
use serde::Deserialize;
use std::fmt;

const BYTES_PER_MIB: i64 = 1024 * 1024;

/// Power state of a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    /// Powered off.
    Off,
    /// Running.
    Running,
    /// Memory state saved to disk.
    Saved,
    /// Paused in memory.
    Paused,
    /// Transitioning to running.
    Starting,
    /// Any other state name the API reports.
    Other(String),
}

impl VmState {
    /// Parse a state name (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "off" => Self::Off,
            "running" => Self::Running,
            "saved" => Self::Saved,
            "paused" => Self::Paused,
            "starting" => Self::Starting,
            _ => Self::Other(s.trim().to_string()),
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Off => write!(f, "off"),
            VmState::Running => write!(f, "running"),
            VmState::Saved => write!(f, "saved"),
            VmState::Paused => write!(f, "paused"),
            VmState::Starting => write!(f, "starting"),
            VmState::Other(s) => write!(f, "{s}"),
        }
    }
}

impl<'de> Deserialize<'de> for VmState {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(Self::parse(&s))
    }
}

/// Dynamic Memory counters for one VM, in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryCounters {
    /// Memory currently assigned by the host.
    pub assigned_mb: i64,
    /// Memory the guest reports it needs.
    pub demand_mb: i64,
}

impl MemoryCounters {
    /// Both counters are strictly positive.
    pub fn is_positive(&self) -> bool {
        self.assigned_mb > 0 && self.demand_mb > 0
    }
}

/// One VM as described by the management API.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VmInfo {
    /// VM name.
    pub name: String,
    /// Power state.
    pub state: VmState,
    /// Assigned memory in bytes.
    #[serde(default)]
    pub memory_assigned: i64,
    /// Memory demand in bytes.
    #[serde(default)]
    pub memory_demand: i64,
}

impl VmInfo {
    /// Memory counters converted to MiB.
    pub fn memory(&self) -> MemoryCounters {
        MemoryCounters {
            assigned_mb: self.memory_assigned / BYTES_PER_MIB,
            demand_mb: self.memory_demand / BYTES_PER_MIB,
        }
    }
}

/// VM lifecycle operations exposed by a hypervisor management API.
#[async_trait]
pub trait VmControl: Send + Sync {
    /// Describe a VM.
    async fn info(&self, vm: &str) -> Result<VmInfo>;

    /// Power on (or restore from saved state).
    async fn start(&self, vm: &str) -> Result<()>;

    /// Shut down; `force` turns the VM off without a guest shutdown.
    async fn stop(&self, vm: &str, force: bool) -> Result<()>;

    /// Save memory state and stop.
    async fn save(&self, vm: &str) -> Result<()>;

    /// True if the guest heartbeat integration service reports OK.
    async fn heartbeat_ok(&self, vm: &str) -> Result<bool>;

    /// Current power state.
    async fn state(&self, vm: &str) -> Result<VmState> {
        Ok(self.info(vm).await?.state)
    }

    /// Current memory counters.
    async fn memory(&self, vm: &str) -> Result<MemoryCounters> {
        Ok(self.info(vm).await?.memory())
    }
}

/// Wait until the guest heartbeat reports OK.
///
/// Heartbeat queries that fail while the guest boots count as "not yet".
/// Runner-level failures still end the wait.
///
/// # Errors
///
/// [`HarnessError::GuestNotReady`] if the heartbeat never reports OK.
pub async fn wait_for_guest(
    control: &dyn VmControl,
    vm: &str,
    settings: PollSettings,
) -> std::result::Result<(), HarnessError> {
    tracing::debug!(vm = %vm, timeout_secs = settings.timeout.as_secs(), "Waiting for guest heartbeat");
    let result = poll(
        || async move {
            match control.heartbeat_ok(vm).await {
                Ok(ok) => Ok(ok),
                Err(crate::VmError::Harness(e)) => Err(e),
                Err(e) => {
                    tracing::trace!(vm = %vm, error = %e, "Heartbeat query failed");
                    Ok(false)
                }
            }
        },
        |ok| *ok,
        settings,
    )
    .await?;

    if result.timed_out {
        return Err(HarnessError::GuestNotReady(format!(
            "{vm} heartbeat not OK after {}s",
            result.elapsed.as_secs()
        )));
    }
    tracing::info!(vm = %vm, elapsed_ms = result.elapsed.as_millis() as u64, "Guest heartbeat OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_state_parse() {
        assert_eq!(VmState::parse("Running"), VmState::Running);
        assert_eq!(VmState::parse("off"), VmState::Off);
        assert_eq!(VmState::parse("Saved"), VmState::Saved);
        assert_eq!(
            VmState::parse("FastSaved"),
            VmState::Other("FastSaved".into())
        );
        assert_eq!(VmState::Other("Stopping".into()).to_string(), "Stopping");
    }

    #[test]
    fn test_info_from_json() {
        let json = r#"{"Name":"guest1","State":"Running","MemoryAssigned":1073741824,"MemoryDemand":536870912}"#;
        let info: VmInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.state, VmState::Running);
        assert_eq!(
            info.memory(),
            MemoryCounters {
                assigned_mb: 1024,
                demand_mb: 512
            }
        );
        assert!(info.memory().is_positive());
    }

    #[test]
    fn test_off_vm_has_zero_memory() {
        let json = r#"{"Name":"guest2","State":"Off","MemoryAssigned":0,"MemoryDemand":0}"#;
        let info: VmInfo = serde_json::from_str(json).unwrap();
        assert!(!info.memory().is_positive());
    }

    struct Heartbeat {
        ready_after: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl VmControl for Heartbeat {
        async fn info(&self, vm: &str) -> Result<VmInfo> {
            Err(VmError::NotFound { vm: vm.into() })
        }
        async fn start(&self, _vm: &str) -> Result<()> {
            Ok(())
        }
        async fn stop(&self, _vm: &str, _force: bool) -> Result<()> {
            Ok(())
        }
        async fn save(&self, _vm: &str) -> Result<()> {
            Ok(())
        }
        async fn heartbeat_ok(&self, vm: &str) -> Result<bool> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(VmError::Command {
                    operation: "Get-VMIntegrationService",
                    target: vm.into(),
                    exit_code: 1,
                    message: "not yet".into(),
                });
            }
            Ok(n >= self.ready_after)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_guest_tolerates_boot_errors() {
        let hb = Heartbeat {
            ready_after: 3,
            calls: AtomicU32::new(0),
        };
        wait_for_guest(&hb, "vm2", PollSettings::from_secs(1, 60))
            .await
            .unwrap();
        assert_eq!(hb.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_guest_times_out() {
        let hb = Heartbeat {
            ready_after: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let err = wait_for_guest(&hb, "vm2", PollSettings::from_secs(1, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::GuestNotReady(_)));
    }
}
