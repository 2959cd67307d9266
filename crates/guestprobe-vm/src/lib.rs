//! # guestprobe-vm
//!
//! Adapters between guestprobe test cases and the platform under test.
//!
//! - [`VmControl`] abstracts VM lifecycle and memory counters;
//!   [`HyperVControl`] implements it with Hyper-V PowerShell cmdlets.
//! - [`KvpClient`] lists guest KVP pools by running `kvp_client` over ssh.
//!
//! Both go through a [`guestprobe_core::CommandRunner`], and both own the
//! parsing of their tool's output, so a format change touches one module.
//!
//! ## Quick Start
//!
//! ```no_run
//! use guestprobe_core::ProcessRunner;
//! use guestprobe_vm::{HyperVControl, VmControl};
//!
//! # async fn example() -> guestprobe_vm::Result<()> {
//! let control = HyperVControl::new(ProcessRunner::new(), "powershell", "hv01");
//! let memory = control.memory("guest1").await?;
//! println!("assigned {} MiB, demand {} MiB", memory.assigned_mb, memory.demand_mb);
//! # Ok(())
//! # }
//! ```

mod error;
mod hyperv;
mod kvp;
mod machine;

pub use error::{Result, VmError};
pub use hyperv::HyperVControl;
pub use kvp::{parse_listing, GuestShell, KvpClient, KvpRecord};
pub use machine::{wait_for_guest, MemoryCounters, VmControl, VmInfo, VmState};
