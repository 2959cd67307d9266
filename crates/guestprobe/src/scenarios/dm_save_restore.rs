//! Dynamic Memory counters across save/restore.
//!
//! A second VM is started to put memory pressure on the host. Both VMs must
//! report positive assigned and demand memory before, and after each VM is
//! saved and restored, for every round.

use async_trait::async_trait;
use guestprobe_core::{
    note, poll, retry, ConfigError, HarnessError, PollSettings, Result, StateReporter,
    TestCase, TestParameters,
};
use guestprobe_vm::{wait_for_guest, MemoryCounters, VmControl, VmError, VmState};
use std::time::Duration;

/// Settings for [`DmSaveRestore`], parsed from the parameter blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmSettings {
    /// VM under test (`vmName`).
    pub vm1: String,
    /// Dependent VM started for memory pressure (`vm2Name`).
    pub vm2: String,
    /// Hyper-V host (`hvServer`).
    pub hv_server: String,
    /// `TC_COVERED`
    pub covers: Option<String>,
    /// Start attempts for the dependent VM (`tries`, default 3).
    pub tries: u32,
    /// Save/restore rounds (`rounds`, default 2).
    pub rounds: u32,
    /// Pause after each save and each restore (`settleSeconds`, default 30).
    pub settle: Duration,
    /// Pause between start attempts (`retryDelaySeconds`, default 10).
    pub retry_delay: Duration,
    /// Window for counters to turn positive (`memoryWindowSeconds`, default 30).
    pub memory_window: PollSettings,
    /// Window for the guest heartbeat (`guestTimeoutSeconds`, default 120).
    pub guest_ready: PollSettings,
}

impl DmSettings {
    /// Keys that must be present in the parameter blob.
    pub const REQUIRED: &'static [&'static str] = &["vmName", "hvServer", "vm2Name"];

    /// Build settings from parsed parameters.
    pub fn from_params(params: &TestParameters) -> std::result::Result<Self, ConfigError> {
        let vm1 = params.require_non_empty("vmName")?.to_string();
        let vm2 = params.require_non_empty("vm2Name")?.to_string();
        if vm1.eq_ignore_ascii_case(&vm2) {
            return Err(ConfigError::InvalidValue {
                key: "vm2Name".into(),
                value: vm2,
                reason: "must differ from vmName".into(),
            });
        }

        let tries: u32 = params.get_or("tries", 3)?;
        if tries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "tries".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let rounds: u32 = params.get_or("rounds", 2)?;

        Ok(Self {
            vm1,
            vm2,
            hv_server: params.require_non_empty("hvServer")?.to_string(),
            covers: params.get("TC_COVERED").map(str::to_string),
            tries,
            rounds,
            settle: Duration::from_secs(params.get_or("settleSeconds", 30)?),
            retry_delay: Duration::from_secs(params.get_or("retryDelaySeconds", 10)?),
            memory_window: PollSettings::from_secs(1, params.get_or("memoryWindowSeconds", 30)?),
            guest_ready: PollSettings::from_secs(5, params.get_or("guestTimeoutSeconds", 120)?),
        })
    }
}

/// Classify a management failure.
///
/// Runner-level errors keep their own kind; a cmdlet that ran and failed
/// means the platform could not carry out the step.
fn vm_failure(e: VmError, context: &str) -> HarnessError {
    match e {
        VmError::Harness(inner) => inner,
        other => HarnessError::DependencyUnavailable(format!("{context}: {other}")),
    }
}

/// Dynamic Memory save/restore scenario.
pub struct DmSaveRestore<V> {
    control: V,
    settings: DmSettings,
    /// Set once vm2 has been started by this run; cleared by cleanup.
    dependency_started: bool,
}

impl<V: VmControl> DmSaveRestore<V> {
    /// Create the scenario.
    pub fn new(control: V, settings: DmSettings) -> Self {
        Self {
            control,
            settings,
            dependency_started: false,
        }
    }

    /// Settings in use.
    pub fn settings(&self) -> &DmSettings {
        &self.settings
    }

    async fn require_state(&self, vm: &str, expected: VmState) -> Result<()> {
        let state = self.control.state(vm).await?;
        if state != expected {
            return Err(HarnessError::DependencyUnavailable(format!(
                "{vm} is {state}, expected {expected}"
            )));
        }
        Ok(())
    }

    /// Start vm2, retrying only failed start commands.
    ///
    /// A VM that starts but never reports a heartbeat is a different failure
    /// and is not retried.
    async fn start_dependency(&mut self) -> Result<()> {
        let vm2 = self.settings.vm2.as_str();
        let control = &self.control;
        retry(
            self.settings.tries,
            self.settings.retry_delay,
            "start dependent VM",
            |attempt| async move {
                tracing::info!(vm = %vm2, attempt, "Starting dependent VM");
                control
                    .start(vm2)
                    .await
                    .map_err(|e| vm_failure(e, &format!("unable to start {vm2} (attempt {attempt})")))
            },
        )
        .await?;
        self.dependency_started = true;

        wait_for_guest(&self.control, vm2, self.settings.guest_ready).await
    }

    /// Poll until both counters of `vm` are positive.
    async fn check_memory(&self, reporter: &StateReporter, vm: &str, checkpoint: &str) -> Result<()> {
        let control = &self.control;
        let result = poll(
            move || async move { control.memory(vm).await.map_err(HarnessError::from) },
            MemoryCounters::is_positive,
            self.settings.memory_window,
        )
        .await?;

        let memory = result.value;
        if result.timed_out {
            let (counter, value) = if memory.assigned_mb <= 0 {
                ("assigned", memory.assigned_mb)
            } else {
                ("demand", memory.demand_mb)
            };
            return Err(HarnessError::Assertion(format!(
                "{vm} {counter} memory is {value} MiB {checkpoint}"
            )));
        }

        note(
            reporter,
            format!(
                "{vm} {checkpoint}: assigned {} MiB, demand {} MiB",
                memory.assigned_mb, memory.demand_mb
            ),
        );
        Ok(())
    }

    async fn check_both(&self, reporter: &StateReporter, checkpoint: &str) -> Result<()> {
        self.check_memory(reporter, &self.settings.vm1, checkpoint).await?;
        self.check_memory(reporter, &self.settings.vm2, checkpoint).await
    }

    async fn save_restore(&self, reporter: &StateReporter, vm: &str, round: u32) -> Result<()> {
        note(reporter, format!("Round {round}: saving {vm}"));
        self.control
            .save(vm)
            .await
            .map_err(|e| vm_failure(e, &format!("failed to save {vm}")))?;
        tokio::time::sleep(self.settings.settle).await;

        note(reporter, format!("Round {round}: restoring {vm}"));
        self.control
            .start(vm)
            .await
            .map_err(|e| vm_failure(e, &format!("failed to restore {vm}")))?;
        wait_for_guest(&self.control, vm, self.settings.guest_ready).await?;
        tokio::time::sleep(self.settings.settle).await;

        self.check_both(reporter, &format!("after restoring {vm} (round {round})"))
            .await
    }
}

#[async_trait]
impl<V: VmControl> TestCase for DmSaveRestore<V> {
    fn name(&self) -> &str {
        "dm-save-restore"
    }

    fn covers(&self) -> Option<&str> {
        self.settings.covers.as_deref()
    }

    async fn run(&mut self, reporter: &StateReporter) -> Result<()> {
        let vm1 = self.settings.vm1.clone();
        let vm2 = self.settings.vm2.clone();

        self.require_state(&vm1, VmState::Running).await?;
        self.require_state(&vm2, VmState::Off).await?;

        note(reporter, format!("Starting dependent VM {vm2}"));
        self.start_dependency().await?;
        note(reporter, format!("{vm2} started and reporting heartbeat"));

        self.check_both(reporter, "before save").await?;

        for round in 1..=self.settings.rounds {
            self.save_restore(reporter, &vm1, round).await?;
            self.save_restore(reporter, &vm2, round).await?;
        }

        note(
            reporter,
            format!(
                "Memory counters stayed positive across {} save/restore round(s)",
                self.settings.rounds
            ),
        );
        Ok(())
    }

    async fn cleanup(&mut self, reporter: &StateReporter) -> Result<()> {
        if !self.dependency_started {
            return Ok(());
        }
        self.dependency_started = false;
        let vm2 = &self.settings.vm2;
        tracing::info!(vm = %vm2, "Stopping dependent VM");
        self.control.stop(vm2, true).await?;
        note(reporter, format!("Stopped {vm2}"));
        Ok(())
    }
}
