//! KVP pool placement.
//!
//! The key under test must be listed in pool 0 of the guest and in no
//! other pool.

use async_trait::async_trait;
use guestprobe_core::{
    note, CommandRunner, ConfigError, HarnessError, Result, StateReporter, TestCase,
    TestParameters,
};
use guestprobe_vm::{KvpClient, KvpRecord, VmControl, VmError, VmState};
use std::path::{Path, PathBuf};

/// Settings for [`KvpPoolPlacement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvpSettings {
    /// VM under test (`vmName`).
    pub vm_name: String,
    /// Hyper-V host (`hvServer`).
    pub hv_server: String,
    /// Guest address for ssh (`ipv4`).
    pub ipv4: String,
    /// Private key (`sshKey`), resolved under `ssh/` when given as a bare file name.
    pub ssh_key: PathBuf,
    /// Remote user (`sshUser`, default `root`).
    pub ssh_user: String,
    /// Key under test (`Key`).
    pub key: String,
    /// Value the pool 0 record must carry (`Value`), if given.
    pub value: Option<String>,
    /// Number of pools to probe, starting at 0 (`pools`, default 5).
    pub pools: u32,
    /// `TC_COVERED`
    pub covers: Option<String>,
}

impl KvpSettings {
    /// Keys that must be present in the parameter blob.
    pub const REQUIRED: &'static [&'static str] = &["vmName", "hvServer", "ipv4", "sshKey", "Key"];

    /// Build settings from parsed parameters.
    pub fn from_params(params: &TestParameters) -> std::result::Result<Self, ConfigError> {
        let pools: u32 = params.get_or("pools", 5)?;
        if pools == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pools".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            vm_name: params.require_non_empty("vmName")?.to_string(),
            hv_server: params.require_non_empty("hvServer")?.to_string(),
            ipv4: params.require_non_empty("ipv4")?.to_string(),
            ssh_key: resolve_key(params.require_non_empty("sshKey")?),
            ssh_user: params.get("sshUser").unwrap_or("root").to_string(),
            key: params.require_non_empty("Key")?.to_string(),
            value: params.get("Value").map(str::to_string),
            pools,
            covers: params.get("TC_COVERED").map(str::to_string),
        })
    }
}

fn resolve_key(raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.components().count() == 1 && !path.is_absolute() {
        Path::new("ssh").join(path)
    } else {
        path.to_path_buf()
    }
}

/// KVP pool placement scenario.
pub struct KvpPoolPlacement<V, R> {
    control: V,
    kvp: KvpClient<R>,
    settings: KvpSettings,
}

impl<V: VmControl, R: CommandRunner> KvpPoolPlacement<V, R> {
    /// Create the scenario; `kvp` must already point at the guest.
    pub fn new(control: V, kvp: KvpClient<R>, settings: KvpSettings) -> Self {
        Self {
            control,
            kvp,
            settings,
        }
    }

    /// Settings in use.
    pub fn settings(&self) -> &KvpSettings {
        &self.settings
    }

    async fn find(&self, pool: u32) -> Result<Option<KvpRecord>> {
        let records = self.kvp.pool(pool).await.map_err(|e| match e {
            VmError::Command { exit_code, message, .. } => HarnessError::Assertion(format!(
                "kvp_client failed for pool {pool} (exit {exit_code}): {message}"
            )),
            other => other.into(),
        })?;
        Ok(records.into_iter().find(|r| r.key == self.settings.key))
    }
}

#[async_trait]
impl<V: VmControl, R: CommandRunner> TestCase for KvpPoolPlacement<V, R> {
    fn name(&self) -> &str {
        "kvp-pool-placement"
    }

    fn covers(&self) -> Option<&str> {
        self.settings.covers.as_deref()
    }

    async fn run(&mut self, reporter: &StateReporter) -> Result<()> {
        let vm = &self.settings.vm_name;
        let key = &self.settings.key;

        let state = self.control.state(vm).await?;
        if state != VmState::Running {
            return Err(HarnessError::DependencyUnavailable(format!(
                "{vm} is {state}, expected running"
            )));
        }

        let mut in_pool_zero: Option<KvpRecord> = None;
        for pool in 0..self.settings.pools {
            let found = self.find(pool).await?;
            tracing::info!(pool, key = %key, found = found.is_some(), "Probed KVP pool");

            match found {
                Some(record) if pool == 0 => {
                    note(reporter, format!("Pool 0: found {key} = {}", record.value));
                    in_pool_zero = Some(record);
                }
                Some(record) => {
                    note(reporter, format!("Pool {pool}: found {key} = {}", record.value));
                    let also = if in_pool_zero.is_some() {
                        ""
                    } else {
                        " and is missing from pool 0"
                    };
                    return Err(HarnessError::Assertion(format!(
                        "key {key} found in pool {pool}{also}"
                    )));
                }
                None => note(reporter, format!("Pool {pool}: {key} not present")),
            }
        }

        let record = in_pool_zero
            .ok_or_else(|| HarnessError::Assertion(format!("key {key} missing from pool 0")))?;

        if let Some(expected) = &self.settings.value {
            if &record.value != expected {
                return Err(HarnessError::Assertion(format!(
                    "key {key} in pool 0 has value {:?}, expected {expected:?}",
                    record.value
                )));
            }
        }

        note(reporter, format!("{key} present only in pool 0"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guestprobe_core::{execute, CommandOutput, TestState};
    use guestprobe_vm::{GuestShell, VmInfo};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Host {
        state: VmState,
    }

    #[async_trait]
    impl VmControl for Host {
        async fn info(&self, vm: &str) -> guestprobe_vm::Result<VmInfo> {
            Ok(VmInfo {
                name: vm.into(),
                state: self.state.clone(),
                memory_assigned: 0,
                memory_demand: 0,
            })
        }
        async fn start(&self, _vm: &str) -> guestprobe_vm::Result<()> {
            Ok(())
        }
        async fn stop(&self, _vm: &str, _force: bool) -> guestprobe_vm::Result<()> {
            Ok(())
        }
        async fn save(&self, _vm: &str) -> guestprobe_vm::Result<()> {
            Ok(())
        }
        async fn heartbeat_ok(&self, _vm: &str) -> guestprobe_vm::Result<bool> {
            Ok(true)
        }
    }

    /// Answers `kvp_client <pool>` with canned listings; unknown pools are empty.
    #[derive(Default)]
    struct Guest {
        pools: HashMap<u32, CommandOutput>,
        queried: Mutex<Vec<u32>>,
    }

    impl Guest {
        fn with(mut self, pool: u32, listing: &str) -> Self {
            self.pools.insert(pool, CommandOutput::new(0, listing, ""));
            self
        }

        fn failing(mut self, pool: u32, exit_code: i32) -> Self {
            self.pools
                .insert(pool, CommandOutput::new(exit_code, "", "broken pipe"));
            self
        }
    }

    #[async_trait]
    impl CommandRunner for Guest {
        async fn run(&self, _program: &str, args: &[String]) -> guestprobe_core::Result<CommandOutput> {
            let command = args.last().cloned().unwrap_or_default();
            let pool: u32 = command
                .rsplit(' ')
                .next()
                .and_then(|p| p.parse().ok())
                .unwrap_or(u32::MAX);
            self.queried.lock().unwrap().push(pool);
            Ok(self
                .pools
                .get(&pool)
                .cloned()
                .unwrap_or_else(|| CommandOutput::new(0, format!("Pool is {pool}\n"), "")))
        }
    }

    fn settings(extra: &str) -> KvpSettings {
        let raw = format!("vmName=guest1;hvServer=hv01;ipv4=10.0.0.5;sshKey=id_rsa;Key=Probe;{extra}");
        let params = TestParameters::parse(&raw, KvpSettings::REQUIRED).unwrap();
        KvpSettings::from_params(&params).unwrap()
    }

    async fn run(state: VmState, guest: Guest, extra: &str) -> (TestState, String, Vec<u32>) {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = StateReporter::create(
            dir.path().join("state.txt"),
            dir.path().join("guest1_summary.log"),
        )
        .unwrap();
        let settings = settings(extra);
        let kvp = KvpClient::new(guest, GuestShell::new(settings.ipv4.clone()));
        let mut case = KvpPoolPlacement::new(Host { state }, kvp, settings);
        execute(&mut case, &mut reporter).await;

        let queried = case.kvp_queried();
        let summary = std::fs::read_to_string(dir.path().join("guest1_summary.log")).unwrap();
        (reporter.state().unwrap(), summary, queried)
    }

    impl KvpPoolPlacement<Host, Guest> {
        fn kvp_queried(&self) -> Vec<u32> {
            self.kvp.runner().queried.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_settings() {
        let settings = settings("Value=42;TC_COVERED=KVP-03");
        assert_eq!(settings.ssh_key, PathBuf::from("ssh/id_rsa"));
        assert_eq!(settings.ssh_user, "root");
        assert_eq!(settings.pools, 5);
        assert_eq!(settings.value.as_deref(), Some("42"));
        assert_eq!(settings.covers.as_deref(), Some("KVP-03"));

        assert_eq!(resolve_key("/keys/id_rsa"), PathBuf::from("/keys/id_rsa"));
        assert_eq!(resolve_key("keys/id_rsa"), PathBuf::from("keys/id_rsa"));
    }

    #[test]
    fn test_settings_rejects_zero_pools() {
        let params = TestParameters::parse(
            "vmName=a;hvServer=h;ipv4=1.2.3.4;sshKey=k;Key=x;pools=0",
            KvpSettings::REQUIRED,
        )
        .unwrap();
        assert!(matches!(
            KvpSettings::from_params(&params),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "pools"
        ));
    }

    #[tokio::test]
    async fn test_key_only_in_pool_zero_completes() {
        let guest = Guest::default().with(0, "Pool is 0\nKey: Probe; Value: 42\nKey: Other; Value: 1\n");
        let (state, summary, queried) = run(VmState::Running, guest, "Value=42").await;

        assert_eq!(state, TestState::Completed);
        assert_eq!(queried, vec![0, 1, 2, 3, 4]);
        assert!(summary.contains("Pool 0: found Probe = 42"));
        assert!(summary.contains("Probe present only in pool 0"));
    }

    #[tokio::test]
    async fn test_key_in_wrong_pool_fails_early() {
        let guest = Guest::default().with(2, "Key: Probe; Value: 42\n");
        let (state, summary, queried) = run(VmState::Running, guest, "").await;

        assert_eq!(state, TestState::Failed);
        assert_eq!(queried, vec![0, 1, 2]);
        assert!(summary.contains("found in pool 2 and is missing from pool 0"));
    }

    #[tokio::test]
    async fn test_key_missing_everywhere_fails() {
        let (state, summary, _) = run(VmState::Running, Guest::default(), "pools=3").await;

        assert_eq!(state, TestState::Failed);
        assert!(summary.contains("key Probe missing from pool 0"));
    }

    #[tokio::test]
    async fn test_value_mismatch_fails() {
        let guest = Guest::default().with(0, "Key: Probe; Value: 41\n");
        let (state, summary, _) = run(VmState::Running, guest, "Value=42").await;

        assert_eq!(state, TestState::Failed);
        assert!(summary.contains("expected \"42\""));
    }

    #[tokio::test]
    async fn test_vm_not_running_aborts_without_probing() {
        let (state, _, queried) = run(VmState::Off, Guest::default(), "").await;

        assert_eq!(state, TestState::Aborted);
        assert!(queried.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_guest_aborts() {
        let guest = Guest::default().failing(0, 255);
        let (state, summary, _) = run(VmState::Running, guest, "").await;

        assert_eq!(state, TestState::Aborted);
        assert!(summary.contains("dependency unavailable"));
    }

    #[tokio::test]
    async fn test_tool_failure_names_pool() {
        let guest = Guest::default().failing(1, 2);
        let (state, summary, queried) = run(VmState::Running, guest, "").await;

        assert_eq!(state, TestState::Failed);
        assert_eq!(queried, vec![0, 1]);
        assert!(summary.contains("kvp_client failed for pool 1 (exit 2)"));
    }
}
