//! Configuration for the guestprobe binary.
//!
//! Configuration is loaded from environment variables with sensible defaults.
//! Per-test values travel in the parameter blob instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Artifact and tool locations shared by every scenario.
#[derive(Debug, Clone)]
pub struct GuestprobeConfig {
    /// State marker file.
    pub state_file: PathBuf,

    /// Directory that receives `<vmName>_summary.log`.
    pub log_dir: PathBuf,

    /// PowerShell executable used for Hyper-V cmdlets.
    pub powershell: String,

    /// ssh executable used to reach guests.
    pub ssh: String,

    /// Upper bound for any single external command.
    pub command_timeout: Duration,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("executable not found on PATH: {0}")]
    MissingProgram(String),

    #[error("log directory parent not found: {0}")]
    InvalidLogDir(PathBuf),

    #[error("command timeout must be greater than zero")]
    ZeroTimeout,
}

impl Default for GuestprobeConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("state.txt"),
            log_dir: PathBuf::from("."),
            powershell: "powershell".into(),
            ssh: "ssh".into(),
            command_timeout: Duration::from_secs(300),
        }
    }
}

impl GuestprobeConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GUESTPROBE_STATE_FILE` | `state.txt` |
    /// | `GUESTPROBE_LOG_DIR` | `.` |
    /// | `GUESTPROBE_POWERSHELL` | `powershell` |
    /// | `GUESTPROBE_SSH` | `ssh` |
    /// | `GUESTPROBE_COMMAND_TIMEOUT` | `300` (seconds) |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            state_file: std::env::var("GUESTPROBE_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.state_file),
            log_dir: std::env::var("GUESTPROBE_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.log_dir),
            powershell: std::env::var("GUESTPROBE_POWERSHELL").unwrap_or(default.powershell),
            ssh: std::env::var("GUESTPROBE_SSH").unwrap_or(default.ssh),
            command_timeout: std::env::var("GUESTPROBE_COMMAND_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.command_timeout),
        }
    }

    /// Summary log path for a run against `vm_name`.
    ///
    /// Path separators in the name are replaced so the log always lands
    /// directly inside `log_dir`.
    pub fn summary_path(&self, vm_name: Option<&str>) -> PathBuf {
        let name = vm_name.filter(|n| !n.is_empty()).unwrap_or("guestprobe");
        let safe: String = name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        if safe != name {
            tracing::warn!(vm_name = %name, file_name = %safe, "Sanitised VM name for summary log");
        }
        self.log_dir.join(format!("{safe}_summary.log"))
    }

    /// Check that the configured tools and directories are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        for program in [&self.powershell, &self.ssh] {
            if !on_path(program) {
                return Err(ConfigError::MissingProgram(program.clone()));
            }
        }
        if let Some(parent) = self.log_dir.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::InvalidLogDir(self.log_dir.clone()));
            }
        }
        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    ///
    /// A missing tool is only fatal for the scenario that needs it, and the
    /// runner reports that as an abort.
    pub fn validate_warn(&self) {
        if let Err(e) = self.validate() {
            tracing::warn!(error = %e, "Configuration problem");
        }
    }
}

/// True if `program` is a path that exists or is found in `PATH`.
fn on_path(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.exists();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                let candidate = dir.join(program);
                candidate.exists() || candidate.with_extension("exe").exists()
            })
        })
        .unwrap_or(false)
}
