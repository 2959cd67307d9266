//! Guest-side KVP pool queries.
//!
//! The guest ships a `kvp_client` tool that prints the records of one
//! numbered pool. It is reached over ssh; this module owns both the ssh
//! invocation and the listing format, so a change to either stays here.

use crate::error::{Result, VmError};
use guestprobe_core::CommandRunner;
use std::path::PathBuf;

/// Exit status ssh uses for its own connection errors.
const SSH_CONNECTION_ERROR: i32 = 255;

/// One key/value record from a KVP pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvpRecord {
    /// Record key.
    pub key: String,
    /// Record value.
    pub value: String,
}

/// Parse a `kvp_client` pool listing.
///
/// Records are lines of the form `Key: <key>; Value: <value>`; headers such
/// as `Pool is 0` or `Number of records: 3` are ignored.
pub fn parse_listing(stdout: &str) -> Vec<KvpRecord> {
    stdout
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Key:")?;
            let (key, value) = match rest.split_once("; Value:") {
                Some((key, value)) => (key, value),
                None => (rest, ""),
            };
            Some(KvpRecord {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

/// How to open a shell on the guest.
#[derive(Debug, Clone)]
pub struct GuestShell {
    /// ssh executable.
    pub program: String,
    /// Remote user.
    pub user: String,
    /// Guest address.
    pub address: String,
    /// Private key file.
    pub identity: Option<PathBuf>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl GuestShell {
    /// Create a shell description with `ssh` as `root` and no key.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            program: "ssh".into(),
            user: "root".into(),
            address: address.into(),
            identity: None,
            connect_timeout_secs: 10,
        }
    }

    /// Set the ssh executable.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the remote user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the private key file.
    pub fn identity(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity = Some(path.into());
        self
    }

    /// Arguments that run `command` on the guest.
    pub fn args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(identity) = &self.identity {
            args.push("-i".into());
            args.push(identity.to_string_lossy().into_owned());
        }
        args.extend([
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            format!("{}@{}", self.user, self.address),
            command.to_string(),
        ]);
        args
    }
}

/// Queries KVP pools inside a guest.
pub struct KvpClient<R> {
    runner: R,
    shell: GuestShell,
    tool: String,
}

impl<R: CommandRunner> KvpClient<R> {
    /// Create a client that runs `kvp_client` through `shell`.
    pub fn new(runner: R, shell: GuestShell) -> Self {
        Self {
            runner,
            shell,
            tool: "kvp_client".into(),
        }
    }

    /// Override the guest-side tool path.
    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    /// The command runner in use.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// List the records in pool `pool`.
    ///
    /// # Errors
    ///
    /// [`VmError::Unreachable`] if ssh could not connect;
    /// [`VmError::Command`] if `kvp_client` itself failed.
    pub async fn pool(&self, pool: u32) -> Result<Vec<KvpRecord>> {
        let command = format!("{} {}", self.tool, pool);
        tracing::debug!(pool, address = %self.shell.address, "Querying KVP pool");

        let output = self
            .runner
            .run(&self.shell.program, &self.shell.args(&command))
            .await?;

        if output.exit_code == SSH_CONNECTION_ERROR {
            tracing::warn!(address = %self.shell.address, error = %output.stderr.trim(), "Guest unreachable");
            return Err(VmError::Unreachable(self.shell.address.clone()));
        }
        if !output.success() {
            return Err(VmError::Command {
                operation: "kvp_client",
                target: self.shell.address.clone(),
                exit_code: output.exit_code,
                message: output.stderr.trim().to_string(),
            });
        }

        let records = parse_listing(&output.stdout);
        tracing::debug!(pool, records = records.len(), "KVP pool listed");
        Ok(records)
    }
}
