//! guestprobe entry point.
//!
//! Runs one scenario against a Hyper-V host and exits 0 only if it
//! completed. The state marker and summary log carry the details.

use clap::Parser;
use guestprobe::{run_scenario, GuestprobeConfig, ScenarioKind};
use guestprobe_core::{StateReporter, TestParameters};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "guestprobe", version, about = "Run a Hyper-V guest-integration test case")]
struct Cli {
    /// Scenario to run.
    #[arg(value_enum)]
    scenario: ScenarioKind,

    /// Parameter blob, `key=value;key=value;...`.
    #[arg(short, long)]
    params: String,

    /// State marker file (overrides GUESTPROBE_STATE_FILE).
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Summary log directory (overrides GUESTPROBE_LOG_DIR).
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; the state marker is the machine-readable result
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("guestprobe=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = GuestprobeConfig::from_env();
    if let Some(state_file) = cli.state_file {
        config.state_file = state_file;
    }
    if let Some(log_dir) = cli.log_dir {
        config.log_dir = log_dir;
    }
    tracing::info!(?config, scenario = ?cli.scenario, "Configuration loaded");
    config.validate_warn();

    // Lenient pre-parse: the real parse happens inside the run so that a bad
    // blob is reported as an abort.
    let preview = TestParameters::parse(&cli.params, &[]).ok();
    let root_dir = preview.as_ref().and_then(|p| p.get("rootDir")).map(str::to_string);
    let vm_name = preview.as_ref().and_then(|p| p.get("vmName")).map(str::to_string);

    let chdir_error = root_dir.and_then(|dir| match std::env::set_current_dir(&dir) {
        Ok(()) => {
            tracing::info!(root_dir = %dir, "Changed working directory");
            None
        }
        Err(e) => Some(format!("cannot change to rootDir {dir}: {e}")),
    });

    let mut reporter =
        StateReporter::create(&config.state_file, config.summary_path(vm_name.as_deref()))?;

    if let Some(reason) = chdir_error {
        tracing::error!(reason = %reason, "Aborting before run");
        reporter.report_aborted(reason)?;
        return Ok(ExitCode::FAILURE);
    }

    let passed = run_scenario(cli.scenario, &cli.params, &config, &mut reporter).await;
    tracing::info!(passed, state = ?reporter.state(), "Run finished");

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
