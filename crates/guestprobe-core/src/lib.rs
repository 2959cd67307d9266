//! # guestprobe-core
//!
//! Harness primitives for guest-integration test cases.
//!
//! A test case receives a flat parameter blob, drives external management
//! commands, polls observable state, and ends in exactly one terminal state
//! that collapses to a pass/fail boolean.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   run_with_params()                     │
//! │  raw "k=v;k=v" ──▶ TestParameters ──▶ build(TestCase)   │
//! │                         │ ConfigError ──▶ Aborted       │
//! │                         ▼                               │
//! │  ┌──────────────┐   execute()    ┌───────────────────┐  │
//! │  │  TestCase    │◀──────────────▶│  StateReporter    │  │
//! │  │  - run()     │                │  - state marker   │  │
//! │  │  - cleanup() │                │  - summary log    │  │
//! │  └──────────────┘                └───────────────────┘  │
//! │     │        │                                          │
//! │     ▼        ▼                                          │
//! │  poll()   CommandRunner ──▶ external tools / APIs       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use guestprobe_core::{run_with_params, StateReporter};
//!
//! # async fn example() -> guestprobe_core::Result<()> {
//! let mut reporter = StateReporter::create("state.txt", "guest1_summary.log")?;
//! let passed = run_with_params(
//!     "vmName=guest1;hvServer=localhost",
//!     &["vmName", "hvServer"],
//!     &mut reporter,
//!     |params| MyCase::from_params(params),
//! )
//! .await;
//! std::process::exit(if passed { 0 } else { 1 });
//! # }
//! ```

mod case;
mod error;
mod params;
mod poller;
mod reporter;
mod runner;

pub use case::{execute, note, run_with_params, TestCase};
pub use error::{ConfigError, HarnessError, Result};
pub use params::TestParameters;
pub use poller::{poll, retry, PollResult, PollSettings};
pub use reporter::{StateReporter, TestState};
pub use runner::{CommandOutput, CommandRunner, Expectation, Outcome, ProcessRunner};
