//! # guestprobe
//!
//! Guest-integration test cases for Hyper-V hosts, run one per process by a
//! CI system that reads back a state marker file and a summary log.
//!
//! - [`DmSaveRestore`]: Dynamic Memory counters survive save/restore.
//! - [`KvpPoolPlacement`]: a KVP key is listed in pool 0 only.
//!
//! Both are driven through [`run_scenario`], which parses the parameter blob,
//! wires real tools from [`GuestprobeConfig`], and returns the pass/fail
//! boolean the CI system sees.

pub mod config;
pub mod scenarios;

pub use config::GuestprobeConfig;
pub use scenarios::{
    run_scenario, run_scenario_with, DmSaveRestore, DmSettings, KvpPoolPlacement, KvpSettings,
    ScenarioKind,
};
