//! Command-line interface for wrk2-fleet.
//!
//! Provides the `run` command driving a full load test and the `outputs`
//! command inspecting a deployed stack.

mod commands;

pub use commands::{execute, parse_cli, run, run_with_cli, Cli, Commands, RunArgs};
