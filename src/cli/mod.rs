//! Command-line interface for batch-eval.
//!
//! Provides the `run` and `status` commands.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands, RunArgs, StatusArgs};
