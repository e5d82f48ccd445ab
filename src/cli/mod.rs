//! Command-line interface for taskforge.
//!
//! Provides commands for running single units of work and batches, and
//! for inspecting the result cache.

mod commands;

pub use commands::{
    exit_for_error, parse_cli, parse_indices, run_with_cli, Cli, Commands, MAX_BATCH_INDICES,
};
