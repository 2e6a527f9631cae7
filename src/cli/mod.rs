//! Command-line interface for relaypool.
//!
//! Provides the session runner and the worker-side relay command used
//! by the script channel.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
