//! CLI argument models, bootstrap helpers and command dispatch for `flowpilot`.
//!
//! The binary is a thin shell over `flow-stream` and `flow-session`: it maps
//! flags and environment variables onto their configs, renders snapshots as
//! they arrive, and wires Ctrl-C and the stream timeout to cancellation.

pub mod bootstrap;
pub mod cli_args;
pub mod cli_types;
pub mod commands;
pub mod render;

pub use bootstrap::init_tracing;
pub use cli_args::{Cli, CliCommand, ExecutionCommand, HistoryCommand};
pub use cli_types::*;
pub use commands::{run_cli, run_history};
