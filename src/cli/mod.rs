//! CLI layer.
//!
//! Provides the command-line interface using clap; the only command is
//! `serve`, which resolves [`crate::config::Config`] and starts the HTTP
//! server (§2a, §6).

pub mod commands;
pub mod parser;

pub use commands::execute;
pub use parser::{Cli, Commands};
