//! CLI argument types for the `muxgate` binary.
//!
//! Defined separately from `main.rs` so tests can construct them directly.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// muxgate: stdio MCP gateway multiplexing tool calls across supervised
/// backend MCP servers.
#[derive(Parser, Debug)]
#[command(name = "muxgate", version)]
pub struct Cli {
    /// Configuration file path.
    #[arg(long)]
    pub config: PathBuf,

    /// Logging verbosity (RUST_LOG overrides this when set).
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

/// Log verbosity levels, mapped onto a tracing filter directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The tracing filter directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
