// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::{ExecutionMode, ReportFormat};

/// Command-line arguments for `taskdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskdag",
    version,
    about = "Run a DAG of shell tasks with retries, timeouts and pluggable execution strategies.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job file (TOML).
    ///
    /// Default: `TASKDAG_CONFIG`, or `taskdag.toml` in the current directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Override the execution mode from the job file
    /// (sequential, parallel, adaptive, distributed).
    #[arg(long, value_name = "MODE")]
    pub mode: Option<ExecutionMode>,

    /// Report format printed to stdout when the job finishes.
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub report: ReportFormat,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse and validate, print the strategy and execution plan, run nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
