// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `ffqueue`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ffqueue",
    version,
    about = "Transcode files one at a time through a single ffmpeg engine.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// If omitted, `ffqueue.toml` in the current working directory is used
    /// when present, otherwise built-in defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FFQUEUE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the engine arguments per input, but don't
    /// transcode anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Queue everything first, then run the jobs one by one on request
    /// instead of draining automatically.
    #[arg(long)]
    pub manual: bool,

    /// Directory results are written to.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Engine argument placed between the input and the output file.
    /// Repeat for several arguments. Default: `-codec copy`.
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Files to transcode, in queue order.
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,
}

impl CliArgs {
    /// Engine arguments for every job.
    pub fn job_args(&self) -> Vec<String> {
        if self.args.is_empty() {
            vec!["-codec".to_string(), "copy".to_string()]
        } else {
            self.args.clone()
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
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
