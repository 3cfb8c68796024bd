//! Command-line argument parsing

use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;

/// Which pipelines this process runs
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    All,
    Collector,
    Processor,
}

impl Mode {
    pub fn runs_collector(self) -> bool {
        matches!(self, Mode::All | Mode::Collector)
    }

    pub fn runs_processor(self) -> bool {
        matches!(self, Mode::All | Mode::Processor)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::All => "all",
            Mode::Collector => "collector",
            Mode::Processor => "processor",
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "docpipe-server",
    about = "docpipe document pipelines",
    version,
    long_about = "Collects documents from configured datasources and enriches \
                  pending documents with embeddings until interrupted."
)]
pub struct Args {
    /// Configuration file; DOCPIPE__* environment variables override it
    #[arg(short, long, env = "DOCPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Pipelines to run
    #[arg(short, long, env = "DOCPIPE_MODE", value_enum, default_value_t = Mode::All)]
    pub mode: Mode,

    /// Do not apply pending schema migrations on startup
    #[arg(long, env = "DOCPIPE_SKIP_MIGRATIONS")]
    pub skip_migrations: bool,

    /// Revert schema migrations newer than VERSION, then exit
    #[arg(long, value_name = "VERSION", conflicts_with = "skip_migrations")]
    pub rollback_to: Option<i64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}
