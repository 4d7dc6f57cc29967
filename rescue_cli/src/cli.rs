//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Config path used when `--config` is not given; missing is not an error.
pub const DEFAULT_CONFIG: &str = "etc/rescue_config.toml";

#[derive(Parser, Debug)]
#[command(name = "rescue", version, about = "Seizure rescue dosing monitor")]
pub struct Cli {
    /// Path to config TOML (typed); defaults to etc/rescue_config.toml when present
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Protocol import file (JSON object or array); overrides [protocols].file
    #[arg(long, value_name = "FILE")]
    pub protocols: Option<PathBuf>,

    /// Print events and logs as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run detection and the engine until Ctrl-C, `quit`, or --for-secs elapses
    Monitor {
        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        for_secs: Option<u64>,
        /// Divide all protocol and detection delays by this factor
        #[arg(long, value_name = "FACTOR")]
        speedup: Option<f64>,
        /// Start with auto-mode off (detections are logged, nothing starts)
        #[arg(long, action = ArgAction::SetTrue)]
        no_auto: bool,
        /// Override detection.interval_ms
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
        /// Override detection.probability
        #[arg(long, value_name = "P")]
        probability: Option<f64>,
        /// Seed the simulated detector
        #[arg(long, value_name = "SEED")]
        seed: Option<u64>,
        /// Do not read override commands from stdin
        #[arg(long, action = ArgAction::SetTrue)]
        no_stdin: bool,
    },
    /// Run one protocol to completion and exit
    Start {
        /// Protocol id
        #[arg(long)]
        protocol: u32,
        /// Divide all protocol delays by this factor
        #[arg(long, value_name = "FACTOR")]
        speedup: Option<f64>,
    },
    /// Inspect protocols
    Protocols {
        #[command(subcommand)]
        cmd: ProtocolsCmd,
    },
    /// Quick health check (config, protocols, timer backend)
    SelfCheck,
}

#[derive(Subcommand, Debug)]
pub enum ProtocolsCmd {
    /// List registered protocols
    List,
    /// Validate an import file without running anything
    Validate {
        /// JSON object or array of protocol objects
        file: PathBuf,
    },
}
