//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Config read when `--config` is not given, if present.
pub const DEFAULT_CONFIG_PATH: &str = "etc/flowmeter.toml";

#[derive(Parser, Debug)]
#[command(name = "flowmeter", version, about = "Mass flowmeter acquisition CLI")]
pub struct Cli {
    /// Path to config TOML; defaults to etc/flowmeter.toml when it exists
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit samples, summary and errors as JSON lines
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
    /// List serial ports
    Ports,
    /// Acquire readings until Ctrl-C or the duration elapses
    Record {
        /// Serial port (overrides serial.port)
        #[arg(long, value_name = "NAME")]
        port: Option<String>,
        /// Line speed (overrides serial.baud_rate)
        #[arg(long, value_name = "BAUD")]
        baud: Option<u32>,
        /// Stop after this many seconds
        #[arg(long = "duration-s", value_name = "SECS")]
        duration_s: Option<f64>,
        /// Export the session to this CSV file on stop
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
        /// Use the built-in simulated scale instead of a serial port
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
        /// Reading period of the simulated scale
        #[arg(long = "sim-period-ms", value_name = "MS", default_value_t = 100)]
        sim_period_ms: u64,
    },
    /// Validate the config and run a short simulated handshake
    SelfCheck,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn record_flags_parse() {
        let cli = Cli::try_parse_from([
            "flowmeter",
            "--json",
            "record",
            "--sim",
            "--duration-s",
            "0.5",
            "--csv",
            "out.csv",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.cmd {
            Commands::Record {
                sim,
                duration_s,
                csv,
                sim_period_ms,
                ..
            } => {
                assert!(sim);
                assert_eq!(duration_s, Some(0.5));
                assert_eq!(csv, Some(PathBuf::from("out.csv")));
                assert_eq!(sim_period_ms, 100);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
