#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the flowmeter.
//!
//! `Config` and its sections are deserialized from TOML and validated. Every
//! section has defaults so an empty file is a valid config; the CLI layers
//! its flags on top.
use serde::Deserialize;

/// Default line speed of the scale.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Serial {
    /// Port to open, e.g. "/dev/ttyUSB0" or "COM3". When absent the CLI
    /// picks the only available port, if exactly one exists.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Max wait for one line (ms). Also accepts alias "read_ms".
    #[serde(alias = "read_ms")]
    pub read_timeout_ms: u64,
    /// Max wait for one write to drain (ms). Also accepts alias "write_ms".
    #[serde(alias = "write_ms")]
    pub write_timeout_ms: u64,
}

impl Default for Serial {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 2000,
            write_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Handshake {
    /// Probes sent before giving up on the `MJ` reply
    pub max_probes: u32,
    /// Minimum spacing between two probes
    pub probe_interval_ms: u64,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            max_probes: 10,
            probe_interval_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Chart {
    /// Look-back margin subtracted from the first flowing sample for auto-scroll
    pub offset_lookback_ms: u64,
}

impl Default for Chart {
    fn default() -> Self {
        Self {
            offset_lookback_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub serial: Serial,
    pub handshake: Handshake,
    pub chart: Chart,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
    cfg.validate()?;
    Ok(cfg)
}

const ROTATIONS: [&str; 3] = ["never", "daily", "hourly"];
const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Serial
        if let Some(port) = &self.serial.port
            && port.trim().is_empty()
        {
            eyre::bail!("serial.port must not be empty when set");
        }
        if self.serial.baud_rate == 0 {
            eyre::bail!("serial.baud_rate must be > 0");
        }
        if self.serial.read_timeout_ms == 0 {
            eyre::bail!("serial.read_timeout_ms must be >= 1");
        }
        if self.serial.read_timeout_ms > 60_000 {
            eyre::bail!("serial.read_timeout_ms is unreasonably large (>60s)");
        }
        if self.serial.write_timeout_ms == 0 {
            eyre::bail!("serial.write_timeout_ms must be >= 1");
        }
        if self.serial.write_timeout_ms > 60_000 {
            eyre::bail!("serial.write_timeout_ms is unreasonably large (>60s)");
        }

        // Handshake
        if self.handshake.max_probes == 0 {
            eyre::bail!("handshake.max_probes must be >= 1");
        }
        if self.handshake.max_probes > 1000 {
            eyre::bail!("handshake.max_probes is unreasonably large (>1000)");
        }
        if self.handshake.probe_interval_ms == 0 {
            eyre::bail!("handshake.probe_interval_ms must be >= 1");
        }

        // Chart
        if self.chart.offset_lookback_ms > 60 * 60 * 1000 {
            eyre::bail!("chart.offset_lookback_ms is unreasonably large (>1h)");
        }

        // Logging
        if let Some(rotation) = &self.logging.rotation
            && !ROTATIONS.contains(&rotation.to_ascii_lowercase().as_str())
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got {rotation}");
        }
        if let Some(level) = &self.logging.level
            && !LEVELS.contains(&level.to_ascii_lowercase().as_str())
        {
            eyre::bail!("logging.level must be one of error|warn|info|debug|trace, got {level}");
        }

        Ok(())
    }
}
