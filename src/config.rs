//! Configuration management.
//!
//! Settings load from `config/<name>.toml` (default `config/default.toml`)
//! via the `config` crate and deserialize with serde. Parsing and semantic
//! validation are separate steps: [`Settings::validate`] catches values
//! that parse fine but are logically wrong (port 0, start frequency above
//! stop frequency) before the instrument is ever contacted.

use std::path::Path;
use std::time::Duration;

use config::Config;
use serde::Deserialize;

use crate::error::{AppResult, FmError};
use crate::instrument::field_master::{SweepSetup, TraceNumber};
use crate::instrument::scpi::{DEFAULT_PORT, DEFAULT_SETTLE_MS, DEFAULT_TIMEOUT_MS};
use crate::sweep::SweepOptions;
use crate::validation;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub instrument: InstrumentSettings,
    #[serde(default)]
    pub sweep: SweepSettings,
}

/// The `[instrument]` section: how to reach the analyzer.
#[derive(Debug, Deserialize, Clone)]
pub struct InstrumentSettings {
    /// IP address or hostname of the analyzer.
    pub host: String,

    /// Remote command port (9001 on Anritsu analyzers).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use the built-in simulated instrument instead of hardware.
    #[serde(default)]
    pub mock: bool,

    /// Per-query response timeout in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Settle delay after fire-and-forget commands, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl InstrumentSettings {
    /// Per-query response timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Settle delay after fire-and-forget commands.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// The `[sweep]` section: capture timing plus an optional instrument setup.
#[derive(Debug, Deserialize, Clone)]
pub struct SweepSettings {
    /// How often to poll the sweep counter.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Overall deadline for the first completed sweep.
    #[serde(default = "default_sweep_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Instrument parameters applied by the `setup` command.
    #[serde(default)]
    pub setup: Option<SweepSetup>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            timeout: default_sweep_timeout(),
            setup: None,
        }
    }
}

impl SweepSettings {
    /// Capture options derived from this section.
    pub fn options(&self) -> SweepOptions {
        SweepOptions {
            poll_interval: self.poll_interval,
            timeout: self.timeout,
            poll_trace: TraceNumber::ONE,
            arm_poll_trace: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_sweep_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Settings {
    /// Load `config/<name>` (default `config/default`).
    pub fn new(config_name: Option<&str>) -> AppResult<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path))
            .build()
            .map_err(FmError::Config)?;

        s.try_deserialize().map_err(FmError::Config)
    }

    /// Load settings from an explicit file path.
    pub fn from_path(path: &Path) -> AppResult<Self> {
        let s = Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .build()
            .map_err(FmError::Config)?;

        s.try_deserialize().map_err(FmError::Config)
    }

    /// Semantic validation, run after parsing and before connecting.
    pub fn validate(&self) -> AppResult<()> {
        validation::is_not_empty(&self.log_level)
            .map_err(|e| FmError::Configuration(format!("log_level: {e}")))?;
        validation::is_valid_host(&self.instrument.host)
            .map_err(|e| FmError::Configuration(format!("instrument.host: {e}")))?;
        validation::is_valid_port(self.instrument.port)
            .map_err(|e| FmError::Configuration(format!("instrument.port: {e}")))?;

        if let Some(setup) = &self.sweep.setup {
            validate_setup(setup)?;
        }
        Ok(())
    }
}

/// Check a sweep setup against the instrument's limits.
pub fn validate_setup(setup: &SweepSetup) -> AppResult<()> {
    validation::is_in_range(setup.start_ghz, 0.0..=54.0)
        .map_err(|e| FmError::Configuration(format!("sweep.setup.start_ghz: {e}")))?;
    validation::is_in_range(setup.stop_ghz, 0.0..=54.0)
        .map_err(|e| FmError::Configuration(format!("sweep.setup.stop_ghz: {e}")))?;
    if setup.start_ghz >= setup.stop_ghz {
        return Err(FmError::Configuration(
            "sweep.setup: start frequency must be below stop frequency".to_string(),
        ));
    }
    validation::is_in_range(setup.ref_level_dbm, -150.0..=30.0)
        .map_err(|e| FmError::Configuration(format!("sweep.setup.ref_level_dbm: {e}")))?;
    validation::is_in_range(setup.scale_db_per_div, 0.1..=20.0)
        .map_err(|e| FmError::Configuration(format!("sweep.setup.scale_db_per_div: {e}")))?;
    validation::is_in_range(setup.rbw_hz, 1.0..=20.0e6)
        .map_err(|e| FmError::Configuration(format!("sweep.setup.rbw_hz: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn default_config_file_loads_and_validates() {
        let settings = Settings::new(None).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.instrument.port, 9001);
        assert!(settings.sweep.setup.is_some());
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let file = write_config("[instrument]\nhost = \"192.168.1.17\"\n");
        let settings = Settings::from_path(file.path()).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.instrument.port, DEFAULT_PORT);
        assert!(!settings.instrument.mock);
        assert_eq!(settings.sweep.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.sweep.timeout, Duration::from_secs(30));
        assert!(settings.sweep.setup.is_none());
    }

    #[test]
    fn humantime_durations_parse() {
        let file = write_config(
            "[instrument]\nhost = \"10.0.0.5\"\n[sweep]\npoll_interval = \"250ms\"\ntimeout = \"2m\"\n",
        );
        let settings = Settings::from_path(file.path()).unwrap();

        assert_eq!(settings.sweep.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.sweep.timeout, Duration::from_secs(120));
    }

    #[test]
    fn port_zero_fails_validation() {
        let file = write_config("[instrument]\nhost = \"10.0.0.5\"\nport = 0\n");
        let settings = Settings::from_path(file.path()).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn inverted_span_fails_validation() {
        let file = write_config(
            "[instrument]\nhost = \"10.0.0.5\"\n[sweep.setup]\nstart_ghz = 4.5\nstop_ghz = 2.0\nref_level_dbm = -10.0\nscale_db_per_div = 10.0\nrbw_hz = 30000.0\n",
        );
        let settings = Settings::from_path(file.path()).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn missing_host_fails_to_parse() {
        let file = write_config("[instrument]\nport = 9001\n");
        assert!(Settings::from_path(file.path()).is_err());
    }
}
