use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use crate::errors::{AppError, AppResult};
use crate::models::StreamTarget;
use defaults::*;

/// Top-level configuration loaded from the TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local interface address used for multicast reception
    #[serde(default)]
    pub interface: String,
    /// Port for the Prometheus exposition endpoint
    #[serde(default)]
    pub metrics_port: u32,
    #[serde(default = "default_metrics_host")]
    pub metrics_host: String,
    /// Duration of a one-shot `probe` analyzer run
    #[serde(default, with = "duration_serde::duration")]
    pub timeout: Duration,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// One monitored multicast feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamConfig {
    /// Multicast address and port, e.g. `233.198.134.1:3333`
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Tunables of the per-feed supervision engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_analyzer_command")]
    pub analyzer_command: String,
    /// First restart delay after the analyzer exits
    #[serde(default = "default_restart_delay", with = "duration_serde::duration")]
    pub restart_delay: Duration,
    /// Cap for the exponential restart backoff
    #[serde(default = "default_max_restart_delay", with = "duration_serde::duration")]
    pub max_restart_delay: Duration,
    /// How long an interrupted analyzer may take before it is killed
    #[serde(default = "default_stop_grace_period", with = "duration_serde::duration")]
    pub stop_grace_period: Duration,
    #[serde(default = "default_watchdog_interval", with = "duration_serde::duration")]
    pub watchdog_interval: Duration,
    /// Silence after which the watchdog reports the feed offline
    #[serde(default = "default_stale_after", with = "duration_serde::duration")]
    pub stale_after: Duration,
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    /// Number of report cycles handed to the parser, 0 for the whole buffer
    #[serde(default = "default_report_window_cycles")]
    pub report_window_cycles: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_metrics_host() -> String {
    DEFAULT_METRICS_HOST.to_string()
}

fn default_analyzer_command() -> String {
    DEFAULT_ANALYZER_COMMAND.to_string()
}

fn default_restart_delay() -> Duration {
    DEFAULT_RESTART_DELAY
}

fn default_max_restart_delay() -> Duration {
    DEFAULT_MAX_RESTART_DELAY
}

fn default_stop_grace_period() -> Duration {
    DEFAULT_STOP_GRACE_PERIOD
}

fn default_watchdog_interval() -> Duration {
    DEFAULT_WATCHDOG_INTERVAL
}

fn default_stale_after() -> Duration {
    DEFAULT_STALE_AFTER
}

fn default_max_buffer_bytes() -> usize {
    DEFAULT_MAX_BUFFER_BYTES
}

fn default_report_window_cycles() -> usize {
    DEFAULT_REPORT_WINDOW_CYCLES
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            analyzer_command: default_analyzer_command(),
            restart_delay: DEFAULT_RESTART_DELAY,
            max_restart_delay: DEFAULT_MAX_RESTART_DELAY,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            report_window_cycles: DEFAULT_REPORT_WINDOW_CYCLES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.analyzer_command.trim().is_empty() {
            return Err(AppError::configuration("supervisor.analyzer_command must not be empty"));
        }

        let durations = [
            ("restart_delay", self.restart_delay),
            ("max_restart_delay", self.max_restart_delay),
            ("stop_grace_period", self.stop_grace_period),
            ("watchdog_interval", self.watchdog_interval),
            ("stale_after", self.stale_after),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(AppError::configuration(format!(
                    "supervisor.{name} must be greater than zero"
                )));
            }
        }

        if self.max_restart_delay < self.restart_delay {
            return Err(AppError::configuration(format!(
                "supervisor.max_restart_delay ({}) is shorter than restart_delay ({})",
                humantime::format_duration(self.max_restart_delay),
                humantime::format_duration(self.restart_delay)
            )));
        }

        if self.max_buffer_bytes == 0 {
            return Err(AppError::configuration("supervisor.max_buffer_bytes must be greater than zero"));
        }

        if self.channel_capacity == 0 {
            return Err(AppError::configuration("supervisor.channel_capacity must be greater than zero"));
        }

        Ok(())
    }
}

impl Config {
    /// Load and validate the configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let mut config = Self::read_file(path)?;
        config.validate()?;

        info!(
            "Configuration loaded from {}: {} streams",
            path.display(),
            config.stream_count()
        );
        Ok(config)
    }

    /// Read and parse the file without validating, so overrides can be
    /// applied first
    pub fn read_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::configuration(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse without validating
    pub fn from_toml_str(contents: &str) -> AppResult<Self> {
        toml::from_str(contents)
            .map_err(|e| AppError::configuration(format!("failed to parse config: {e}")))
    }

    /// Check required fields and ranges, filling the command timeout default
    pub fn validate(&mut self) -> AppResult<()> {
        if self.interface.trim().is_empty() {
            return Err(AppError::configuration("interface is required"));
        }

        if self.metrics_port == 0 || self.metrics_port > u32::from(u16::MAX) {
            return Err(AppError::configuration(format!(
                "invalid metrics_port: {} (must be 1-65535)",
                self.metrics_port
            )));
        }

        if self.timeout.is_zero() {
            self.timeout = DEFAULT_COMMAND_TIMEOUT;
        }

        if self.streams.is_empty() {
            return Err(AppError::configuration("no streams configured"));
        }

        let mut seen = HashSet::new();
        for (i, stream) in self.streams.iter().enumerate() {
            if stream.url.trim().is_empty() {
                return Err(AppError::configuration(format!("stream {i}: url is required")));
            }
            if stream.description.trim().is_empty() {
                return Err(AppError::configuration(format!(
                    "stream {i}: description is required"
                )));
            }
            if !seen.insert(stream.url.as_str()) {
                return Err(AppError::configuration(format!(
                    "stream {i}: duplicate url {}",
                    stream.url
                )));
            }
        }

        self.supervisor.validate()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Socket address of the exposition server
    pub fn metrics_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.metrics_host, self.metrics_port)
            .parse()
            .map_err(|e| {
                AppError::configuration(format!(
                    "invalid metrics address {}:{}: {e}",
                    self.metrics_host, self.metrics_port
                ))
            })
    }

    /// Bind every configured feed to the receive interface
    pub fn targets(&self) -> Vec<StreamTarget> {
        self.streams
            .iter()
            .map(|s| StreamTarget::new(&s.url, &s.description, &self.interface))
            .collect()
    }

    /// Find the configured feed for an address
    pub fn target_for(&self, url: &str) -> Option<StreamTarget> {
        self.streams
            .iter()
            .find(|s| s.url == url)
            .map(|s| StreamTarget::new(&s.url, &s.description, &self.interface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
interface = "172.22.2.154"
metrics_port = 9090
timeout = "10s"

[[streams]]
url = "233.198.134.1:3333"
description = "Test Stream 1"

[[streams]]
url = "233.198.134.91:3333"
description = "Test Stream 2"
"#;

    #[test]
    fn test_load_sample() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.interface, "172.22.2.154");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.stream_count(), 2);
        assert_eq!(config.streams[0].url, "233.198.134.1:3333");
        assert_eq!(config.streams[1].description, "Test Stream 2");

        // Omitted supervisor section falls back to defaults
        assert_eq!(config.supervisor.analyzer_command, "tsp");
        assert_eq!(config.supervisor.restart_delay, DEFAULT_RESTART_DELAY);
        assert_eq!(config.supervisor.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, SAMPLE.as_bytes()).unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.targets().len(), 2);
        assert_eq!(config.targets()[0].interface, "172.22.2.154");
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = Config::load_from_file("/nonexistent/tsmonitor.toml").unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_default_timeout_applied() {
        let mut config = Config::from_toml_str(
            r#"
interface = "10.0.0.1"
metrics_port = 9090
[[streams]]
url = "239.0.0.1:1234"
description = "x"
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.timeout, DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            ("missing interface", SAMPLE.replace(r#"interface = "172.22.2.154""#, "")),
            ("port zero", SAMPLE.replace("metrics_port = 9090", "metrics_port = 0")),
            ("port too high", SAMPLE.replace("metrics_port = 9090", "metrics_port = 70000")),
            (
                "empty description",
                SAMPLE.replace(r#"description = "Test Stream 1""#, r#"description = """#),
            ),
            (
                "duplicate url",
                SAMPLE.replace("233.198.134.91:3333", "233.198.134.1:3333"),
            ),
        ];

        for (name, text) in cases {
            let mut config = Config::from_toml_str(&text).unwrap();
            assert!(config.validate().is_err(), "{name} should fail validation");
        }
    }

    #[test]
    fn test_no_streams() {
        let mut config = Config::from_toml_str(
            r#"
interface = "10.0.0.1"
metrics_port = 9090
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no streams configured"));
    }

    #[test]
    fn test_supervisor_overrides() {
        let text = format!(
            "{SAMPLE}\n[supervisor]\nrestart_delay = \"1s\"\nmax_restart_delay = \"30s\"\nreport_window_cycles = 0\n"
        );
        let mut config = Config::from_toml_str(&text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.supervisor.restart_delay, Duration::from_secs(1));
        assert_eq!(config.supervisor.max_restart_delay, Duration::from_secs(30));
        assert_eq!(config.supervisor.report_window_cycles, 0);
    }

    #[test]
    fn test_supervisor_backoff_cap_below_delay_rejected() {
        let text = format!(
            "{SAMPLE}\n[supervisor]\nrestart_delay = \"10s\"\nmax_restart_delay = \"1s\"\n"
        );
        let mut config = Config::from_toml_str(&text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metrics_addr() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.metrics_addr().unwrap().port(), 9090);
    }
}
