/// Configuration default values
///
/// Central location for every default used by the configuration schema and
/// the supervision engine.
use std::time::Duration;

// CLI defaults
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tsmonitor/config.toml";

// Exposition defaults
pub const DEFAULT_METRICS_HOST: &str = "0.0.0.0";

// Analyzer defaults
pub const DEFAULT_ANALYZER_COMMAND: &str = "tsp";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

// Supervisor defaults
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RESTART_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 500 * 1024; // 500KB
pub const DEFAULT_REPORT_WINDOW_CYCLES: usize = 3;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

// Snapshot status
pub const SNAPSHOT_FRESHNESS: Duration = Duration::from_secs(5);
