//! Application settings and configuration

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use feed_common::data::{MAX_DEPTH_ROWS, MIN_DEPTH_ROWS};

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Vendor session endpoint
    #[serde(default)]
    pub session: SessionSettings,
    /// Subscription policy
    #[serde(default)]
    pub subscription: SubscriptionSettings,
    /// Receipt/staleness timeouts
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// Reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Venue fallback scanning
    #[serde(default)]
    pub fallback: FallbackSettings,
    /// Depth eligibility cool-off
    #[serde(default)]
    pub eligibility: EligibilitySettings,
    /// Built-in static universe
    #[serde(default)]
    pub universe: UniverseSettings,
}

/// Vendor session endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Gateway host
    #[serde(default = "default_host")]
    pub host: String,
    /// Gateway port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client identifier for the wire session
    #[serde(default = "default_client_id")]
    pub client_id: i32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4002
}

fn default_client_id() -> i32 {
    1
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
        }
    }
}

/// Subscription policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Ladder rows per side requested on depth channels
    #[serde(default = "default_depth_rows")]
    pub depth_rows: usize,
    /// Hard cap on concurrent tick-by-tick channels
    #[serde(default = "default_tick_ceiling")]
    pub tick_ceiling: usize,
    /// Seconds between universe reconciliation passes
    #[serde(default = "default_universe_refresh_secs")]
    pub universe_refresh_secs: u64,
    /// Venue tape/tick channels open against first; smart routing when unset
    #[serde(default)]
    pub primary_venue: Option<String>,
    /// Outbound subscribe-request pacing (requests per second)
    #[serde(default = "default_subscribe_rate")]
    pub subscribe_rate_per_sec: u32,
    /// Bounded trade-tape capacity per book
    #[serde(default = "default_tape_capacity")]
    pub tape_capacity: usize,
}

fn default_depth_rows() -> usize {
    10
}

fn default_tick_ceiling() -> usize {
    6
}

fn default_universe_refresh_secs() -> u64 {
    300
}

fn default_subscribe_rate() -> u32 {
    40
}

fn default_tape_capacity() -> usize {
    256
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            depth_rows: default_depth_rows(),
            tick_ceiling: default_tick_ceiling(),
            universe_refresh_secs: default_universe_refresh_secs(),
            primary_venue: None,
            subscribe_rate_per_sec: default_subscribe_rate(),
            tape_capacity: default_tape_capacity(),
        }
    }
}

impl SubscriptionSettings {
    /// Depth rows clamped to the vendor-supported range
    pub fn depth_rows(&self) -> usize {
        self.depth_rows.clamp(MIN_DEPTH_ROWS, MAX_DEPTH_ROWS)
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.universe_refresh_secs.max(1))
    }
}

/// Receipt and staleness timeout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Silence window per channel before venue fallback (milliseconds)
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
    /// Book staleness threshold for validity checks (milliseconds)
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
}

fn default_receipt_timeout_ms() -> u64 {
    15_000
}

fn default_staleness_ms() -> u64 {
    15_000
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            receipt_timeout_ms: default_receipt_timeout_ms(),
            staleness_ms: default_staleness_ms(),
        }
    }
}

impl TimeoutSettings {
    pub fn receipt_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.receipt_timeout_ms as i64)
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.staleness_ms as i64)
    }
}

/// Reconnect policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Attempts before the supervisor reports failure
    #[serde(default = "default_reconnect_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in seconds; doubles per attempt
    #[serde(default = "default_reconnect_base_delay")]
    pub base_delay_secs: u64,
    /// Backoff ceiling in seconds
    #[serde(default = "default_reconnect_max_delay")]
    pub max_delay_secs: u64,
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay() -> u64 {
    2
}

fn default_reconnect_max_delay() -> u64 {
    60
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_max_attempts(),
            base_delay_secs: default_reconnect_base_delay(),
            max_delay_secs: default_reconnect_max_delay(),
        }
    }
}

impl ReconnectSettings {
    pub fn base_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.base_delay_secs)
    }

    pub fn max_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.max_delay_secs)
    }
}

/// Venue fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSettings {
    /// Seconds between fallback scans
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_scan_interval_secs() -> u64 {
    5
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

impl FallbackSettings {
    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scan_interval_secs.max(1))
    }
}

/// Depth eligibility settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilitySettings {
    /// Seconds an ineligible marking suppresses depth attempts
    #[serde(default = "default_cooloff_secs")]
    pub cooloff_secs: u64,
}

fn default_cooloff_secs() -> u64 {
    3_600
}

impl Default for EligibilitySettings {
    fn default() -> Self {
        Self {
            cooloff_secs: default_cooloff_secs(),
        }
    }
}

impl EligibilitySettings {
    pub fn cooloff(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooloff_secs as i64)
    }
}

/// Built-in static universe settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniverseSettings {
    /// Prioritized symbols, most-preferred first
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("FEED_MANAGER")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            // Add environment-specific configuration
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Add local overrides (not checked into git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Add environment variables (e.g., FEED_MANAGER__SESSION__HOST)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Get the configuration directory path
    fn config_dir() -> String {
        std::env::var("FEED_MANAGER_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.session.port, 4002);
        assert_eq!(settings.subscription.tick_ceiling, 6);
        assert_eq!(settings.subscription.depth_rows(), 10);
        assert_eq!(settings.timeouts.receipt_timeout_ms, 15_000);
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.fallback.scan_interval_secs, 5);
        assert_eq!(settings.eligibility.cooloff_secs, 3_600);
    }

    #[test]
    fn test_depth_rows_clamped() {
        let mut settings = Settings::default();
        settings.subscription.depth_rows = 50;
        assert_eq!(settings.subscription.depth_rows(), 10);
        settings.subscription.depth_rows = 0;
        assert_eq!(settings.subscription.depth_rows(), 1);
    }

    #[test]
    fn test_duration_accessors() {
        let settings = Settings::default();
        assert_eq!(
            settings.subscription.refresh_interval(),
            std::time::Duration::from_secs(300)
        );
        assert_eq!(
            settings.timeouts.staleness(),
            chrono::Duration::seconds(15)
        );
        assert_eq!(
            settings.reconnect.base_delay(),
            std::time::Duration::from_secs(2)
        );
    }
}
