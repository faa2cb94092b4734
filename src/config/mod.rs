use crate::geo::Coordinate;
use crate::mission::TransitionPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

pub use crate::snapshot::config::SnapshotConfig;

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "DISPATCH_CONFIG";

/// Complete dispatch engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Assignment and lifecycle rules
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    /// Average agent speed used for ETAs (km/h)
    #[serde(default = "default_average_speed")]
    pub average_speed_kmh: f64,
    #[serde(default)]
    pub transition_policy: TransitionPolicy,
    /// Unverified agents cannot claim when set
    #[serde(default = "default_require_verified")]
    pub require_verified_agents: bool,
    /// Radius used to flag nearby requests when the caller gives none
    #[serde(default = "default_radius")]
    pub default_radius_km: f64,
}

fn default_average_speed() -> f64 {
    crate::geo::DEFAULT_SPEED_KMH
}

fn default_require_verified() -> bool {
    true
}

fn default_radius() -> f64 {
    10.0
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            average_speed_kmh: default_average_speed(),
            transition_policy: TransitionPolicy::default(),
            require_verified_agents: default_require_verified(),
            default_radius_km: default_radius(),
        }
    }
}

/// Location tracking loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_sample_timeout_seconds")]
    pub sample_timeout_seconds: u64,
    /// Reported when the device has no fresh reading
    #[serde(default)]
    pub fallback_position: Option<Coordinate>,
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_sample_timeout_seconds() -> u64 {
    10
}

impl TrackingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_secs(self.sample_timeout_seconds.max(1))
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            sample_timeout_seconds: default_sample_timeout_seconds(),
            fallback_position: None,
        }
    }
}

/// Event fan-out and notification bookkeeping
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Per-subscriber buffer before a slow subscriber lags
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// SQLite file for notification rows (":memory:" for ephemeral)
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_database_path() -> String {
    "dispatch-notifications.db".to_string()
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            database_path: default_database_path(),
        }
    }
}

/// Reverse geocoding (address lookup for new requests)
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_geocoding_url")]
    pub base_url: String,
    #[serde(default = "default_geocoding_timeout")]
    pub timeout_seconds: u64,
}

fn default_geocoding_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_geocoding_timeout() -> u64 {
    5
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_geocoding_url(),
            timeout_seconds: default_geocoding_timeout(),
        }
    }
}

/// Recovery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_auto_recover")]
    pub auto_recover: bool,
}

fn default_auto_recover() -> bool {
    true
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_recover: default_auto_recover(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<DispatchConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: DispatchConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

/// Load from the file named by `DISPATCH_CONFIG`, or defaults when unset
pub fn load_from_env() -> Result<DispatchConfig> {
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) => load_config(&path),
        Err(_) => Ok(DispatchConfig::default()),
    }
}
