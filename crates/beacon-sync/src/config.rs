//! # SDK Configuration
//!
//! Configuration management for the engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BEACON_ENABLE_TRACKING=false                                       │
//! │     BEACON_ENDPOINT=https://staging.example.com/v1/sync                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/beacon-sdk/beacon.toml (Linux)                           │
//! │     ~/Library/Application Support/com.beacon.sdk/beacon.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Whatever the source, [`SdkConfig::validate`] runs last and rejects
//! non-positive timeouts, batch sizes and intervals, and negative retry
//! counts.
//!
//! ## Configuration File Format
//! ```toml
//! enable_tracking = true
//! enable_push_notifications = true
//! request_timeout_secs = 30.0
//! max_retry_attempts = 3
//! engagement_batch_size = 10
//! engagement_batch_interval_secs = 30.0
//! custom_endpoint = "https://sync.example.com/v1/sync"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Backend endpoint used when no custom endpoint is configured.
pub const DEFAULT_ENDPOINT: &str = "https://api.beacon-sdk.io/v1/sync";

fn default_true() -> bool {
    true
}
fn default_request_timeout() -> f64 {
    30.0
}
fn default_max_retry_attempts() -> i32 {
    3
}
fn default_batch_size() -> usize {
    10
}
fn default_batch_interval() -> f64 {
    30.0
}
fn default_engagement_max_attempts() -> u32 {
    2
}
fn default_extension_budget_ms() -> u64 {
    5_000
}

/// Complete engine configuration.
///
/// Numeric fields keep signed/float types so that bad values coming from a
/// config file or the host app reach [`SdkConfig::validate`] instead of
/// failing to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Master switch. When false, pushes succeed without any network call.
    #[serde(default = "default_true")]
    pub enable_tracking: bool,

    /// Include the push token and device type in sync options.
    #[serde(default = "default_true")]
    pub enable_push_notifications: bool,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,

    /// Total attempts for sync requests. 0 behaves like 1.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: i32,

    /// Queue length that triggers an engagement flush.
    #[serde(default = "default_batch_size")]
    pub engagement_batch_size: usize,

    /// Recurring engagement flush interval (seconds).
    #[serde(default = "default_batch_interval")]
    pub engagement_batch_interval_secs: f64,

    /// Overrides [`DEFAULT_ENDPOINT`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_endpoint: Option<String>,

    /// Total attempts per engagement callback call.
    #[serde(default = "default_engagement_max_attempts")]
    pub engagement_max_attempts: u32,

    /// Sent as `X-Api-Key` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Debug-level engine logs.
    #[serde(default)]
    pub verbose_logging: bool,

    /// Wall-clock budget of the notification extension (milliseconds).
    #[serde(default = "default_extension_budget_ms")]
    pub extension_budget_ms: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        SdkConfig {
            enable_tracking: true,
            enable_push_notifications: true,
            request_timeout_secs: default_request_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            engagement_batch_size: default_batch_size(),
            engagement_batch_interval_secs: default_batch_interval(),
            custom_endpoint: None,
            engagement_max_attempts: default_engagement_max_attempts(),
            api_key: None,
            verbose_logging: false,
            extension_budget_ms: default_extension_budget_ms(),
        }
    }
}

impl SdkConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (beacon.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading SDK config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load SDK config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "SDK config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.request_timeout_secs.is_finite() || self.request_timeout_secs <= 0.0 {
            return Err(SyncError::InvalidConfiguration(format!(
                "request_timeout_secs must be greater than 0, got {}",
                self.request_timeout_secs
            )));
        }

        if self.max_retry_attempts < 0 {
            return Err(SyncError::InvalidConfiguration(format!(
                "max_retry_attempts must not be negative, got {}",
                self.max_retry_attempts
            )));
        }

        if self.engagement_batch_size == 0 {
            return Err(SyncError::InvalidConfiguration(
                "engagement_batch_size must be greater than 0".into(),
            ));
        }

        if !self.engagement_batch_interval_secs.is_finite()
            || self.engagement_batch_interval_secs <= 0.0
        {
            return Err(SyncError::InvalidConfiguration(format!(
                "engagement_batch_interval_secs must be greater than 0, got {}",
                self.engagement_batch_interval_secs
            )));
        }

        if let Some(ref endpoint) = self.custom_endpoint {
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                SyncError::InvalidConfiguration(format!("custom_endpoint: {}", e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SyncError::InvalidConfiguration(format!(
                    "custom_endpoint must be http(s), got: {}",
                    endpoint
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<bool>("BEACON_ENABLE_TRACKING") {
            debug!(enable_tracking = v, "Overriding tracking switch from environment");
            self.enable_tracking = v;
        }

        if let Some(v) = env_parse::<bool>("BEACON_ENABLE_PUSH") {
            self.enable_push_notifications = v;
        }

        if let Some(v) = env_parse::<f64>("BEACON_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v;
        }

        if let Some(v) = env_parse::<i32>("BEACON_MAX_RETRY_ATTEMPTS") {
            self.max_retry_attempts = v;
        }

        if let Some(v) = env_parse::<usize>("BEACON_BATCH_SIZE") {
            self.engagement_batch_size = v;
        }

        if let Some(v) = env_parse::<f64>("BEACON_BATCH_INTERVAL_SECS") {
            self.engagement_batch_interval_secs = v;
        }

        if let Ok(endpoint) = std::env::var("BEACON_ENDPOINT") {
            debug!(endpoint = %endpoint, "Overriding endpoint from environment");
            self.custom_endpoint = Some(endpoint);
        }

        if let Ok(key) = std::env::var("BEACON_API_KEY") {
            self.api_key = Some(key);
        }

        if let Some(v) = env_parse::<bool>("BEACON_VERBOSE") {
            self.verbose_logging = v;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "beacon", "sdk")
            .map(|dirs| dirs.config_dir().join("beacon.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Endpoint the coordinator pushes to.
    pub fn endpoint(&self) -> &str {
        self.custom_endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    /// Total attempts for sync pushes.
    pub fn sync_attempts(&self) -> u32 {
        self.max_retry_attempts.max(1) as u32
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs_f64(self.engagement_batch_interval_secs)
    }

    pub fn extension_budget(&self) -> Duration {
        Duration::from_millis(self.extension_budget_ms)
    }
}

/// Reads and parses an environment variable, warning on garbage.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
