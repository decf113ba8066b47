use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub relay: RelayConfig,
    pub health: HealthConfig,
    pub quality: QualityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Shared admin credential guarding the broadcaster endpoint.
///
/// When both fields are unset the gate is open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    /// The configured credential pair, if any.
    #[must_use]
    pub fn credential(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Video codec every relayed session description is restricted to, e.g. `H264`.
    pub preferred_codec: Option<String>,
    /// Drop `requestWatch` from peers the broadcaster has not approved.
    pub enforce_approval: bool,
    /// Reconnection delay advertised to clients in the `welcome` frame.
    pub reconnect_delay_ms: u64,
    /// Per-endpoint outbound queue depth; frames beyond it are dropped.
    pub outbound_buffer: usize,
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            preferred_codec: None,
            enforce_approval: true,
            reconnect_delay_ms: 3000,
            outbound_buffer: 256,
            max_message_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub tick_interval_ms: u64,
    pub min_bitrate_bps: u64,
    pub max_bitrate_bps: u64,
    pub initial_bitrate_bps: u64,
    pub decrease_factor: f64,
    pub increase_factor: f64,
    pub rtt_threshold_secs: f64,
    pub loss_threshold_percent: f64,
    /// Reports older than this are treated as unreadable.
    pub max_report_age_ms: u64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            min_bitrate_bps: 500_000,
            max_bitrate_bps: 12_000_000,
            initial_bitrate_bps: 12_000_000,
            decrease_factor: 0.8,
            increase_factor: 1.05,
            rtt_threshold_secs: 0.5,
            loss_threshold_percent: 5.0,
            max_report_age_ms: 3000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and optional config file
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (`PLAYTOGETHER_RELAY__PREFERRED_CODEC`, ...)
    /// 2. Config file (if provided)
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Field names contain underscores, so sections nest on a double one.
        builder = builder.add_source(
            Environment::with_prefix("PLAYTOGETHER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check every section and collect all violations.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }

        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level '{}' is not a valid level", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        match (&self.auth.username, &self.auth.password) {
            (Some(_), None) | (None, Some(_)) => {
                errors.push("auth.username and auth.password must be set together".to_string());
            }
            (Some(user), Some(_)) if user.is_empty() => {
                errors.push("auth.username must not be empty".to_string());
            }
            _ => {}
        }

        if let Some(codec) = &self.relay.preferred_codec {
            if codec.is_empty() || !codec.chars().all(|c| c.is_ascii_alphanumeric()) {
                errors.push(format!("relay.preferred_codec '{codec}' is not a codec name"));
            }
        }
        if self.relay.outbound_buffer == 0 {
            errors.push("relay.outbound_buffer must be at least 1".to_string());
        }
        if self.relay.max_message_bytes < 1024 {
            errors.push("relay.max_message_bytes must be at least 1024".to_string());
        }

        if self.health.probe_interval_ms == 0 {
            errors.push("health.probe_interval_ms must be non-zero".to_string());
        }

        let q = &self.quality;
        if q.tick_interval_ms == 0 {
            errors.push("quality.tick_interval_ms must be non-zero".to_string());
        }
        if q.min_bitrate_bps == 0 || q.min_bitrate_bps > q.max_bitrate_bps {
            errors.push("quality.min_bitrate_bps must be in 1..=max_bitrate_bps".to_string());
        }
        if q.initial_bitrate_bps < q.min_bitrate_bps || q.initial_bitrate_bps > q.max_bitrate_bps {
            errors.push("quality.initial_bitrate_bps must lie between min and max".to_string());
        }
        if !(q.decrease_factor > 0.0 && q.decrease_factor < 1.0) {
            errors.push("quality.decrease_factor must be in (0, 1)".to_string());
        }
        if q.increase_factor <= 1.0 {
            errors.push("quality.increase_factor must be greater than 1".to_string());
        }
        if q.rtt_threshold_secs <= 0.0 || q.loss_threshold_percent <= 0.0 {
            errors.push("quality thresholds must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
