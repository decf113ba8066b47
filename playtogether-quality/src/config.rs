use playtogether_core::config::QualityConfig;
use std::time::Duration;

/// Quality controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Floor for the adaptive bitrate
    pub min_bitrate_bps: u64,

    /// Ceiling for the adaptive bitrate
    pub max_bitrate_bps: u64,

    /// Bitrate a newly watched peer starts at
    pub initial_bitrate_bps: u64,

    /// Multiplier applied on congestion
    pub decrease_factor: f64,

    /// Multiplier applied otherwise
    pub increase_factor: f64,

    /// Round trip time above which the link counts as congested
    pub rtt_threshold_secs: f64,

    /// Loss above which the link counts as congested
    pub loss_threshold_percent: f64,

    /// Control loop period
    pub tick_interval: Duration,

    /// Statistics older than this are not acted on
    pub max_report_age: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&QualityConfig::default())
    }
}

impl From<&QualityConfig> for ControllerConfig {
    fn from(config: &QualityConfig) -> Self {
        Self {
            min_bitrate_bps: config.min_bitrate_bps,
            max_bitrate_bps: config.max_bitrate_bps,
            initial_bitrate_bps: config.initial_bitrate_bps,
            decrease_factor: config.decrease_factor,
            increase_factor: config.increase_factor,
            rtt_threshold_secs: config.rtt_threshold_secs,
            loss_threshold_percent: config.loss_threshold_percent,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            max_report_age: Duration::from_millis(config.max_report_age_ms),
        }
    }
}
