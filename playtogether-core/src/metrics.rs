//! Prometheus metrics for the session core
//!
//! Everything registers into [`REGISTRY`], which the HTTP layer renders on `/metrics`.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, Encoder,
    IntCounterVec, IntGauge, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Signaling frames forwarded, by message type
pub static RELAYED_MESSAGES: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "relay_messages_total",
        "Total number of signaling messages relayed",
        &["kind"],
        REGISTRY.clone()
    )
    .expect("Failed to register RELAYED_MESSAGES")
});

/// Frames that were accepted but had no effect
pub static DROPPED_MESSAGES: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "relay_dropped_messages_total",
        "Total number of inbound or outbound frames dropped",
        &["reason"],
        REGISTRY.clone()
    )
    .expect("Failed to register DROPPED_MESSAGES")
});

/// Join requests and broadcaster decisions
pub static ADMISSION_DECISIONS: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "admission_decisions_total",
        "Total number of admission events",
        &["decision"],
        REGISTRY.clone()
    )
    .expect("Failed to register ADMISSION_DECISIONS")
});

/// Encoder updates issued by the quality controller
pub static QUALITY_ADJUSTMENTS: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "quality_adjustments_total",
        "Total number of encoder parameter adjustments",
        &["direction"],
        REGISTRY.clone()
    )
    .expect("Failed to register QUALITY_ADJUSTMENTS")
});

/// Open relay connections
pub static CONNECTED_ENDPOINTS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "relay_connected_endpoints",
        "Current number of connected relay endpoints",
        REGISTRY.clone()
    )
    .expect("Failed to register CONNECTED_ENDPOINTS")
});

/// Render every registered metric in the Prometheus text format.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}
