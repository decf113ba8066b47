//! Transport statistics as the media engine reports them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One untyped report record, tagged by kind (`outbound-rtp`, `candidate-pair`, ...).
///
/// Records arrive in no particular order and any numeric field may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StatsRecord {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Numeric field, zero when missing or not a number.
    #[must_use]
    pub fn number(&self, key: &str) -> f64 {
        self.fields.get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.fields.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Dashboard counters summed over every active peer for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub connected_peers: usize,
    pub candidate_pair_bytes_sent: u64,
    pub candidate_pair_packets_sent: u64,
    pub candidate_pair_reports: usize,
    pub outbound_rtp_bytes_sent: u64,
    pub transport_bytes_sent: u64,
    pub transport_bytes_received: u64,
    /// Mean of `remote-inbound-rtp` loss, percent.
    pub packet_loss_percent: f64,
    /// Mean of `remote-inbound-rtp` round trip time, seconds.
    pub avg_rtt_secs: f64,
    pub streaming_secs: u64,
    /// Peers whose statistics could not be read this tick.
    pub unreadable_peers: usize,
}
