//! Session-wide statistics for the broadcaster's dashboard.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use playtogether_core::models::{AggregateStats, PeerId, StatsRecord};
use std::collections::HashMap;
use tracing::debug;

use crate::engine::Result;
use crate::stats::{fraction_lost_to_percent, NetworkSample};

/// Sums per-peer transport reports into one [`AggregateStats`] per tick and
/// keeps the most recent result.
#[derive(Default)]
pub struct StatsAggregator {
    latest: RwLock<AggregateStats>,
}

impl StatsAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one tick of reads. A failed read counts as unreadable and adds nothing.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn aggregate(
        &self,
        reads: &[(PeerId, Result<Vec<StatsRecord>>)],
        active_since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AggregateStats {
        let mut stats = AggregateStats {
            connected_peers: reads.len(),
            streaming_secs: active_since
                .map_or(0, |since| (now - since).num_seconds().max(0) as u64),
            ..AggregateStats::default()
        };

        let (mut loss_sum, mut loss_count) = (0.0, 0usize);
        let (mut rtt_sum, mut rtt_count) = (0.0, 0usize);

        for (peer_id, read) in reads {
            let records = match read {
                Ok(records) => records,
                Err(e) => {
                    debug!(peer_id = %peer_id, error = %e, "Statistics unavailable for peer");
                    stats.unreadable_peers += 1;
                    continue;
                }
            };

            for record in records {
                match record.kind.as_str() {
                    "candidate-pair" => {
                        add(&mut stats.candidate_pair_bytes_sent, record, "bytesSent");
                        add(&mut stats.candidate_pair_packets_sent, record, "packetsSent");
                        stats.candidate_pair_reports = stats.candidate_pair_reports.saturating_add(1);
                    }
                    "outbound-rtp" if !record.flag("isRemote") => {
                        add(&mut stats.outbound_rtp_bytes_sent, record, "bytesSent");
                    }
                    "transport" => {
                        add(&mut stats.transport_bytes_sent, record, "bytesSent");
                        add(&mut stats.transport_bytes_received, record, "bytesReceived");
                    }
                    "remote-inbound-rtp" => {
                        loss_sum += fraction_lost_to_percent(record.number("fractionLost"));
                        loss_count += 1;
                        if record.fields.contains_key("roundTripTime") {
                            rtt_sum += record.number("roundTripTime");
                            rtt_count += 1;
                        }
                    }
                    _ => {}
                }
            }
        }

        if loss_count > 0 {
            stats.packet_loss_percent = loss_sum / loss_count as f64;
        }
        if rtt_count > 0 {
            stats.avg_rtt_secs = rtt_sum / rtt_count as f64;
        }

        *self.latest.write() = stats.clone();
        stats
    }

    /// Per-peer link conditions for the controller, skipping unreadable peers.
    #[must_use]
    pub fn samples(reads: &[(PeerId, Result<Vec<StatsRecord>>)]) -> HashMap<PeerId, NetworkSample> {
        reads
            .iter()
            .filter_map(|(peer_id, read)| {
                let records = read.as_ref().ok()?;
                NetworkSample::from_records(records).map(|sample| (peer_id.clone(), sample))
            })
            .collect()
    }

    #[must_use]
    pub fn latest(&self) -> AggregateStats {
        self.latest.read().clone()
    }
}

/// Counters are reported by the broadcaster and may be arbitrarily large;
/// totals pin at `u64::MAX` instead of wrapping.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn add(total: &mut u64, record: &StatsRecord, field: &str) {
    *total = total.saturating_add(record.number(field) as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use chrono::{Duration, TimeZone};

    fn peer_report(bytes: u64, fraction_lost: u64, rtt: f64) -> Vec<StatsRecord> {
        vec![
            StatsRecord::new("candidate-pair")
                .with("bytesSent", bytes)
                .with("packetsSent", 10),
            StatsRecord::new("outbound-rtp").with("bytesSent", bytes),
            StatsRecord::new("outbound-rtp")
                .with("bytesSent", 999)
                .with("isRemote", true),
            StatsRecord::new("transport")
                .with("bytesSent", bytes)
                .with("bytesReceived", 100),
            StatsRecord::new("remote-inbound-rtp")
                .with("fractionLost", fraction_lost)
                .with("roundTripTime", rtt),
        ]
    }

    #[test]
    fn test_sums_and_averages_over_peers() {
        let aggregator = StatsAggregator::new();
        let start = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let reads = vec![
            (PeerId::from("a"), Ok(peer_report(1000, 0, 0.1))),
            (PeerId::from("b"), Ok(peer_report(3000, 128, 0.3))),
        ];

        let stats = aggregator.aggregate(&reads, Some(start), start + Duration::seconds(90));

        assert_eq!(stats.connected_peers, 2);
        assert_eq!(stats.candidate_pair_bytes_sent, 4000);
        assert_eq!(stats.candidate_pair_packets_sent, 20);
        assert_eq!(stats.candidate_pair_reports, 2);
        assert_eq!(stats.outbound_rtp_bytes_sent, 4000);
        assert_eq!(stats.transport_bytes_sent, 4000);
        assert_eq!(stats.transport_bytes_received, 200);
        assert!((stats.packet_loss_percent - 25.0).abs() < 1e-9);
        assert!((stats.avg_rtt_secs - 0.2).abs() < 1e-9);
        assert_eq!(stats.streaming_secs, 90);
        assert_eq!(aggregator.latest(), stats);
    }

    #[test]
    fn test_unreadable_peer_contributes_nothing() {
        let aggregator = StatsAggregator::new();
        let reads = vec![
            (PeerId::from("a"), Ok(peer_report(500, 0, 0.1))),
            (PeerId::from("gone"), Err(EngineError::PeerClosed(PeerId::from("gone")))),
        ];

        let stats = aggregator.aggregate(&reads, None, Utc::now());
        assert_eq!(stats.unreadable_peers, 1);
        assert_eq!(stats.candidate_pair_bytes_sent, 500);
        assert_eq!(stats.streaming_secs, 0);
        assert_eq!(StatsAggregator::samples(&reads).len(), 1);
    }

    #[test]
    fn test_no_feedback_leaves_averages_at_zero() {
        let aggregator = StatsAggregator::new();
        let reads = vec![(PeerId::from("a"), Ok(vec![StatsRecord::new("transport")]))];

        let stats = aggregator.aggregate(&reads, None, Utc::now());
        assert!(stats.packet_loss_percent.abs() < f64::EPSILON);
        assert!(stats.avg_rtt_secs.abs() < f64::EPSILON);
    }

    #[test]
    fn test_huge_counters_saturate() {
        let aggregator = StatsAggregator::new();
        let huge = || {
            StatsRecord::new("transport")
                .with("bytesSent", 1e20)
                .with("bytesReceived", u64::MAX)
        };
        let reads = vec![
            (PeerId::from("a"), Ok(vec![huge(), huge()])),
            (PeerId::from("b"), Ok(vec![StatsRecord::new("candidate-pair").with("bytesSent", -5.0)])),
        ];

        let stats = aggregator.aggregate(&reads, None, Utc::now());
        assert_eq!(stats.transport_bytes_sent, u64::MAX);
        assert_eq!(stats.transport_bytes_received, u64::MAX);
        assert_eq!(stats.candidate_pair_bytes_sent, 0);
    }
}
