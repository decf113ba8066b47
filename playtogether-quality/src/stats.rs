//! Link conditions extracted from raw transport reports.

use playtogether_core::models::StatsRecord;
use serde::Serialize;

const REMOTE_INBOUND_RTP: &str = "remote-inbound-rtp";

/// Convert an 8-bit fixed point loss fraction to a percentage.
///
/// The engine reports `fractionLost` as `lost * 256`, so 128 is half the packets.
#[must_use]
pub fn fraction_lost_to_percent(raw: f64) -> f64 {
    raw / 256.0 * 100.0
}

/// What the remote side says about one peer's link.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSample {
    pub rtt_secs: f64,
    pub loss_percent: f64,
}

impl NetworkSample {
    #[must_use]
    pub const fn new(rtt_secs: f64, loss_percent: f64) -> Self {
        Self {
            rtt_secs,
            loss_percent,
        }
    }

    /// Worst-case conditions over the report's `remote-inbound-rtp` records.
    ///
    /// Video records win when present. `None` when the report has no
    /// receiver feedback at all.
    #[must_use]
    pub fn from_records(records: &[StatsRecord]) -> Option<Self> {
        let remote: Vec<&StatsRecord> = records.iter().filter(|r| r.is(REMOTE_INBOUND_RTP)).collect();
        let video: Vec<&StatsRecord> = remote
            .iter()
            .copied()
            .filter(|r| r.text("kind") == Some("video"))
            .collect();
        let chosen = if video.is_empty() { remote } else { video };
        if chosen.is_empty() {
            return None;
        }

        Some(chosen.iter().fold(Self::default(), |worst, record| Self {
            rtt_secs: worst.rtt_secs.max(record.number("roundTripTime")),
            loss_percent: worst
                .loss_percent
                .max(fraction_lost_to_percent(record.number("fractionLost"))),
        }))
    }
}
