//! Peer latency probing
//!
//! Every probe interval each admitted peer gets a timestamped `adminPing`.
//! The echo yields a round trip time that overwrites the peer's last known
//! latency. Nothing here ever evicts a peer: unanswered probes are only counted.

use tracing::{debug, trace};

use super::{Outbox, SessionRegistry};
use crate::models::PeerId;
use crate::protocol::ServerMessage;

/// One completed round trip. Folded into the peer record, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySample {
    pub peer_id: PeerId,
    pub sent_at_ms: i64,
    pub rtt_ms: u64,
}

impl LatencySample {
    #[must_use]
    pub fn new(peer_id: PeerId, sent_at_ms: i64, now_ms: i64) -> Self {
        let rtt_ms = u64::try_from(now_ms.saturating_sub(sent_at_ms)).unwrap_or(0);
        Self {
            peer_id,
            sent_at_ms,
            rtt_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthMonitor;

impl HealthMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Send one probe to every admitted peer.
    pub fn probe(&self, registry: &mut SessionRegistry, now_ms: i64) -> Outbox {
        let mut outbox = Outbox::new();
        for peer_id in registry.peer_ids_where(|r| r.approval.is_admitted()) {
            registry.update(&peer_id, |record| {
                if record.probe_outstanding {
                    record.missed_probes += 1;
                }
                record.probe_outstanding = true;
            });
            outbox.to_peer(
                &peer_id,
                ServerMessage::AdminPing {
                    timestamp: now_ms,
                    peer_id: peer_id.clone(),
                },
            );
        }
        trace!(probes = outbox.len(), "Health probes sent");
        outbox
    }

    /// Fold an echoed probe into the sender's record and show it to the broadcaster.
    ///
    /// `from` is the connection the echo arrived on; an id inside the echo is
    /// never trusted.
    pub fn record_pong(
        &self,
        registry: &mut SessionRegistry,
        from: &PeerId,
        timestamp: i64,
        nickname: Option<&str>,
        now_ms: i64,
    ) -> Outbox {
        let sample = LatencySample::new(from.clone(), timestamp, now_ms);
        let nickname = nickname.map(str::trim).filter(|n| !n.is_empty());

        let mut outbox = Outbox::new();
        let Some(record) = registry.get_mut(from) else {
            debug!(peer_id = %from, "Probe echo from untracked connection ignored");
            return outbox;
        };
        record.last_latency_ms = Some(sample.rtt_ms);
        record.probe_outstanding = false;
        record.missed_probes = 0;
        if let Some(nickname) = nickname {
            record.nickname = nickname.to_string();
        }
        let nickname = record.nickname.clone();
        debug!(peer_id = %from, rtt_ms = sample.rtt_ms, "Probe echoed");

        outbox.to_broadcaster(ServerMessage::AdminPong {
            timestamp: sample.sent_at_ms,
            peer_id: sample.peer_id,
            nickname,
            latency_ms: sample.rtt_ms,
        });
        outbox
    }
}
