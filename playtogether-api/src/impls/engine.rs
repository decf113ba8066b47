//! Media engine reached through the broadcaster's relay connection
//!
//! The broadcaster's browser owns every peer connection. It pushes each peer's
//! transport report up as `statsReport`, and receives encoder changes back as
//! `applyEncoding` / `applyTrackConstraints` frames.

use async_trait::async_trait;
use dashmap::DashMap;
use playtogether_core::models::{EncodingUpdate, PeerId, StatsRecord, TrackConstraints};
use playtogether_core::protocol::ServerMessage;
use playtogether_core::service::{Envelope, Recipient};
use playtogether_quality::engine::Result;
use playtogether_quality::{EncoderControl, EngineError, StatsReader};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

struct StoredReport {
    received_at: Instant,
    records: Vec<StatsRecord>,
}

pub struct RelayedEngine {
    reports: DashMap<PeerId, StoredReport>,
    commands: mpsc::UnboundedSender<Envelope>,
    max_age: Duration,
}

impl RelayedEngine {
    /// Returns the engine and the stream of frames it wants delivered to the broadcaster.
    #[must_use]
    pub fn new(max_age: Duration) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let engine = Self {
            reports: DashMap::new(),
            commands,
            max_age,
        };
        (engine, rx)
    }

    /// Store the latest report for a peer, replacing the previous one.
    pub fn ingest(&self, peer_id: PeerId, records: Vec<StatsRecord>) {
        debug!(peer_id = %peer_id, records = records.len(), "Statistics report received");
        self.reports.insert(
            peer_id,
            StoredReport {
                received_at: Instant::now(),
                records,
            },
        );
    }

    pub fn forget(&self, peer_id: &PeerId) {
        self.reports.remove(peer_id);
    }

    /// Drop every stored report, e.g. when the broadcaster goes away.
    pub fn clear(&self) {
        self.reports.clear();
    }

    fn command(&self, message: ServerMessage) -> Result<()> {
        self.commands
            .send(Envelope {
                to: Recipient::Broadcaster,
                message,
            })
            .map_err(|_| EngineError::Unavailable("session driver stopped".to_string()))
    }
}

#[async_trait]
impl StatsReader for RelayedEngine {
    async fn read_stats(&self, peer_id: &PeerId) -> Result<Vec<StatsRecord>> {
        let report = self
            .reports
            .get(peer_id)
            .ok_or_else(|| EngineError::NoStats(peer_id.clone()))?;
        if report.received_at.elapsed() > self.max_age {
            return Err(EngineError::StaleStats(peer_id.clone()));
        }
        Ok(report.records.clone())
    }
}

#[async_trait]
impl EncoderControl for RelayedEngine {
    async fn apply_encoding(&self, peer_id: &PeerId, encoding: EncodingUpdate) -> Result<()> {
        self.command(ServerMessage::ApplyEncoding {
            peer_id: peer_id.clone(),
            encoding,
        })
    }

    async fn apply_track_constraints(&self, peer_id: &PeerId, constraints: TrackConstraints) -> Result<()> {
        self.command(ServerMessage::ApplyTrackConstraints {
            peer_id: peer_id.clone(),
            constraints,
        })
    }
}
