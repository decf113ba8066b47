//! Seams to the media engine
//!
//! The engine owns the peer connections; the controller only reads their
//! statistics and asks for new sender parameters. Both calls may complete
//! after the peer is gone, which implementations report as
//! [`EngineError::PeerClosed`].

use async_trait::async_trait;
use playtogether_core::models::{EncodingUpdate, PeerId, StatsRecord, TrackConstraints};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("peer {0} is closed")]
    PeerClosed(PeerId),

    #[error("no statistics for peer {0}")]
    NoStats(PeerId),

    #[error("statistics for peer {0} are stale")]
    StaleStats(PeerId),

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatsReader: Send + Sync {
    /// Latest transport report for the peer's connection.
    async fn read_stats(&self, peer_id: &PeerId) -> Result<Vec<StatsRecord>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EncoderControl: Send + Sync {
    /// Set bitrate and framerate on the peer's video sender, and the downscale when given.
    async fn apply_encoding(&self, peer_id: &PeerId, encoding: EncodingUpdate) -> Result<()>;

    /// Clone the source track, constrain the clone and swap it onto the peer's sender.
    async fn apply_track_constraints(&self, peer_id: &PeerId, constraints: TrackConstraints) -> Result<()>;
}
