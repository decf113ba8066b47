use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EncodingProfile, NegotiationState, PeerId, QualityMode, ResolutionTier};

/// Admission progress of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    Active,
    Closed,
}

impl ApprovalState {
    /// Approved peers, whether or not media has been offered yet.
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Approved | Self::Active)
    }
}

/// Everything the server knows about one watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub nickname: String,
    pub approval: ApprovalState,
    pub negotiation: NegotiationState,
    pub last_latency_ms: Option<u64>,
    pub encoding: EncodingProfile,
    pub quality_mode: QualityMode,
    pub resolution_tier: ResolutionTier,
    /// A probe went out and has not been echoed yet.
    #[serde(skip)]
    pub probe_outstanding: bool,
    pub missed_probes: u32,
    pub joined_at: DateTime<Utc>,
}

impl PeerRecord {
    #[must_use]
    pub fn new(peer_id: PeerId, nickname: impl Into<String>, joined_at: DateTime<Utc>) -> Self {
        Self {
            peer_id,
            nickname: nickname.into(),
            approval: ApprovalState::Pending,
            negotiation: NegotiationState::Idle,
            last_latency_ms: None,
            encoding: EncodingProfile::default(),
            quality_mode: QualityMode::Auto,
            resolution_tier: ResolutionTier::Full,
            probe_outstanding: false,
            missed_probes: 0,
            joined_at,
        }
    }

    /// Peers the adaptive loop should steer: media flowing, not pinned.
    #[must_use]
    pub fn is_auto_controlled(&self) -> bool {
        self.approval == ApprovalState::Active && self.quality_mode == QualityMode::Auto
    }
}
