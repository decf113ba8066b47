//! Session data model: identities, per-peer records and their sub-states.

pub mod id;
pub mod negotiation;
pub mod peer;
pub mod quality;
pub mod session;
pub mod stats;

pub use id::{generate_id, PeerId};
pub use negotiation::{EngineConnectionState, NegotiationEvent, NegotiationState};
pub use peer::{ApprovalState, PeerRecord};
pub use quality::{
    EncodingProfile, EncodingUpdate, ProfileSelection, QualityMode, QualityProfile, ResolutionTier,
    TrackConstraints,
};
pub use session::{
    BroadcasterSession, PendingJoinRequest, VoiceMember, VoiceRoom, VoteEntry, VoteTally,
};
pub use stats::{AggregateStats, StatsRecord};
