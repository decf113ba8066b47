//! Per-peer negotiation state machine
//!
//! The relay observes the offer/answer/candidate traffic of every watcher and
//! folds it through [`NegotiationState::apply`]. Media flow is never observed
//! directly; it is inferred from the connection state the endpoint reports.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NegotiationState {
    #[default]
    Idle,
    WatchRequested,
    OfferSent,
    AnswerSent,
    CandidatesExchanging,
    MediaFlowing,
    Closed,
}

/// Something the relay saw happen to a peer's negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    WatchRequested,
    OfferRelayed,
    AnswerRelayed,
    CandidateRelayed,
    Connected,
    /// Engine reported `failed` or `disconnected`; the endpoint re-requests.
    Failed,
    Closed,
}

impl NegotiationState {
    /// The single transition function.
    ///
    /// Events that make no sense in the current state leave it unchanged.
    /// `Closed` is terminal.
    #[must_use]
    pub const fn apply(self, event: NegotiationEvent) -> Self {
        use NegotiationEvent as E;
        match (self, event) {
            (Self::Closed, _) | (_, E::Closed) => Self::Closed,
            (_, E::WatchRequested) => Self::WatchRequested,
            // Renegotiation may start from any point of an existing session.
            (_, E::OfferRelayed) => Self::OfferSent,
            (Self::OfferSent, E::AnswerRelayed) => Self::AnswerSent,
            (Self::AnswerSent, E::CandidateRelayed) => Self::CandidatesExchanging,
            (Self::OfferSent | Self::AnswerSent | Self::CandidatesExchanging, E::Connected) => {
                Self::MediaFlowing
            }
            (_, E::Failed) => Self::Idle,
            (state, _) => state,
        }
    }

    #[must_use]
    pub const fn is_media_flowing(self) -> bool {
        matches!(self, Self::MediaFlowing)
    }
}

/// Connection state as reported by the endpoint's media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl EngineConnectionState {
    /// The negotiation event this report implies, if any.
    #[must_use]
    pub const fn as_event(self) -> Option<NegotiationEvent> {
        match self {
            Self::Connected => Some(NegotiationEvent::Connected),
            Self::Disconnected | Self::Failed => Some(NegotiationEvent::Failed),
            Self::Closed => Some(NegotiationEvent::Closed),
            Self::New | Self::Connecting => None,
        }
    }
}
