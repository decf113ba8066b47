//! Relay wire protocol
//!
//! Every frame is a JSON object tagged by `type`. Inbound frames are parsed
//! into [`ClientMessage`] and validated once here, so handlers only ever see
//! well-formed variants. Signaling payloads stay opaque.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    AggregateStats, EncodingUpdate, EngineConnectionState, PeerId, StatsRecord, TrackConstraints,
    VoiceMember, VoteEntry,
};
use crate::{Error, Result};

const MAX_NICKNAME_CHARS: usize = 32;
const MAX_CHAT_CHARS: usize = 500;
const MAX_TITLE_CHARS: usize = 100;
const MAX_AXES: usize = 8;
const MAX_BUTTONS: usize = 32;

/// Frames an endpoint may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    AnnounceBroadcaster,
    RequestWatch,
    RelayOffer {
        target_id: PeerId,
        payload: Value,
    },
    RelayAnswer {
        target_id: PeerId,
        payload: Value,
    },
    RelayCandidate {
        target_id: PeerId,
        payload: Value,
    },
    JoinRequest {
        #[serde(default)]
        nickname: String,
    },
    JoinDecision {
        peer_id: PeerId,
        approved: bool,
    },
    AdminPong {
        timestamp: i64,
        #[serde(default)]
        peer_id: Option<PeerId>,
        #[serde(default, alias = "nick")]
        nickname: Option<String>,
    },
    DisconnectPeer {
        peer_id: PeerId,
    },
    QualitySelect {
        peer_id: PeerId,
        profile_id: String,
    },
    GameVote {
        title: String,
    },
    ClearVotes,
    ChatMessage {
        #[serde(default)]
        nickname: Option<String>,
        text: String,
    },
    VirtualInputFrame(InputFrame),
    ConnectionState {
        state: EngineConnectionState,
    },
    StatsReport {
        peer_id: PeerId,
        reports: Vec<StatsRecord>,
    },
    VoiceJoin {
        #[serde(default, alias = "nick")]
        nickname: String,
    },
    VoiceLeave,
    VoiceOffer {
        target_id: PeerId,
        payload: Value,
    },
    VoiceAnswer {
        target_id: PeerId,
        payload: Value,
    },
    VoiceCandidate {
        target_id: PeerId,
        payload: Value,
    },
}

/// One controller snapshot from a watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFrame {
    /// `<peerId>-<slot>`; only the slot part is trusted.
    pub input_id: String,
    #[serde(default)]
    pub axes: Vec<f64>,
    #[serde(default)]
    pub buttons: Vec<f64>,
}

impl InputFrame {
    /// The slot suffix of `input_id` (`1`..`4` or `virtual`).
    #[must_use]
    pub fn slot(&self) -> &str {
        self.input_id
            .rsplit_once('-')
            .map_or(self.input_id.as_str(), |(_, slot)| slot)
    }
}

impl ClientMessage {
    /// Parse and validate one inbound text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }

    /// Wire name of the variant, used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AnnounceBroadcaster => "announceBroadcaster",
            Self::RequestWatch => "requestWatch",
            Self::RelayOffer { .. } => "relayOffer",
            Self::RelayAnswer { .. } => "relayAnswer",
            Self::RelayCandidate { .. } => "relayCandidate",
            Self::JoinRequest { .. } => "joinRequest",
            Self::JoinDecision { .. } => "joinDecision",
            Self::AdminPong { .. } => "adminPong",
            Self::DisconnectPeer { .. } => "disconnectPeer",
            Self::QualitySelect { .. } => "qualitySelect",
            Self::GameVote { .. } => "gameVote",
            Self::ClearVotes => "clearVotes",
            Self::ChatMessage { .. } => "chatMessage",
            Self::VirtualInputFrame(_) => "virtualInputFrame",
            Self::ConnectionState { .. } => "connectionState",
            Self::StatsReport { .. } => "statsReport",
            Self::VoiceJoin { .. } => "voiceJoin",
            Self::VoiceLeave => "voiceLeave",
            Self::VoiceOffer { .. } => "voiceOffer",
            Self::VoiceAnswer { .. } => "voiceAnswer",
            Self::VoiceCandidate { .. } => "voiceCandidate",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::JoinRequest { nickname } | Self::VoiceJoin { nickname } => {
                check_len("nickname", nickname, MAX_NICKNAME_CHARS)
            }
            Self::AdminPong {
                nickname: Some(nickname),
                ..
            } => check_len("nickname", nickname, MAX_NICKNAME_CHARS),
            Self::ChatMessage { nickname, text } => {
                if let Some(nickname) = nickname {
                    check_len("nickname", nickname, MAX_NICKNAME_CHARS)?;
                }
                check_non_empty("text", text)?;
                check_len("text", text, MAX_CHAT_CHARS)
            }
            Self::GameVote { title } => {
                check_non_empty("title", title)?;
                check_len("title", title, MAX_TITLE_CHARS)
            }
            Self::VirtualInputFrame(frame) => {
                if frame.axes.len() > MAX_AXES || frame.buttons.len() > MAX_BUTTONS {
                    return Err(Error::InvalidInput("too many axes or buttons".to_string()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn check_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(Error::InvalidInput(format!("{field} exceeds {max} characters")));
    }
    Ok(())
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        peer_id: PeerId,
        reconnect_delay_ms: u64,
    },
    /// A broadcaster announced itself.
    #[serde(rename = "broadcaster")]
    BroadcasterAvailable {
        broadcaster_id: PeerId,
    },
    /// A watcher asked for media.
    Watcher {
        peer_id: PeerId,
    },
    Offer {
        from: PeerId,
        payload: Value,
    },
    Answer {
        from: PeerId,
        payload: Value,
    },
    Candidate {
        from: PeerId,
        payload: Value,
    },
    PeerRequest {
        peer_id: PeerId,
        nickname: String,
    },
    JoinDecision {
        approved: bool,
    },
    AdminPing {
        timestamp: i64,
        peer_id: PeerId,
    },
    AdminPong {
        timestamp: i64,
        peer_id: PeerId,
        nickname: String,
        latency_ms: u64,
    },
    DisconnectPeer {
        peer_id: PeerId,
    },
    QualityChanged {
        peer_id: PeerId,
        profile_id: String,
    },
    VoteTally {
        votes: Vec<VoteEntry>,
    },
    ChatMessage {
        from: PeerId,
        nickname: String,
        text: String,
    },
    ApplyEncoding {
        peer_id: PeerId,
        #[serde(flatten)]
        encoding: EncodingUpdate,
    },
    ApplyTrackConstraints {
        peer_id: PeerId,
        #[serde(flatten)]
        constraints: TrackConstraints,
    },
    StatsSummary(AggregateStats),
    BroadcasterEnded,
    /// Current voice channel roster, in join order.
    VoiceUserList {
        users: Vec<VoiceMember>,
    },
    VoiceOffer {
        from: PeerId,
        payload: Value,
    },
    VoiceAnswer {
        from: PeerId,
        payload: Value,
    },
    VoiceCandidate {
        from: PeerId,
        payload: Value,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the frame, as it appears in `type`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::BroadcasterAvailable { .. } => "broadcaster",
            Self::Watcher { .. } => "watcher",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::PeerRequest { .. } => "peerRequest",
            Self::JoinDecision { .. } => "joinDecision",
            Self::AdminPing { .. } => "adminPing",
            Self::AdminPong { .. } => "adminPong",
            Self::DisconnectPeer { .. } => "disconnectPeer",
            Self::QualityChanged { .. } => "qualityChanged",
            Self::VoteTally { .. } => "voteTally",
            Self::ChatMessage { .. } => "chatMessage",
            Self::ApplyEncoding { .. } => "applyEncoding",
            Self::ApplyTrackConstraints { .. } => "applyTrackConstraints",
            Self::StatsSummary(_) => "statsSummary",
            Self::BroadcasterEnded => "broadcasterEnded",
            Self::VoiceUserList { .. } => "voiceUserList",
            Self::VoiceOffer { .. } => "voiceOffer",
            Self::VoiceAnswer { .. } => "voiceAnswer",
            Self::VoiceCandidate { .. } => "voiceCandidate",
            Self::Error { .. } => "error",
        }
    }
}
