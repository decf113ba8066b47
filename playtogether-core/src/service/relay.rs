//! Signaling relay
//!
//! Forwards offers, answers and candidates between the broadcaster and its
//! watchers. Payloads are opaque apart from the optional codec restriction
//! on session descriptions. The relay stamps the sender's id on everything it
//! forwards and tracks each watcher's negotiation progress on the side.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Outbox, Recipient, SessionRegistry};
use crate::config::RelayConfig;
use crate::metrics::{DROPPED_MESSAGES, RELAYED_MESSAGES};
use crate::models::{
    ApprovalState, EncodingProfile, EngineConnectionState, NegotiationEvent, PeerId, ResolutionTier,
};
use crate::protocol::ServerMessage;
use crate::sdp;
use crate::{Error, Result};

/// Which half of the exchange a relayed payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }

    const fn voice_label(self) -> &'static str {
        match self {
            Self::Offer => "voiceOffer",
            Self::Answer => "voiceAnswer",
            Self::Candidate => "voiceCandidate",
        }
    }

    const fn event(self) -> NegotiationEvent {
        match self {
            Self::Offer => NegotiationEvent::OfferRelayed,
            Self::Answer => NegotiationEvent::AnswerRelayed,
            Self::Candidate => NegotiationEvent::CandidateRelayed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalingRelay {
    preferred_codec: Option<String>,
    enforce_approval: bool,
    /// Sender parameters a watcher starts from when it becomes active.
    initial_encoding: EncodingProfile,
}

impl SignalingRelay {
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            preferred_codec: config.preferred_codec.clone(),
            enforce_approval: config.enforce_approval,
            initial_encoding: EncodingProfile::default(),
        }
    }

    #[must_use]
    pub fn with_initial_encoding(mut self, encoding: EncodingProfile) -> Self {
        self.initial_encoding = encoding;
        self
    }

    #[must_use]
    pub const fn enforces_approval(&self) -> bool {
        self.enforce_approval
    }

    /// Make `from` the broadcaster and tell everybody else.
    pub fn announce(&self, registry: &mut SessionRegistry, from: &PeerId, now: DateTime<Utc>) -> Outbox {
        if let Some(previous) = registry.set_broadcaster(from.clone(), now) {
            if previous.id != *from {
                warn!(
                    previous = %previous.id,
                    broadcaster_id = %from,
                    "Broadcaster replaced by a newer announcement"
                );
            }
        }
        info!(broadcaster_id = %from, "Broadcaster announced");
        RELAYED_MESSAGES.with_label_values(&["broadcaster"]).inc();

        let mut outbox = Outbox::new();
        outbox.push(
            Recipient::AllExcept(from.clone()),
            ServerMessage::BroadcasterAvailable {
                broadcaster_id: from.clone(),
            },
        );
        outbox
    }

    /// Forward a watch request to the broadcaster.
    ///
    /// Inert when nobody is broadcasting, or when approval is enforced and
    /// `from` has not been approved.
    pub fn request_watch(&self, registry: &mut SessionRegistry, from: &PeerId) -> Outbox {
        let mut outbox = Outbox::new();

        if registry.broadcaster_id().is_none() {
            debug!(peer_id = %from, "Watch request with no broadcaster");
            DROPPED_MESSAGES.with_label_values(&["no_broadcaster"]).inc();
            return outbox;
        }
        let admitted = registry.get(from).is_some_and(|r| r.approval.is_admitted());
        if self.enforce_approval && !admitted {
            debug!(peer_id = %from, "Watch request from unapproved peer dropped");
            DROPPED_MESSAGES.with_label_values(&["unapproved"]).inc();
            return outbox;
        }

        registry.update(from, |record| {
            record.negotiation = record.negotiation.apply(NegotiationEvent::WatchRequested);
        });
        RELAYED_MESSAGES.with_label_values(&["watcher"]).inc();
        outbox.to_broadcaster(ServerMessage::Watcher { peer_id: from.clone() });
        outbox
    }

    /// Forward one signaling payload from `from` to `target`.
    pub fn relay(
        &self,
        registry: &mut SessionRegistry,
        kind: SignalKind,
        from: &PeerId,
        target: &PeerId,
        mut payload: Value,
    ) -> Outbox {
        if let (Some(codec), SignalKind::Offer | SignalKind::Answer) = (&self.preferred_codec, kind) {
            if sdp::restrict_description(&mut payload, codec) {
                debug!(peer_id = %from, codec = %codec, "Session description restricted to codec");
            }
        }

        // Negotiation state lives on the watcher's side of the pair.
        let watcher = if registry.is_broadcaster(from) { target } else { from };
        let initial_encoding = self.initial_encoding;
        registry.update(watcher, |record| {
            record.negotiation = record.negotiation.apply(kind.event());
            if kind == SignalKind::Offer && record.approval == ApprovalState::Approved {
                record.approval = ApprovalState::Active;
                record.encoding = initial_encoding;
                record.resolution_tier = ResolutionTier::Full;
            }
        });

        RELAYED_MESSAGES.with_label_values(&[kind.label()]).inc();
        let from = from.clone();
        let message = match kind {
            SignalKind::Offer => ServerMessage::Offer { from, payload },
            SignalKind::Answer => ServerMessage::Answer { from, payload },
            SignalKind::Candidate => ServerMessage::Candidate { from, payload },
        };

        let mut outbox = Outbox::new();
        outbox.to_peer(target, message);
        outbox
    }

    /// Forward one voice-channel payload between two members of the voice room.
    ///
    /// Voice pairs are full mesh and carry audio only, so negotiation state and
    /// the codec restriction are left alone.
    pub fn relay_voice(
        &self,
        registry: &SessionRegistry,
        kind: SignalKind,
        from: &PeerId,
        target: &PeerId,
        payload: Value,
    ) -> Result<Outbox> {
        if !registry.voice().contains(from) {
            return Err(Error::Authorization("join the voice channel first".to_string()));
        }
        let mut outbox = Outbox::new();
        if !registry.voice().contains(target) {
            debug!(peer_id = %from, target = %target, "Voice signal for a peer outside the channel");
            DROPPED_MESSAGES.with_label_values(&["not_in_voice"]).inc();
            return Ok(outbox);
        }

        RELAYED_MESSAGES.with_label_values(&[kind.voice_label()]).inc();
        let from = from.clone();
        let message = match kind {
            SignalKind::Offer => ServerMessage::VoiceOffer { from, payload },
            SignalKind::Answer => ServerMessage::VoiceAnswer { from, payload },
            SignalKind::Candidate => ServerMessage::VoiceCandidate { from, payload },
        };
        outbox.to_peer(target, message);
        Ok(outbox)
    }

    /// Fold an engine-reported connection state into the sender's negotiation.
    pub fn connection_state(
        &self,
        registry: &mut SessionRegistry,
        from: &PeerId,
        state: EngineConnectionState,
    ) {
        let Some(event) = state.as_event() else {
            return;
        };
        registry.update(from, |record| {
            let next = record.negotiation.apply(event);
            if next != record.negotiation {
                debug!(peer_id = %from, from_state = ?record.negotiation, to_state = ?next, "Negotiation state changed");
            }
            record.negotiation = next;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NegotiationState, PeerRecord};
    use serde_json::json;

    fn config(enforce_approval: bool, codec: Option<&str>) -> RelayConfig {
        RelayConfig {
            preferred_codec: codec.map(str::to_string),
            enforce_approval,
            ..RelayConfig::default()
        }
    }

    fn registry_with(host: &str, watcher: &str, approval: ApprovalState) -> SessionRegistry {
        let mut registry = SessionRegistry::new();
        registry.set_broadcaster(PeerId::from(host), Utc::now());
        let mut record = PeerRecord::new(PeerId::from(watcher), watcher, Utc::now());
        record.approval = approval;
        registry.upsert(record);
        registry
    }

    #[test]
    fn test_announce_reaches_everyone_else() {
        let relay = SignalingRelay::new(&config(true, None));
        let mut registry = SessionRegistry::new();
        let host = PeerId::from("host");

        let outbox = relay.announce(&mut registry, &host, Utc::now());
        assert_eq!(outbox.envelopes()[0].to, Recipient::AllExcept(host.clone()));
        assert!(registry.is_broadcaster(&host));
    }

    #[test]
    fn test_unapproved_watch_request_is_inert() {
        let relay = SignalingRelay::new(&config(true, None));
        let mut registry = registry_with("host", "w", ApprovalState::Pending);

        let outbox = relay.request_watch(&mut registry, &PeerId::from("w"));
        assert!(outbox.is_empty());
        assert_eq!(registry.get(&PeerId::from("w")).unwrap().negotiation, NegotiationState::Idle);
    }

    #[test]
    fn test_watch_request_without_enforcement() {
        let relay = SignalingRelay::new(&config(false, None));
        let mut registry = SessionRegistry::new();
        registry.set_broadcaster(PeerId::from("host"), Utc::now());

        let outbox = relay.request_watch(&mut registry, &PeerId::from("stranger"));
        let sent: Vec<_> = outbox.messages_for(&Recipient::Broadcaster).collect();
        assert_eq!(sent, vec![&ServerMessage::Watcher { peer_id: PeerId::from("stranger") }]);
    }

    #[test]
    fn test_watch_request_without_broadcaster() {
        let relay = SignalingRelay::new(&config(false, None));
        let mut registry = SessionRegistry::new();
        assert!(relay.request_watch(&mut registry, &PeerId::from("w")).is_empty());
    }

    #[test]
    fn test_offer_activates_approved_watcher_and_stamps_sender() {
        let relay = SignalingRelay::new(&config(true, None));
        let mut registry = registry_with("host", "w", ApprovalState::Approved);
        let (host, watcher) = (PeerId::from("host"), PeerId::from("w"));
        relay.request_watch(&mut registry, &watcher);

        let payload = json!({"type": "offer", "sdp": "v=0"});
        let outbox = relay.relay(&mut registry, SignalKind::Offer, &host, &watcher, payload.clone());

        let sent: Vec<_> = outbox.messages_for(&Recipient::Peer(watcher.clone())).collect();
        assert_eq!(sent, vec![&ServerMessage::Offer { from: host, payload }]);
        let record = registry.get(&watcher).unwrap();
        assert_eq!(record.approval, ApprovalState::Active);
        assert_eq!(record.negotiation, NegotiationState::OfferSent);
    }

    #[test]
    fn test_activation_starts_from_initial_encoding() {
        let initial = EncodingProfile {
            max_bitrate_bps: 4_000_000,
            max_framerate_fps: 60,
            downscale_factor: 1.0,
        };
        let relay = SignalingRelay::new(&config(true, None)).with_initial_encoding(initial);
        let mut registry = registry_with("host", "w", ApprovalState::Approved);

        relay.relay(&mut registry, SignalKind::Offer, &PeerId::from("host"), &PeerId::from("w"), json!({}));
        assert_eq!(registry.get(&PeerId::from("w")).unwrap().encoding, initial);
    }

    #[test]
    fn test_offer_does_not_activate_pending_peer() {
        let relay = SignalingRelay::new(&config(true, None));
        let mut registry = registry_with("host", "w", ApprovalState::Pending);
        relay.relay(
            &mut registry,
            SignalKind::Offer,
            &PeerId::from("host"),
            &PeerId::from("w"),
            json!({}),
        );
        assert_eq!(registry.get(&PeerId::from("w")).unwrap().approval, ApprovalState::Pending);
    }

    #[test]
    fn test_answer_tracked_on_sending_watcher() {
        let relay = SignalingRelay::new(&config(true, None));
        let mut registry = registry_with("host", "w", ApprovalState::Approved);
        let (host, watcher) = (PeerId::from("host"), PeerId::from("w"));

        relay.relay(&mut registry, SignalKind::Offer, &host, &watcher, json!({}));
        relay.relay(&mut registry, SignalKind::Answer, &watcher, &host, json!({}));
        relay.relay(&mut registry, SignalKind::Candidate, &watcher, &host, json!({}));
        relay.connection_state(&mut registry, &watcher, EngineConnectionState::Connected);

        assert_eq!(registry.get(&watcher).unwrap().negotiation, NegotiationState::MediaFlowing);

        relay.connection_state(&mut registry, &watcher, EngineConnectionState::Failed);
        assert_eq!(registry.get(&watcher).unwrap().negotiation, NegotiationState::Idle);
    }

    #[test]
    fn test_codec_restriction_applies_to_descriptions_only() {
        let relay = SignalingRelay::new(&config(true, Some("H264")));
        let mut registry = registry_with("host", "w", ApprovalState::Approved);
        let (host, watcher) = (PeerId::from("host"), PeerId::from("w"));
        let sdp = "m=video 9 RTP/AVP 96 102\r\na=rtpmap:96 VP8/90000\r\na=rtpmap:102 H264/90000";

        let outbox = relay.relay(
            &mut registry,
            SignalKind::Offer,
            &host,
            &watcher,
            json!({"type": "offer", "sdp": sdp}),
        );
        let Some(ServerMessage::Offer { payload, .. }) = outbox.messages_for(&Recipient::Peer(watcher.clone())).next()
        else {
            panic!("expected an offer");
        };
        assert_eq!(payload["sdp"], "m=video 9 RTP/AVP 102\r\na=rtpmap:102 H264/90000");

        let candidate = json!({"candidate": "a=rtpmap:96 VP8/90000", "sdp": sdp});
        let outbox = relay.relay(&mut registry, SignalKind::Candidate, &host, &watcher, candidate.clone());
        let Some(ServerMessage::Candidate { payload, .. }) = outbox.messages_for(&Recipient::Peer(watcher)).next()
        else {
            panic!("expected a candidate");
        };
        assert_eq!(payload, &candidate);
    }

    #[test]
    fn test_voice_relay_between_members_only() {
        let relay = SignalingRelay::new(&config(true, Some("H264")));
        let mut registry = registry_with("host", "w", ApprovalState::Active);
        let (host, watcher, outsider) = (PeerId::from("host"), PeerId::from("w"), PeerId::from("x"));
        registry.voice_mut().join(&host, "Host");
        registry.voice_mut().join(&watcher, "W");

        let sdp = json!({"type": "offer", "sdp": "m=video 9 RTP/AVP 96\r\na=rtpmap:96 VP8/90000"});
        let outbox = relay
            .relay_voice(&registry, SignalKind::Offer, &watcher, &host, sdp.clone())
            .unwrap();
        let sent: Vec<_> = outbox.messages_for(&Recipient::Peer(host.clone())).collect();
        assert_eq!(sent, vec![&ServerMessage::VoiceOffer { from: watcher.clone(), payload: sdp }]);
        assert_eq!(registry.get(&watcher).unwrap().negotiation, NegotiationState::Idle);

        // a target outside the room is dropped, a sender outside it is refused
        let outbox = relay
            .relay_voice(&registry, SignalKind::Candidate, &watcher, &outsider, json!({}))
            .unwrap();
        assert!(outbox.is_empty());
        let refused = relay.relay_voice(&registry, SignalKind::Answer, &outsider, &host, json!({}));
        assert!(matches!(refused, Err(Error::Authorization(_))));
    }
}
