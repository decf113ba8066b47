//! Session dispatcher
//!
//! [`SessionCore`] owns the registry and routes every validated inbound frame
//! to the component responsible for it. It is driven by a single loop and
//! never blocks: each call returns the frames to send and nothing else.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::admission::{normalize_nickname, DEFAULT_NICKNAME};
use super::relay::SignalKind;
use super::{
    AdmissionController, HealthMonitor, InputBridge, InputSlot, Outbox, Recipient, SessionRegistry,
    SignalingRelay,
};
use crate::config::RelayConfig;
use crate::metrics::DROPPED_MESSAGES;
use crate::models::{ApprovalState, EncodingProfile, NegotiationState, PeerId};
use crate::protocol::{ClientMessage, InputFrame, ServerMessage};
use crate::{Error, Result};

/// Which endpoint a connection came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointRole {
    Watcher,
    /// Passed the shared-credential gate; may announce itself.
    Broadcaster,
}

pub struct SessionCore {
    registry: SessionRegistry,
    admission: AdmissionController,
    relay: SignalingRelay,
    health: HealthMonitor,
    bridge: Arc<dyn InputBridge>,
    reconnect_delay_ms: u64,
}

impl SessionCore {
    #[must_use]
    pub fn new(config: &RelayConfig, bridge: Arc<dyn InputBridge>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            admission: AdmissionController::new(),
            relay: SignalingRelay::new(config),
            health: HealthMonitor::new(),
            bridge,
            reconnect_delay_ms: config.reconnect_delay_ms,
        }
    }

    /// Sender parameters applied to each watcher as it becomes active.
    #[must_use]
    pub fn with_initial_encoding(mut self, encoding: EncodingProfile) -> Self {
        self.relay = self.relay.with_initial_encoding(encoding);
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    /// Greet a new connection.
    pub fn connect(&mut self, peer_id: &PeerId) -> Outbox {
        let mut outbox = Outbox::new();
        outbox.to_peer(
            peer_id,
            ServerMessage::Welcome {
                peer_id: peer_id.clone(),
                reconnect_delay_ms: self.reconnect_delay_ms,
            },
        );
        if let Some(broadcaster_id) = self.registry.broadcaster_id() {
            outbox.to_peer(
                peer_id,
                ServerMessage::BroadcasterAvailable {
                    broadcaster_id: broadcaster_id.clone(),
                },
            );
        }
        outbox
    }

    /// Handle one frame from `from`. Failures come back as an `error` frame to the sender.
    pub fn handle(
        &mut self,
        from: &PeerId,
        role: EndpointRole,
        message: ClientMessage,
        now: DateTime<Utc>,
    ) -> Outbox {
        let kind = message.kind();
        match self.dispatch(from, role, message, now) {
            Ok(outbox) => outbox,
            Err(e) => {
                debug!(peer_id = %from, kind, error = %e, "Frame rejected");
                DROPPED_MESSAGES.with_label_values(&[e.kind()]).inc();
                let mut outbox = Outbox::new();
                outbox.to_peer(from, ServerMessage::error(e.to_string()));
                outbox
            }
        }
    }

    fn dispatch(
        &mut self,
        from: &PeerId,
        role: EndpointRole,
        message: ClientMessage,
        now: DateTime<Utc>,
    ) -> Result<Outbox> {
        let kind = message.kind();
        let outbox = match message {
            ClientMessage::AnnounceBroadcaster => {
                if role != EndpointRole::Broadcaster {
                    return Err(Error::Authorization(
                        "announcing requires the broadcaster endpoint".to_string(),
                    ));
                }
                self.relay.announce(&mut self.registry, from, now)
            }
            ClientMessage::RequestWatch => self.relay.request_watch(&mut self.registry, from),
            ClientMessage::RelayOffer { target_id, payload } => {
                self.relay
                    .relay(&mut self.registry, SignalKind::Offer, from, &target_id, payload)
            }
            ClientMessage::RelayAnswer { target_id, payload } => {
                self.relay
                    .relay(&mut self.registry, SignalKind::Answer, from, &target_id, payload)
            }
            ClientMessage::RelayCandidate { target_id, payload } => {
                self.relay
                    .relay(&mut self.registry, SignalKind::Candidate, from, &target_id, payload)
            }
            ClientMessage::JoinRequest { nickname } => {
                self.admission
                    .request_join(&mut self.registry, from, &nickname, now)
            }
            ClientMessage::JoinDecision { peer_id, approved } => {
                self.admission
                    .decide(&mut self.registry, from, &peer_id, approved)?
            }
            ClientMessage::AdminPong {
                timestamp,
                peer_id,
                nickname,
            } => {
                if peer_id.as_ref().is_some_and(|claimed| claimed != from) {
                    debug!(peer_id = %from, "Probe echo carried a foreign peer id");
                }
                self.health.record_pong(
                    &mut self.registry,
                    from,
                    timestamp,
                    nickname.as_deref(),
                    now.timestamp_millis(),
                )
            }
            ClientMessage::DisconnectPeer { peer_id } => self.disconnect_peer(from, &peer_id)?,
            ClientMessage::GameVote { title } => {
                let title = title.trim();
                let count = self.registry.votes_mut().record(title);
                debug!(peer_id = %from, title, count, "Vote counted");
                self.vote_tally()
            }
            ClientMessage::ClearVotes => {
                self.require_broadcaster(from)?;
                self.registry.votes_mut().clear();
                info!("Votes cleared");
                self.vote_tally()
            }
            ClientMessage::ChatMessage { nickname, text } => self.chat(from, nickname, text),
            ClientMessage::VirtualInputFrame(frame) => self.input_frame(from, &frame)?,
            ClientMessage::ConnectionState { state } => {
                self.relay.connection_state(&mut self.registry, from, state);
                Outbox::new()
            }
            ClientMessage::VoiceJoin { nickname } => self.voice_join(from, &nickname),
            ClientMessage::VoiceLeave => self.voice_leave(from),
            ClientMessage::VoiceOffer { target_id, payload } => {
                self.relay
                    .relay_voice(&self.registry, SignalKind::Offer, from, &target_id, payload)?
            }
            ClientMessage::VoiceAnswer { target_id, payload } => {
                self.relay
                    .relay_voice(&self.registry, SignalKind::Answer, from, &target_id, payload)?
            }
            ClientMessage::VoiceCandidate { target_id, payload } => {
                self.relay
                    .relay_voice(&self.registry, SignalKind::Candidate, from, &target_id, payload)?
            }
            ClientMessage::QualitySelect { .. } | ClientMessage::StatsReport { .. } => {
                debug!(peer_id = %from, kind, "Quality frame reached the session core");
                Outbox::new()
            }
        };
        Ok(outbox)
    }

    /// A connection went away.
    ///
    /// Losing the current broadcaster ends the session for everyone: watchers
    /// are told and must be approved again. Pending join requests are kept.
    /// Voice channel members see the roster shrink.
    pub fn disconnect(&mut self, peer_id: &PeerId) -> Outbox {
        let mut outbox = Outbox::new();

        if self.registry.clear_broadcaster(peer_id) {
            if self.registry.voice_mut().leave(peer_id) {
                outbox.extend(self.voice_roster());
            }
            warn!(broadcaster_id = %peer_id, "Broadcaster disconnected");
            for watcher in self.registry.peer_ids_where(|_| true) {
                self.registry.update(&watcher, |record| {
                    record.approval = ApprovalState::Closed;
                    record.negotiation = NegotiationState::Closed;
                });
            }
            outbox.push(Recipient::AllExcept(peer_id.clone()), ServerMessage::BroadcasterEnded);
            return outbox;
        }

        let in_voice = self.registry.voice().contains(peer_id);
        if self.purge(peer_id) {
            info!(peer_id = %peer_id, "Peer disconnected");
        }
        if in_voice {
            outbox.extend(self.voice_roster());
        }
        if self.registry.broadcaster_id().is_some() {
            outbox.to_broadcaster(ServerMessage::DisconnectPeer {
                peer_id: peer_id.clone(),
            });
        }
        outbox
    }

    /// Forget everything about `peer_id` and unplug its controllers.
    ///
    /// Safe to call any number of times.
    pub fn purge(&mut self, peer_id: &PeerId) -> bool {
        let removed = self.registry.remove(peer_id);
        let released = self.bridge.release(peer_id);
        removed || released > 0
    }

    /// Send one round of latency probes.
    pub fn probe(&mut self, now: DateTime<Utc>) -> Outbox {
        self.health.probe(&mut self.registry, now.timestamp_millis())
    }

    fn require_broadcaster(&self, from: &PeerId) -> Result<()> {
        if self.registry.is_broadcaster(from) {
            Ok(())
        } else {
            Err(Error::Authorization("only the broadcaster may do this".to_string()))
        }
    }

    fn disconnect_peer(&mut self, from: &PeerId, target: &PeerId) -> Result<Outbox> {
        let by_broadcaster = self.registry.is_broadcaster(from);
        if !by_broadcaster && from != target {
            return Err(Error::Authorization(
                "peers may only disconnect themselves".to_string(),
            ));
        }

        let mut outbox = Outbox::new();
        outbox.to_peer(target, ServerMessage::DisconnectPeer { peer_id: target.clone() });
        if !by_broadcaster {
            outbox.to_broadcaster(ServerMessage::DisconnectPeer { peer_id: target.clone() });
        }
        let in_voice = self.registry.voice().contains(target);
        if self.purge(target) {
            info!(peer_id = %target, by = %from, "Peer disconnected on request");
        }
        if in_voice {
            outbox.extend(self.voice_roster());
        }
        Ok(outbox)
    }

    /// Enter the voice channel, or rename if already in it.
    fn voice_join(&mut self, from: &PeerId, nickname: &str) -> Outbox {
        let nickname = match self.registry.get(from) {
            Some(record) if nickname.trim().is_empty() => record.nickname.clone(),
            _ => normalize_nickname(nickname),
        };
        if self.registry.voice_mut().join(from, &nickname) {
            info!(peer_id = %from, nickname = %nickname, "Joined voice channel");
        }
        self.voice_roster()
    }

    fn voice_leave(&mut self, from: &PeerId) -> Outbox {
        if !self.registry.voice_mut().leave(from) {
            return Outbox::new();
        }
        info!(peer_id = %from, "Left voice channel");
        self.voice_roster()
    }

    fn voice_roster(&self) -> Outbox {
        let mut outbox = Outbox::new();
        outbox.push(
            Recipient::All,
            ServerMessage::VoiceUserList {
                users: self.registry.voice().members().to_vec(),
            },
        );
        outbox
    }

    fn vote_tally(&self) -> Outbox {
        let mut outbox = Outbox::new();
        outbox.to_broadcaster(ServerMessage::VoteTally {
            votes: self.registry.votes().ranked(),
        });
        outbox
    }

    fn chat(&self, from: &PeerId, nickname: Option<String>, text: String) -> Outbox {
        let nickname = nickname
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .or_else(|| self.registry.get(from).map(|r| r.nickname.clone()))
            .unwrap_or_else(|| DEFAULT_NICKNAME.to_string());

        let mut outbox = Outbox::new();
        outbox.push(
            Recipient::AllExcept(from.clone()),
            ServerMessage::ChatMessage {
                from: from.clone(),
                nickname,
                text: text.trim().to_string(),
            },
        );
        outbox
    }

    fn input_frame(&self, from: &PeerId, frame: &InputFrame) -> Result<Outbox> {
        if self.relay.enforces_approval()
            && !self.registry.get(from).is_some_and(|r| r.approval.is_admitted())
        {
            return Err(Error::Authorization("controller input requires approval".to_string()));
        }
        // The id prefix is client supplied; bind under the connection's own id.
        let slot: InputSlot = frame.slot().parse()?;
        self.bridge.submit(from, slot, frame)?;
        Ok(Outbox::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::InputBindings;

    fn core(enforce_approval: bool) -> (SessionCore, Arc<InputBindings>) {
        let bindings = Arc::new(InputBindings::new());
        let config = RelayConfig {
            enforce_approval,
            ..RelayConfig::default()
        };
        (SessionCore::new(&config, bindings.clone()), bindings)
    }

    fn announce(core: &mut SessionCore, id: &PeerId) {
        core.handle(id, EndpointRole::Broadcaster, ClientMessage::AnnounceBroadcaster, Utc::now());
    }

    #[test]
    fn test_connect_sends_welcome_and_current_broadcaster() {
        let (mut core, _) = core(true);
        let host = PeerId::from("host");
        announce(&mut core, &host);

        let w = PeerId::from("w");
        let sent: Vec<ServerMessage> = core
            .connect(&w)
            .messages_for(&Recipient::Peer(w.clone()))
            .cloned()
            .collect();
        assert_eq!(
            sent,
            vec![
                ServerMessage::Welcome {
                    peer_id: w.clone(),
                    reconnect_delay_ms: 3000,
                },
                ServerMessage::BroadcasterAvailable { broadcaster_id: host },
            ]
        );
    }

    #[test]
    fn test_watcher_cannot_announce() {
        let (mut core, _) = core(true);
        let w = PeerId::from("w");
        let outbox = core.handle(&w, EndpointRole::Watcher, ClientMessage::AnnounceBroadcaster, Utc::now());

        assert!(core.registry().broadcaster().is_none());
        let sent: Vec<_> = outbox.messages_for(&Recipient::Peer(w)).collect();
        assert!(matches!(sent.as_slice(), [ServerMessage::Error { .. }]));
    }

    #[test]
    fn test_interleaved_announcements_keep_most_recent() {
        let (mut core, _) = core(true);
        for id in ["b1", "b2", "b1", "b3"] {
            announce(&mut core, &PeerId::from(id));
        }
        assert_eq!(core.registry().broadcaster_id(), Some(&PeerId::from("b3")));
    }

    #[test]
    fn test_broadcaster_loss_ends_session() {
        let (mut core, _) = core(true);
        let host = PeerId::from("host");
        let w = PeerId::from("w");
        announce(&mut core, &host);
        core.handle(&w, EndpointRole::Watcher, ClientMessage::JoinRequest { nickname: "W".into() }, Utc::now());
        core.handle(
            &host,
            EndpointRole::Broadcaster,
            ClientMessage::JoinDecision { peer_id: w.clone(), approved: true },
            Utc::now(),
        );
        let p = PeerId::from("p");
        core.handle(&p, EndpointRole::Watcher, ClientMessage::JoinRequest { nickname: "P".into() }, Utc::now());

        let outbox = core.disconnect(&host);
        let sent: Vec<_> = outbox.messages_for(&Recipient::AllExcept(host.clone())).collect();
        assert_eq!(sent, vec![&ServerMessage::BroadcasterEnded]);
        assert!(core.registry().broadcaster().is_none());
        assert_eq!(core.registry().get(&w).unwrap().approval, ApprovalState::Closed);
        // orphaned, not expired
        assert!(core.registry().pending(&p).is_some());

        // a closed watcher has to ask again
        let outbox = core.handle(&w, EndpointRole::Watcher, ClientMessage::RequestWatch, Utc::now());
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_stale_broadcaster_disconnect_keeps_current() {
        let (mut core, _) = core(true);
        let (b1, b2) = (PeerId::from("b1"), PeerId::from("b2"));
        announce(&mut core, &b1);
        announce(&mut core, &b2);

        core.disconnect(&b1);
        assert_eq!(core.registry().broadcaster_id(), Some(&b2));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut core, bindings) = core(false);
        let host = PeerId::from("host");
        let w = PeerId::from("w");
        announce(&mut core, &host);
        core.handle(&w, EndpointRole::Watcher, ClientMessage::JoinRequest { nickname: "W".into() }, Utc::now());
        core.handle(
            &w,
            EndpointRole::Watcher,
            ClientMessage::VirtualInputFrame(InputFrame {
                input_id: "w-1".to_string(),
                axes: vec![],
                buttons: vec![],
            }),
            Utc::now(),
        );
        assert_eq!(bindings.len(), 1);

        core.disconnect(&w);
        assert!(core.registry().get(&w).is_none());
        assert!(core.registry().pending(&w).is_none());
        assert!(bindings.is_empty());

        core.disconnect(&w);
        assert!(core.registry().get(&w).is_none());
        assert!(!core.purge(&w));
    }

    #[test]
    fn test_peer_cannot_disconnect_others() {
        let (mut core, _) = core(true);
        announce(&mut core, &PeerId::from("host"));
        let (a, b) = (PeerId::from("a"), PeerId::from("b"));
        core.handle(&b, EndpointRole::Watcher, ClientMessage::JoinRequest { nickname: "B".into() }, Utc::now());

        core.handle(&a, EndpointRole::Watcher, ClientMessage::DisconnectPeer { peer_id: b.clone() }, Utc::now());
        assert!(core.registry().get(&b).is_some());
    }

    #[test]
    fn test_input_frame_is_rebound_to_sender() {
        let (mut core, bindings) = core(false);
        let sender = PeerId::from("real");
        core.handle(
            &sender,
            EndpointRole::Watcher,
            ClientMessage::VirtualInputFrame(InputFrame {
                input_id: "spoofed-2".to_string(),
                axes: vec![0.5],
                buttons: vec![1.0],
            }),
            Utc::now(),
        );
        assert!(bindings.get("real-2").is_some());
        assert!(bindings.get("spoofed-2").is_none());
    }

    #[test]
    fn test_input_requires_approval_when_enforced() {
        let (mut core, bindings) = core(true);
        let w = PeerId::from("w");
        let outbox = core.handle(
            &w,
            EndpointRole::Watcher,
            ClientMessage::VirtualInputFrame(InputFrame {
                input_id: "w-1".to_string(),
                axes: vec![],
                buttons: vec![],
            }),
            Utc::now(),
        );
        assert!(bindings.is_empty());
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn test_votes_and_clear() {
        let (mut core, _) = core(true);
        let host = PeerId::from("host");
        announce(&mut core, &host);
        let w = PeerId::from("w");

        core.handle(&w, EndpointRole::Watcher, ClientMessage::GameVote { title: "Doom".into() }, Utc::now());
        let outbox = core.handle(&w, EndpointRole::Watcher, ClientMessage::GameVote { title: " Doom ".into() }, Utc::now());
        let Some(ServerMessage::VoteTally { votes }) = outbox.messages_for(&Recipient::Broadcaster).next() else {
            panic!("expected a tally");
        };
        assert_eq!(votes[0].count, 2);

        // watchers may not clear
        core.handle(&w, EndpointRole::Watcher, ClientMessage::ClearVotes, Utc::now());
        assert!(!core.registry().votes().is_empty());

        core.handle(&host, EndpointRole::Broadcaster, ClientMessage::ClearVotes, Utc::now());
        assert!(core.registry().votes().is_empty());
    }

    #[test]
    fn test_chat_uses_known_nickname() {
        let (mut core, _) = core(true);
        let w = PeerId::from("w");
        core.handle(&w, EndpointRole::Watcher, ClientMessage::JoinRequest { nickname: "Wanda".into() }, Utc::now());

        let outbox = core.handle(
            &w,
            EndpointRole::Watcher,
            ClientMessage::ChatMessage { nickname: None, text: " hi ".into() },
            Utc::now(),
        );
        let sent: Vec<_> = outbox.messages_for(&Recipient::AllExcept(w.clone())).collect();
        assert_eq!(
            sent,
            vec![&ServerMessage::ChatMessage {
                from: w,
                nickname: "Wanda".to_string(),
                text: "hi".to_string(),
            }]
        );
    }

    fn rosters(outbox: &Outbox) -> Vec<Vec<String>> {
        outbox
            .messages_for(&Recipient::All)
            .filter_map(|message| match message {
                ServerMessage::VoiceUserList { users } => {
                    Some(users.iter().map(|u| u.nickname.clone()).collect())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_voice_join_leave_broadcasts_roster() {
        let (mut core, _) = core(true);
        let (a, b) = (PeerId::from("a"), PeerId::from("b"));
        core.handle(&a, EndpointRole::Watcher, ClientMessage::JoinRequest { nickname: "Ann".into() }, Utc::now());

        // falls back to the nickname from the join request
        let outbox = core.handle(&a, EndpointRole::Watcher, ClientMessage::VoiceJoin { nickname: String::new() }, Utc::now());
        assert_eq!(rosters(&outbox), vec![vec!["Ann".to_string()]]);

        let outbox = core.handle(&b, EndpointRole::Watcher, ClientMessage::VoiceJoin { nickname: " Bo ".into() }, Utc::now());
        assert_eq!(rosters(&outbox), vec![vec!["Ann".to_string(), "Bo".to_string()]]);

        let outbox = core.handle(&a, EndpointRole::Watcher, ClientMessage::VoiceLeave, Utc::now());
        assert_eq!(rosters(&outbox), vec![vec!["Bo".to_string()]]);

        // leaving twice says nothing
        let outbox = core.handle(&a, EndpointRole::Watcher, ClientMessage::VoiceLeave, Utc::now());
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_voice_signal_is_stamped_with_sender() {
        let (mut core, _) = core(true);
        let (a, b) = (PeerId::from("a"), PeerId::from("b"));
        for id in [&a, &b] {
            core.handle(id, EndpointRole::Watcher, ClientMessage::VoiceJoin { nickname: id.to_string() }, Utc::now());
        }

        let payload = serde_json::json!({"type": "answer", "sdp": "v=0"});
        let outbox = core.handle(
            &a,
            EndpointRole::Watcher,
            ClientMessage::VoiceAnswer { target_id: b.clone(), payload: payload.clone() },
            Utc::now(),
        );
        let sent: Vec<_> = outbox.messages_for(&Recipient::Peer(b)).collect();
        assert_eq!(sent, vec![&ServerMessage::VoiceAnswer { from: a, payload }]);
    }

    #[test]
    fn test_disconnect_leaves_voice_channel() {
        let (mut core, _) = core(true);
        let host = PeerId::from("host");
        let w = PeerId::from("w");
        announce(&mut core, &host);
        for id in [&host, &w] {
            core.handle(id, EndpointRole::Watcher, ClientMessage::VoiceJoin { nickname: id.to_string() }, Utc::now());
        }

        let outbox = core.disconnect(&w);
        assert_eq!(rosters(&outbox), vec![vec!["host".to_string()]]);
        assert!(!core.registry().voice().contains(&w));

        let outbox = core.disconnect(&host);
        let ended: Vec<_> = outbox.messages_for(&Recipient::AllExcept(host.clone())).collect();
        assert_eq!(ended, vec![&ServerMessage::BroadcasterEnded]);
        assert_eq!(rosters(&outbox), vec![Vec::<String>::new()]);
        assert!(core.registry().voice().is_empty());
    }
}
