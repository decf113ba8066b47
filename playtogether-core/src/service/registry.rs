//! In-memory session state
//!
//! One keyed store for everything the server knows per peer, plus the
//! broadcaster pointer, pending join requests, the voice roster and the vote
//! tally. Removing a
//! peer here is how in-flight work for it gets cancelled: later updates
//! simply find nothing to change.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::models::{
    BroadcasterSession, PeerId, PeerRecord, PendingJoinRequest, VoiceMember, VoiceRoom, VoteEntry,
    VoteTally,
};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    broadcaster: Option<BroadcasterSession>,
    peers: HashMap<PeerId, PeerRecord>,
    pending: HashMap<PeerId, PendingJoinRequest>,
    votes: VoteTally,
    voice: VoiceRoom,
}

/// Read-only copy of the registry for dashboards.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub broadcaster: Option<BroadcasterSession>,
    pub peers: Vec<PeerRecord>,
    pub pending: Vec<PendingJoinRequest>,
    pub votes: Vec<VoteEntry>,
    pub voice: Vec<VoiceMember>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Broadcaster ==========

    #[must_use]
    pub const fn broadcaster(&self) -> Option<&BroadcasterSession> {
        self.broadcaster.as_ref()
    }

    #[must_use]
    pub fn broadcaster_id(&self) -> Option<&PeerId> {
        self.broadcaster.as_ref().map(|b| &b.id)
    }

    #[must_use]
    pub fn is_broadcaster(&self, peer_id: &PeerId) -> bool {
        self.broadcaster_id() == Some(peer_id)
    }

    /// Make `peer_id` the broadcaster, returning whoever it replaced.
    pub fn set_broadcaster(&mut self, peer_id: PeerId, at: DateTime<Utc>) -> Option<BroadcasterSession> {
        self.broadcaster.replace(BroadcasterSession {
            id: peer_id,
            active_since: at,
        })
    }

    /// Clear the pointer, but only if it still names `peer_id`.
    pub fn clear_broadcaster(&mut self, peer_id: &PeerId) -> bool {
        if self.is_broadcaster(peer_id) {
            self.broadcaster = None;
            true
        } else {
            false
        }
    }

    // ========== Peers ==========

    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(peer_id)
    }

    pub fn upsert(&mut self, record: PeerRecord) -> Option<PeerRecord> {
        self.peers.insert(record.peer_id.clone(), record)
    }

    /// Apply `f` to the record if it still exists.
    pub fn update<F>(&mut self, peer_id: &PeerId, f: F) -> bool
    where
        F: FnOnce(&mut PeerRecord),
    {
        self.peers.get_mut(peer_id).map(f).is_some()
    }

    /// Drop the record, any pending request and voice membership.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, peer_id: &PeerId) -> bool {
        let record = self.peers.remove(peer_id);
        let pending = self.pending.remove(peer_id);
        let voice = self.voice.leave(peer_id);
        record.is_some() || pending.is_some() || voice
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Ids of records matching `predicate`, sorted for stable iteration.
    #[must_use]
    pub fn peer_ids_where<P>(&self, predicate: P) -> Vec<PeerId>
    where
        P: Fn(&PeerRecord) -> bool,
    {
        let mut ids: Vec<PeerId> = self
            .peers
            .values()
            .filter(|record| predicate(record))
            .map(|record| record.peer_id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    // ========== Join requests ==========

    #[must_use]
    pub fn pending(&self, peer_id: &PeerId) -> Option<&PendingJoinRequest> {
        self.pending.get(peer_id)
    }

    pub fn insert_pending(&mut self, request: PendingJoinRequest) {
        self.pending.insert(request.peer_id.clone(), request);
    }

    pub fn take_pending(&mut self, peer_id: &PeerId) -> Option<PendingJoinRequest> {
        self.pending.remove(peer_id)
    }

    // ========== Votes ==========

    #[must_use]
    pub const fn votes(&self) -> &VoteTally {
        &self.votes
    }

    pub fn votes_mut(&mut self) -> &mut VoteTally {
        &mut self.votes
    }

    // ========== Voice ==========

    #[must_use]
    pub const fn voice(&self) -> &VoiceRoom {
        &self.voice
    }

    pub fn voice_mut(&mut self) -> &mut VoiceRoom {
        &mut self.voice
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut peers: Vec<PeerRecord> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.peer_id.cmp(&b.peer_id)));
        let mut pending: Vec<PendingJoinRequest> = self.pending.values().cloned().collect();
        pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));

        SessionSnapshot {
            broadcaster: self.broadcaster.clone(),
            peers,
            pending,
            votes: self.votes.ranked(),
            voice: self.voice.members().to_vec(),
        }
    }
}
