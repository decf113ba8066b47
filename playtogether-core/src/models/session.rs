use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::PeerId;

/// The endpoint currently streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterSession {
    pub id: PeerId,
    pub active_since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingJoinRequest {
    pub peer_id: PeerId,
    pub nickname: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEntry {
    pub title: String,
    pub count: u32,
}

/// Game votes, kept until the broadcaster clears them.
#[derive(Debug, Clone, Default)]
pub struct VoteTally {
    votes: HashMap<String, u32>,
}

impl VoteTally {
    /// Count one vote and return the new total for `title`.
    pub fn record(&mut self, title: &str) -> u32 {
        let count = self.votes.entry(title.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn clear(&mut self) {
        self.votes.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Titles by descending count, ties broken alphabetically.
    #[must_use]
    pub fn ranked(&self) -> Vec<VoteEntry> {
        let mut entries: Vec<VoteEntry> = self
            .votes
            .iter()
            .map(|(title, count)| VoteEntry {
                title: title.clone(),
                count: *count,
            })
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.title.cmp(&b.title)));
        entries
    }
}

/// Someone in the voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMember {
    pub id: PeerId,
    pub nickname: String,
}

/// Voice channel roster in join order.
#[derive(Debug, Clone, Default)]
pub struct VoiceRoom {
    members: Vec<VoiceMember>,
}

impl VoiceRoom {
    /// Add `id`, or rename it if already present. Returns `true` for a new member.
    pub fn join(&mut self, id: &PeerId, nickname: &str) -> bool {
        if let Some(member) = self.members.iter_mut().find(|m| m.id == *id) {
            member.nickname = nickname.to_string();
            return false;
        }
        self.members.push(VoiceMember {
            id: id.clone(),
            nickname: nickname.to_string(),
        });
        true
    }

    pub fn leave(&mut self, id: &PeerId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.id != *id);
        self.members.len() != before
    }

    #[must_use]
    pub fn contains(&self, id: &PeerId) -> bool {
        self.members.iter().any(|m| m.id == *id)
    }

    #[must_use]
    pub fn members(&self) -> &[VoiceMember] {
        &self.members
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
