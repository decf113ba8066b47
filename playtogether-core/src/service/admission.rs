//! Join-request workflow
//!
//! A watcher asks to join, the broadcaster approves or rejects. Only an
//! approved watcher is allowed to start the watch flow.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{Outbox, SessionRegistry};
use crate::metrics::ADMISSION_DECISIONS;
use crate::models::{ApprovalState, PeerId, PeerRecord, PendingJoinRequest};
use crate::protocol::ServerMessage;
use crate::{Error, Result};

pub const DEFAULT_NICKNAME: &str = "Anonymous";

#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionController;

impl AdmissionController {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Record a join request and forward it to the broadcaster.
    ///
    /// Repeated requests while one is pending, or from an already admitted
    /// peer, change nothing.
    pub fn request_join(
        &self,
        registry: &mut SessionRegistry,
        peer_id: &PeerId,
        nickname: &str,
        now: DateTime<Utc>,
    ) -> Outbox {
        let mut outbox = Outbox::new();

        if registry.pending(peer_id).is_some() {
            debug!(peer_id = %peer_id, "Join request already pending");
            return outbox;
        }
        if registry.get(peer_id).is_some_and(|r| r.approval.is_admitted()) {
            debug!(peer_id = %peer_id, "Join request from admitted peer ignored");
            return outbox;
        }

        let nickname = normalize_nickname(nickname);
        registry.insert_pending(PendingJoinRequest {
            peer_id: peer_id.clone(),
            nickname: nickname.clone(),
            requested_at: now,
        });
        registry.upsert(PeerRecord::new(peer_id.clone(), nickname.clone(), now));
        ADMISSION_DECISIONS.with_label_values(&["requested"]).inc();

        info!(peer_id = %peer_id, nickname = %nickname, "Join request received");
        outbox.to_broadcaster(ServerMessage::PeerRequest {
            peer_id: peer_id.clone(),
            nickname,
        });
        outbox
    }

    /// Apply the broadcaster's decision on a pending request.
    ///
    /// A rejected peer is forgotten and told nothing.
    pub fn decide(
        &self,
        registry: &mut SessionRegistry,
        from: &PeerId,
        peer_id: &PeerId,
        approved: bool,
    ) -> Result<Outbox> {
        if !registry.is_broadcaster(from) {
            return Err(Error::Authorization(
                "only the broadcaster may decide join requests".to_string(),
            ));
        }
        let request = registry
            .take_pending(peer_id)
            .ok_or_else(|| Error::NotFound(format!("no pending join request for {peer_id}")))?;

        let mut outbox = Outbox::new();
        if approved {
            let updated = registry.update(peer_id, |record| record.approval = ApprovalState::Approved);
            if !updated {
                let mut record = PeerRecord::new(peer_id.clone(), request.nickname, request.requested_at);
                record.approval = ApprovalState::Approved;
                registry.upsert(record);
            }
            ADMISSION_DECISIONS.with_label_values(&["approved"]).inc();
            info!(peer_id = %peer_id, "Join request approved");
            outbox.to_peer(peer_id, ServerMessage::JoinDecision { approved: true });
        } else {
            registry.remove(peer_id);
            ADMISSION_DECISIONS.with_label_values(&["rejected"]).inc();
            info!(peer_id = %peer_id, "Join request rejected");
        }
        Ok(outbox)
    }
}

pub(crate) fn normalize_nickname(nickname: &str) -> String {
    let trimmed = nickname.trim();
    if trimmed.is_empty() {
        DEFAULT_NICKNAME.to_string()
    } else {
        trimmed.to_string()
    }
}
