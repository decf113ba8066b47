use crate::models::PeerId;
use crate::protocol::ServerMessage;

/// Where a frame should go. Resolved by the transport at delivery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Peer(PeerId),
    /// Whoever is the current broadcaster when the frame is delivered.
    Broadcaster,
    All,
    AllExcept(PeerId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub to: Recipient,
    pub message: ServerMessage,
}

/// Frames produced by one handler invocation, in send order.
#[derive(Debug, Default)]
pub struct Outbox {
    envelopes: Vec<Envelope>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, to: Recipient, message: ServerMessage) {
        self.envelopes.push(Envelope { to, message });
    }

    pub fn to_peer(&mut self, peer_id: &PeerId, message: ServerMessage) {
        self.push(Recipient::Peer(peer_id.clone()), message);
    }

    pub fn to_broadcaster(&mut self, message: ServerMessage) {
        self.push(Recipient::Broadcaster, message);
    }

    pub fn extend(&mut self, other: Self) {
        self.envelopes.extend(other.envelopes);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    #[must_use]
    pub fn envelopes(&self) -> &[Envelope] {
        &self.envelopes
    }

    /// Frames addressed to `recipient`, for assertions and delivery.
    pub fn messages_for<'a>(&'a self, recipient: &Recipient) -> impl Iterator<Item = &'a ServerMessage> + 'a {
        let recipient = recipient.clone();
        self.envelopes
            .iter()
            .filter(move |e| e.to == recipient)
            .map(|e| &e.message)
    }
}

impl IntoIterator for Outbox {
    type Item = Envelope;
    type IntoIter = std::vec::IntoIter<Envelope>;

    fn into_iter(self) -> Self::IntoIter {
        self.envelopes.into_iter()
    }
}

impl From<Envelope> for Outbox {
    fn from(envelope: Envelope) -> Self {
        Self {
            envelopes: vec![envelope],
        }
    }
}
