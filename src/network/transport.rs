//! Transport
//!
//! Moves [`PeerMessage`]s between the peers of a session. Delivery is
//! ordered per sender and best effort: a message to a disconnected peer
//! is dropped silently. Two implementations:
//!
//! - [`LoopbackHub`]: in-process queues, for tests and local play.
//! - [`ChannelTransport`]: bincode frames over tokio mpsc channels, the
//!   shape a socket-backed transport takes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::ids::ParticipantId;
use crate::network::protocol::PeerMessage;

/// A message and its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Sending participant.
    pub from: ParticipantId,
    /// Payload.
    pub message: PeerMessage,
}

/// One peer's connection to the rest of the session.
pub trait Transport {
    /// Participant this endpoint belongs to.
    fn local(&self) -> ParticipantId;

    /// Queue a message for `to`. Never blocks.
    fn send(&mut self, to: ParticipantId, envelope: Envelope);

    /// Everything received since the last call, in arrival order.
    fn receive(&mut self) -> Vec<Envelope>;
}

// =============================================================================
// LOOPBACK
// =============================================================================

type Queues = BTreeMap<ParticipantId, VecDeque<Envelope>>;

/// In-process message hub. Every endpoint shares one set of queues.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    queues: Arc<Mutex<Queues>>,
}

impl LoopbackHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a participant and return its endpoint.
    pub fn endpoint(&self, participant: ParticipantId) -> LoopbackEndpoint {
        self.with_queues(|queues| {
            queues.entry(participant).or_default();
        });
        LoopbackEndpoint {
            local: participant,
            hub: self.clone(),
        }
    }

    /// Disconnect a participant; queued and future messages to it are
    /// dropped.
    pub fn disconnect(&self, participant: &ParticipantId) {
        self.with_queues(|queues| {
            queues.remove(participant);
        });
    }

    /// True if the participant has an endpoint.
    pub fn is_connected(&self, participant: &ParticipantId) -> bool {
        self.with_queues(|queues| queues.contains_key(participant))
    }

    fn with_queues<R>(&self, f: impl FnOnce(&mut Queues) -> R) -> R {
        // A poisoned lock only means another endpoint panicked mid-push.
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut queues)
    }
}

/// One participant's side of a [`LoopbackHub`].
#[derive(Debug, Clone)]
pub struct LoopbackEndpoint {
    local: ParticipantId,
    hub: LoopbackHub,
}

impl Transport for LoopbackEndpoint {
    fn local(&self) -> ParticipantId {
        self.local
    }

    fn send(&mut self, to: ParticipantId, envelope: Envelope) {
        self.hub.with_queues(|queues| match queues.get_mut(&to) {
            Some(queue) => queue.push_back(envelope),
            None => debug!("Dropping {} to disconnected {}", envelope.message.name(), to),
        });
    }

    fn receive(&mut self) -> Vec<Envelope> {
        let local = self.local;
        self.hub.with_queues(|queues| {
            queues
                .get_mut(&local)
                .map(|queue| queue.drain(..).collect())
                .unwrap_or_default()
        })
    }
}

// =============================================================================
// CHANNEL
// =============================================================================

/// Binary frame on the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sender.
    pub from: ParticipantId,
    /// bincode-encoded [`PeerMessage`].
    pub payload: Vec<u8>,
}

/// Endpoint backed by tokio channels carrying bincode frames. Peers are
/// wired up with [`connect`](Self::connect).
#[derive(Debug)]
pub struct ChannelTransport {
    local: ParticipantId,
    inbox_tx: mpsc::UnboundedSender<Frame>,
    inbox: mpsc::UnboundedReceiver<Frame>,
    peers: BTreeMap<ParticipantId, mpsc::UnboundedSender<Frame>>,
}

impl ChannelTransport {
    /// Create an unconnected endpoint.
    pub fn new(local: ParticipantId) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Self {
            local,
            inbox_tx,
            inbox,
            peers: BTreeMap::new(),
        }
    }

    /// Sender other endpoints use to reach this one.
    pub fn sender(&self) -> mpsc::UnboundedSender<Frame> {
        self.inbox_tx.clone()
    }

    /// Route messages for `peer` through `sender`.
    pub fn connect(&mut self, peer: ParticipantId, sender: mpsc::UnboundedSender<Frame>) {
        self.peers.insert(peer, sender);
    }

    /// Wire two endpoints to each other.
    pub fn pair(a: ParticipantId, b: ParticipantId) -> (Self, Self) {
        let mut left = Self::new(a);
        let mut right = Self::new(b);
        left.connect(b, right.sender());
        right.connect(a, left.sender());
        (left, right)
    }
}

impl Transport for ChannelTransport {
    fn local(&self) -> ParticipantId {
        self.local
    }

    fn send(&mut self, to: ParticipantId, envelope: Envelope) {
        let payload = match envelope.message.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {}: {}", envelope.message.name(), e);
                return;
            }
        };
        let sender = if to == self.local { Some(&self.inbox_tx) } else { self.peers.get(&to) };
        let Some(sender) = sender else {
            debug!("No route to {}", to);
            return;
        };
        if sender.send(Frame { from: envelope.from, payload }).is_err() {
            debug!("Peer {} hung up", to);
            self.peers.remove(&to);
        }
    }

    fn receive(&mut self) -> Vec<Envelope> {
        let mut received = Vec::new();
        while let Ok(frame) = self.inbox.try_recv() {
            match PeerMessage::from_bytes(&frame.payload) {
                Ok(message) => received.push(Envelope {
                    from: frame.from,
                    message,
                }),
                Err(e) => warn!("Dropping undecodable frame from {}: {}", frame.from, e),
            }
        }
        received
    }
}
