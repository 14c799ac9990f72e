//! Outgoing Command Queue
//!
//! Everything a session wants to send during a tick is queued here and
//! handed to the transport in one flush. Sends never block the tick.

use serde::{Serialize, Deserialize};

use crate::core::ids::ParticipantId;
use crate::network::protocol::PeerMessage;
use crate::sync::value::SyncCommand;

/// Delivery target of an invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", content = "peer", rename_all = "snake_case")]
pub enum InvokeTarget {
    /// Deliver back to the sender only.
    Local,
    /// Deliver to every other participant.
    All,
    /// Deliver to the session authority.
    Authority,
    /// Deliver to one specific participant.
    Peer(ParticipantId),
}

/// A queued invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Outgoing {
    /// Where it goes.
    pub target: InvokeTarget,
    /// What it carries.
    pub message: PeerMessage,
}

/// FIFO queue of outgoing invocations.
///
/// Order of pushes is preserved through `drain`, which is what gives
/// per-property ordering: all changes to one property are pushed by the
/// single authority in apply order.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Outgoing>,
}

impl Outbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message.
    pub fn push(&mut self, target: InvokeTarget, message: PeerMessage) {
        self.queue.push(Outgoing { target, message });
    }

    /// Queue a replication command.
    pub fn push_sync(&mut self, target: InvokeTarget, command: SyncCommand) {
        self.push(target, PeerMessage::Sync(command));
    }

    /// Take everything queued so far, in push order.
    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.queue)
    }

    /// Peek at queued messages.
    pub fn iter(&self) -> impl Iterator<Item = &Outgoing> {
        self.queue.iter()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
