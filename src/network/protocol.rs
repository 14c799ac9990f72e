//! Protocol Messages
//!
//! Typed peer-to-peer operations. Every invocation the session makes goes
//! through [`PeerMessage`]; role checks happen where the message is
//! handled, not in the type.
//!
//! Messages are serialized as JSON for debugging ease, with binary
//! (bincode) for the channel transport. Enums are externally tagged so
//! both codecs accept them.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::StateHash;
use crate::core::ids::{ParticipantId, ProfileId, SlotId};
use crate::game::clock::ClockReading;
use crate::game::events::CountdownKind;
use crate::game::input::InputFrame;
use crate::game::machine::PhaseUpdate;
use crate::game::ready::SelectionIndex;
use crate::game::results::MatchResult;
use crate::sync::value::{PropertyKey, PropertyValue, Revision, SyncCommand};

// =============================================================================
// PEER MESSAGES
// =============================================================================

/// Operations exchanged between the two peers of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerMessage {
    /// Property proposal or authoritative change.
    Sync(SyncCommand),

    /// Follower input for a tick (to authority).
    Input {
        /// Follower tick the frame was polled on.
        tick: u32,
        /// Polled frame.
        frame: InputFrame,
    },

    /// Slot readied up in character select (to authority).
    SelectionReady {
        /// Slot being readied.
        slot: SlotId,
        /// Chosen character.
        selection: SelectionIndex,
        /// Display name.
        username: String,
        /// Backend profile.
        profile_id: ProfileId,
    },

    /// Slot withdrew its ready (to authority).
    SelectionCleared {
        /// Slot.
        slot: SlotId,
    },

    /// Authoritative phase state (to all).
    PhaseChanged(PhaseUpdate),

    /// Countdown display second (to all).
    Countdown {
        /// Which countdown.
        kind: CountdownKind,
        /// Seconds showing.
        seconds: u32,
    },

    /// Countdown hold finished (to all).
    CountdownCleared {
        /// Which countdown.
        kind: CountdownKind,
    },

    /// Match clock reading (to all, once per second).
    Clock(ClockReading),

    /// Fighter took a hit (to all, presentation only).
    HitFeedback {
        /// Fighter hit.
        fighter: ParticipantId,
        /// Lockout length in ticks.
        lockout_ticks: u32,
    },

    /// Final result (to all).
    MatchOver(MatchResult),

    /// Full replicated state (to one follower).
    Snapshot(Snapshot),

    /// Follower asks for a snapshot (to authority).
    ResyncRequest,

    /// Sender is leaving the session.
    Leave,

    /// Authority tore the session down.
    Abort {
        /// Generic reason text.
        reason: String,
    },
}

/// One property inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyEntry {
    /// Property.
    pub key: PropertyKey,
    /// Canonical value.
    pub value: PropertyValue,
    /// Revision of that value.
    pub revision: Revision,
}

/// Everything a follower needs to realign with the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Authority tick.
    pub tick: u32,
    /// Machine state (phase, roster, start/end ticks).
    pub phase: PhaseUpdate,
    /// Every fighter property in key order.
    pub properties: Vec<PropertyEntry>,
    /// Match clock.
    pub clock: ClockReading,
    /// Digest over phase and properties.
    pub digest: StateHash,
}

/// Codec errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encode/decode failed.
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encode/decode failed.
    #[error("binary codec: {0}")]
    Binary(#[from] bincode::Error),
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl PeerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Short operation name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            PeerMessage::Sync(SyncCommand::Propose { .. }) => "propose",
            PeerMessage::Sync(SyncCommand::Changed { .. }) => "changed",
            PeerMessage::Input { .. } => "input",
            PeerMessage::SelectionReady { .. } => "selection_ready",
            PeerMessage::SelectionCleared { .. } => "selection_cleared",
            PeerMessage::PhaseChanged(_) => "phase_changed",
            PeerMessage::Countdown { .. } => "countdown",
            PeerMessage::CountdownCleared { .. } => "countdown_cleared",
            PeerMessage::Clock(_) => "clock",
            PeerMessage::HitFeedback { .. } => "hit_feedback",
            PeerMessage::MatchOver(_) => "match_over",
            PeerMessage::Snapshot(_) => "snapshot",
            PeerMessage::ResyncRequest => "resync_request",
            PeerMessage::Leave => "leave",
            PeerMessage::Abort { .. } => "abort",
        }
    }
}
