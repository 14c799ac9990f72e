//! Replicated Values
//!
//! Wire-level addressing and encoding for networked properties.

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::ids::ParticipantId;

/// Monotonic per-property revision, bumped by every authoritative change.
pub type Revision = u32;

/// Which vitals field a property carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyField {
    /// Accumulated damage taken this life.
    Health,
    /// Lives remaining.
    Stocks,
    /// Display name.
    Nickname,
}

/// Address of one networked property: a fighter plus a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyKey {
    /// Fighter the property belongs to.
    pub fighter: ParticipantId,
    /// Field on that fighter.
    pub field: PropertyField,
}

impl PropertyKey {
    /// Create a key.
    pub const fn new(fighter: ParticipantId, field: PropertyField) -> Self {
        Self { fighter, field }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:?}", self.fighter, self.field)
    }
}

/// Encoded property value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    /// Integer counters (health, stocks).
    Int(i32),
    /// Text (nickname).
    Text(String),
}

/// Types that can live inside a [`NetworkedProperty`](super::property::NetworkedProperty).
pub trait SyncValue: Clone + PartialEq + fmt::Debug + Send + 'static {
    /// Encode for the wire.
    fn to_value(&self) -> PropertyValue;

    /// Decode from the wire. `None` if the variant does not match.
    fn from_value(value: &PropertyValue) -> Option<Self>;
}

impl SyncValue for i32 {
    fn to_value(&self) -> PropertyValue {
        PropertyValue::Int(*self)
    }

    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl SyncValue for String {
    fn to_value(&self) -> PropertyValue {
        PropertyValue::Text(self.clone())
    }

    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Replication commands carried by the transport.
///
/// Externally tagged so the same types go through both the JSON and the
/// bincode codec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCommand {
    /// Follower asks the authority to set a value.
    Propose {
        /// Target property.
        key: PropertyKey,
        /// Requested value.
        value: PropertyValue,
        /// Last revision the proposer had applied.
        base_revision: Revision,
    },

    /// Authority announces an applied value.
    Changed {
        /// Changed property.
        key: PropertyKey,
        /// New canonical value.
        value: PropertyValue,
        /// Revision after the change.
        revision: Revision,
    },
}

impl SyncCommand {
    /// Property this command addresses.
    pub fn key(&self) -> PropertyKey {
        match self {
            SyncCommand::Propose { key, .. } | SyncCommand::Changed { key, .. } => *key,
        }
    }
}

/// Sync-layer errors. Inbound commands that fail these checks are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Operation requires the authority role.
    #[error("{key}: only the authority may {operation}")]
    NotAuthority {
        /// Property involved.
        key: PropertyKey,
        /// What was attempted.
        operation: &'static str,
    },

    /// Proposal came from a peer that does not own the property.
    #[error("{key}: proposal from non-owner {from}")]
    NotOwner {
        /// Property involved.
        key: PropertyKey,
        /// Offending peer.
        from: ParticipantId,
    },

    /// No property registered under this key.
    #[error("unknown property {0}")]
    UnknownProperty(PropertyKey),

    /// Encoded value has the wrong variant for the property.
    #[error("{0}: value type mismatch")]
    ValueTypeMismatch(PropertyKey),

    /// Property only changes through the authority's own simulation.
    #[error("{key}: not writable by proposal from {from}")]
    NotProposable {
        /// Property involved.
        key: PropertyKey,
        /// Offending peer.
        from: ParticipantId,
    },
}
