//! Identifiers
//!
//! Participants, sessions, backend profiles and character-select slots.

use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Unique participant (peer) identifier, UUID as bytes.
///
/// Implements Ord so participant-keyed BTreeMaps iterate in the same order
/// on every peer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ParticipantId(pub [u8; 16]);

impl ParticipantId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create a fresh random id.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Participant({})", self.short())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Backend profile identifier (opaque to the core).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ProfileId(pub String);

impl ProfileId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// SLOT ID
// =============================================================================

/// Character-select slot. A duel has exactly two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SlotId {
    /// First slot (left spawn)
    One = 0,
    /// Second slot (right spawn)
    Two = 1,
}

impl SlotId {
    /// Both slots in order.
    pub const ALL: [SlotId; 2] = [SlotId::One, SlotId::Two];

    /// Array index for this slot.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The opposing slot.
    #[inline]
    pub fn other(self) -> SlotId {
        match self {
            SlotId::One => SlotId::Two,
            SlotId::Two => SlotId::One,
        }
    }

    /// Slot from index (0-1).
    pub fn from_index(index: u8) -> Option<SlotId> {
        match index {
            0 => Some(SlotId::One),
            1 => Some(SlotId::Two),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_uuid_roundtrip() {
        let id = ParticipantId::random();
        let parsed = ParticipantId::from_uuid_str(&id.to_uuid_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(ParticipantId::from_uuid_str("not-a-uuid").is_none());
    }

    #[test]
    fn test_participant_short() {
        let id = ParticipantId::new([0xde; 16]);
        assert_eq!(id.short(), "dededede");
        assert_eq!(format!("{:?}", id), "Participant(dededede)");
    }

    #[test]
    fn test_slot_other() {
        assert_eq!(SlotId::One.other(), SlotId::Two);
        assert_eq!(SlotId::Two.other(), SlotId::One);
        assert_eq!(SlotId::from_index(1), Some(SlotId::Two));
        assert_eq!(SlotId::from_index(2), None);
        assert_eq!(SlotId::Two.index(), 1);
    }
}
