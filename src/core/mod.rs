//! Core primitives.
//!
//! Leaf types shared by the sync layer and the simulation.

pub mod vec2;
pub mod hash;
pub mod ids;

// Re-export core types
pub use vec2::Vec2;
pub use hash::{StateHash, StateHasher};
pub use ids::{ParticipantId, SessionId, ProfileId, SlotId};
