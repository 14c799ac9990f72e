//! External Collaborators
//!
//! Boundary traits for everything the core does not own: input devices,
//! physics, scene management, the backend profile service and the lobby.
//! A host application implements them once and passes itself into the
//! session each tick.

use serde::{Serialize, Deserialize};

use crate::core::ids::{ParticipantId, ProfileId, SessionId, SlotId};
use crate::core::vec2::Vec2;
use crate::game::input::InputFrame;
use crate::game::ready::SelectionIndex;
use crate::game::results::MatchResult;

/// Local input device.
pub trait InputSource {
    /// Sample the device. Called once per tick by the input channel.
    fn poll_local_input(&mut self) -> InputFrame;
}

/// A hit registered by physics: `attacker` struck `victim` for `amount`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    /// Fighter that landed the hit.
    pub attacker: ParticipantId,
    /// Fighter that was struck.
    pub victim: ParticipantId,
    /// Raw damage. Negative values are treated as zero.
    pub amount: i32,
}

/// Result of one physics step for one fighter.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MovementStep {
    /// New position.
    pub position: Vec2,
    /// New velocity.
    pub velocity: Vec2,
    /// Hits this fighter landed during the step.
    pub hits: Vec<Hit>,
}

/// Physics and movement, owned by the engine.
pub trait Movement {
    /// Advance one fighter by one tick. `can_act` is false while the fighter
    /// is locked out after a hit, respawning or eliminated; the input passed
    /// is then neutral.
    fn step(
        &mut self,
        fighter: ParticipantId,
        input: &InputFrame,
        can_act: bool,
        position: Vec2,
        velocity: Vec2,
    ) -> MovementStep;
}

/// Scene management during character select and spawn.
pub trait StageDirector {
    /// Ask for a stage to be chosen and loaded.
    fn select_stage(&mut self) {}

    /// Remove the character-select placeholder entities.
    fn despawn_selection_placeholders(&mut self) {}

    /// Spawn the selected fighter entity.
    fn spawn_fighter(&mut self, _fighter: ParticipantId, _slot: SlotId, _selection: SelectionIndex, _at: Vec2) {}

    /// Remove a fighter entity (elimination or teardown).
    fn despawn_fighter(&mut self, _fighter: ParticipantId) {}
}

/// Backend profile statistics shown on the results screen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStats {
    /// Profile identifier.
    pub profile_id: ProfileId,
    /// Lifetime wins.
    pub wins: u32,
    /// Lifetime losses.
    pub losses: u32,
    /// Lifetime kills.
    pub kills: u32,
}

/// Backend persistence service.
pub trait Persistence {
    /// Store a finished match. Called exactly once per session.
    fn record_match_result(&mut self, result: &MatchResult);

    /// Look up a profile during character select.
    fn fetch_profile(&mut self, _profile: &ProfileId) -> Option<ProfileStats> {
        None
    }
}

/// Lobby / menu layer that receives aborted sessions.
pub trait Lobby {
    /// The session was torn down; participants return to the menu.
    fn session_ended(&mut self, _session: SessionId, _reason: &str) {}
}

/// Everything a session needs from its host.
pub trait MatchHost: InputSource + Movement + StageDirector + Persistence + Lobby {}

impl<T> MatchHost for T where T: InputSource + Movement + StageDirector + Persistence + Lobby {}
