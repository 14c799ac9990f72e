//! Match State Machine
//!
//! ```text
//!   Waiting ──barrier──▶ CountingDown ──countdown──▶ Running ──┬─ elimination ─▶ GameOver
//!                                                              └─ end countdown ┘
//! ```
//!
//! Only the authority requests transitions. Each state has exactly one way
//! out, so a trigger that does not match the current state is ignored;
//! that makes repeated or racing triggers harmless. Followers adopt the
//! authority's broadcast [`PhaseUpdate`] and never move on their own.

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::ids::{ParticipantId, ProfileId, SlotId};
use crate::game::ready::SelectionIndex;
use crate::game::results::EndReason;

/// Session phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Character select.
    Waiting,
    /// Start countdown running.
    CountingDown,
    /// Live play.
    Running,
    /// Match over. Terminal.
    GameOver,
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Something that may move the machine forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseTrigger {
    /// Ready barrier released.
    BarrierReleased,
    /// Start countdown reached zero.
    StartCountdownExpired,
    /// A fighter lost its last stock.
    Elimination {
        /// Eliminated fighter.
        eliminated: ParticipantId,
    },
    /// End countdown reached zero.
    TimeExpired,
}

/// Outcome of a trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The machine moved.
    Applied {
        /// Previous phase.
        from: MatchPhase,
        /// New phase.
        to: MatchPhase,
    },
    /// The trigger did not apply to the current phase.
    Ignored,
}

impl Transition {
    /// True if the machine moved.
    #[inline]
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// One fighter as handed over by the ready barrier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Participant controlling the fighter.
    pub participant: ParticipantId,
    /// Slot.
    pub slot: SlotId,
    /// Character played.
    pub selection: SelectionIndex,
    /// Display name.
    pub username: String,
    /// Backend profile.
    pub profile_id: ProfileId,
}

/// Replicated machine state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseUpdate {
    /// Current phase.
    pub phase: MatchPhase,
    /// Bumped on every applied transition.
    pub revision: u32,
    /// Tick `Running` was entered.
    pub started_at_tick: Option<u32>,
    /// Tick `GameOver` was entered.
    pub ends_at_tick: Option<u32>,
    /// Why the match ended.
    pub end_reason: Option<EndReason>,
    /// Fighters, once the barrier has released.
    pub roster: Option<[RosterEntry; 2]>,
}

/// Machine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    /// A follower tried to originate a transition.
    #[error("only the authority may request phase transitions")]
    NotAuthority,

    /// Barrier transition requested before the roster was handed over.
    #[error("roster not assigned")]
    MissingRoster,
}

/// Session-scoped state machine.
#[derive(Clone, Debug)]
pub struct MatchStateMachine {
    is_authority: bool,
    state: PhaseUpdate,
}

impl MatchStateMachine {
    /// New machine in `Waiting`.
    pub fn new(is_authority: bool) -> Self {
        Self {
            is_authority,
            state: PhaseUpdate {
                phase: MatchPhase::Waiting,
                revision: 0,
                started_at_tick: None,
                ends_at_tick: None,
                end_reason: None,
                roster: None,
            },
        }
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> MatchPhase {
        self.state.phase
    }

    /// Tick live play began.
    #[inline]
    pub fn started_at_tick(&self) -> Option<u32> {
        self.state.started_at_tick
    }

    /// Tick the match ended.
    #[inline]
    pub fn ends_at_tick(&self) -> Option<u32> {
        self.state.ends_at_tick
    }

    /// Why the match ended.
    #[inline]
    pub fn end_reason(&self) -> Option<EndReason> {
        self.state.end_reason
    }

    /// Fighters, once assigned.
    pub fn roster(&self) -> Option<&[RosterEntry; 2]> {
        self.state.roster.as_ref()
    }

    /// Roster entry for a slot.
    pub fn roster_entry(&self, slot: SlotId) -> Option<&RosterEntry> {
        self.state.roster.as_ref().map(|r| &r[slot.index()])
    }

    /// Hand over both fighters. Only accepted while `Waiting` and only once.
    pub fn assign_roster(&mut self, roster: [RosterEntry; 2]) -> bool {
        if self.state.phase != MatchPhase::Waiting || self.state.roster.is_some() {
            return false;
        }
        self.state.roster = Some(roster);
        true
    }

    /// Request a transition (authority only).
    pub fn request(&mut self, trigger: PhaseTrigger, tick: u32) -> Result<Transition, MachineError> {
        if !self.is_authority {
            return Err(MachineError::NotAuthority);
        }

        let from = self.state.phase;
        let to = match (from, trigger) {
            (MatchPhase::Waiting, PhaseTrigger::BarrierReleased) => {
                if self.state.roster.is_none() {
                    return Err(MachineError::MissingRoster);
                }
                MatchPhase::CountingDown
            }
            (MatchPhase::CountingDown, PhaseTrigger::StartCountdownExpired) => {
                self.state.started_at_tick = Some(tick);
                MatchPhase::Running
            }
            (MatchPhase::Running, PhaseTrigger::Elimination { eliminated }) => {
                self.state.ends_at_tick = Some(tick);
                self.state.end_reason = Some(EndReason::Elimination { eliminated });
                MatchPhase::GameOver
            }
            (MatchPhase::Running, PhaseTrigger::TimeExpired) => {
                self.state.ends_at_tick = Some(tick);
                self.state.end_reason = Some(EndReason::TimeExpired);
                MatchPhase::GameOver
            }
            (phase, trigger) => {
                debug!("Ignoring {:?} in phase {}", trigger, phase);
                return Ok(Transition::Ignored);
            }
        };

        self.state.phase = to;
        self.state.revision += 1;
        info!("Match phase {} -> {} at tick {}", from, to, tick);
        Ok(Transition::Applied { from, to })
    }

    /// Replicated state for broadcast.
    pub fn update(&self) -> PhaseUpdate {
        self.state.clone()
    }

    /// Adopt an authority broadcast (follower side). Updates that are not
    /// newer, or that would move the phase backwards, are dropped.
    pub fn apply_remote(&mut self, update: PhaseUpdate) -> Transition {
        if self.is_authority || update.revision <= self.state.revision || update.phase < self.state.phase {
            return Transition::Ignored;
        }
        let from = self.state.phase;
        let to = update.phase;
        self.state = update;
        if from == to {
            return Transition::Ignored;
        }
        debug!("Adopted phase {} -> {}", from, to);
        Transition::Applied { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ParticipantId = ParticipantId::new([1; 16]);
    const B: ParticipantId = ParticipantId::new([2; 16]);

    fn roster() -> [RosterEntry; 2] {
        let entry = |participant, slot| RosterEntry {
            participant,
            slot,
            selection: 0,
            username: format!("{}", participant),
            profile_id: ProfileId::new("p"),
        };
        [entry(A, SlotId::One), entry(B, SlotId::Two)]
    }

    fn running() -> MatchStateMachine {
        let mut machine = MatchStateMachine::new(true);
        machine.assign_roster(roster());
        machine.request(PhaseTrigger::BarrierReleased, 10).unwrap();
        machine.request(PhaseTrigger::StartCountdownExpired, 160).unwrap();
        machine
    }

    #[test]
    fn test_full_path() {
        let mut machine = MatchStateMachine::new(true);
        assert_eq!(machine.phase(), MatchPhase::Waiting);
        assert!(machine.assign_roster(roster()));

        assert_eq!(
            machine.request(PhaseTrigger::BarrierReleased, 10).unwrap(),
            Transition::Applied { from: MatchPhase::Waiting, to: MatchPhase::CountingDown }
        );
        assert!(machine.request(PhaseTrigger::StartCountdownExpired, 160).unwrap().applied());
        assert_eq!(machine.started_at_tick(), Some(160));

        assert!(machine.request(PhaseTrigger::TimeExpired, 9160).unwrap().applied());
        assert_eq!(machine.phase(), MatchPhase::GameOver);
        assert_eq!(machine.ends_at_tick(), Some(9160));
        assert_eq!(machine.end_reason(), Some(EndReason::TimeExpired));
    }

    #[test]
    fn test_barrier_needs_roster() {
        let mut machine = MatchStateMachine::new(true);
        assert_eq!(
            machine.request(PhaseTrigger::BarrierReleased, 0),
            Err(MachineError::MissingRoster)
        );
        assert_eq!(machine.phase(), MatchPhase::Waiting);
    }

    #[test]
    fn test_first_end_trigger_wins() {
        let mut machine = running();
        assert!(machine
            .request(PhaseTrigger::Elimination { eliminated: B }, 500)
            .unwrap()
            .applied());
        assert_eq!(machine.request(PhaseTrigger::TimeExpired, 500).unwrap(), Transition::Ignored);
        assert_eq!(
            machine.request(PhaseTrigger::Elimination { eliminated: A }, 501).unwrap(),
            Transition::Ignored
        );
        assert_eq!(machine.end_reason(), Some(EndReason::Elimination { eliminated: B }));
        assert_eq!(machine.ends_at_tick(), Some(500));
    }

    #[test]
    fn test_out_of_order_triggers_ignored() {
        let mut machine = MatchStateMachine::new(true);
        machine.assign_roster(roster());
        assert_eq!(machine.request(PhaseTrigger::TimeExpired, 0).unwrap(), Transition::Ignored);
        assert_eq!(machine.request(PhaseTrigger::StartCountdownExpired, 0).unwrap(), Transition::Ignored);
        machine.request(PhaseTrigger::BarrierReleased, 1).unwrap();
        assert_eq!(machine.request(PhaseTrigger::BarrierReleased, 2).unwrap(), Transition::Ignored);
    }

    #[test]
    fn test_running_entered_once() {
        let mut machine = running();
        assert_eq!(machine.request(PhaseTrigger::StartCountdownExpired, 200).unwrap(), Transition::Ignored);
        assert_eq!(machine.started_at_tick(), Some(160));
    }

    #[test]
    fn test_roster_assigned_once() {
        let mut machine = MatchStateMachine::new(true);
        assert!(machine.assign_roster(roster()));
        assert!(!machine.assign_roster(roster()));
        assert_eq!(machine.roster_entry(SlotId::Two).unwrap().participant, B);
    }

    #[test]
    fn test_follower_cannot_request() {
        let mut machine = MatchStateMachine::new(false);
        assert_eq!(
            machine.request(PhaseTrigger::BarrierReleased, 0),
            Err(MachineError::NotAuthority)
        );
    }

    #[test]
    fn test_follower_adopts_in_order() {
        let mut authority = MatchStateMachine::new(true);
        let mut follower = MatchStateMachine::new(false);
        authority.assign_roster(roster());

        authority.request(PhaseTrigger::BarrierReleased, 1).unwrap();
        let countdown = authority.update();
        authority.request(PhaseTrigger::StartCountdownExpired, 2).unwrap();
        let running = authority.update();

        assert!(follower.apply_remote(running.clone()).applied());
        assert_eq!(follower.phase(), MatchPhase::Running);
        // Late delivery of the older update is dropped.
        assert_eq!(follower.apply_remote(countdown), Transition::Ignored);
        assert_eq!(follower.apply_remote(running), Transition::Ignored);
        assert_eq!(follower.phase(), MatchPhase::Running);
        assert_eq!(follower.roster().map(|r| r[0].participant), Some(A));
    }
}
