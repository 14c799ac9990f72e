//! Game Events
//!
//! Tick-stamped events produced by the authoritative tick, plus the
//! presentation updates fanned out to UI observers.

use serde::{Serialize, Deserialize};

use crate::core::ids::ParticipantId;
use crate::game::machine::MatchPhase;
use crate::game::results::{EndReason, MatchResult};
use crate::sync::value::{PropertyKey, PropertyValue};

/// Priority for event processing order.
///
/// Lower value = processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Eliminations first: they decide the match
    Elimination = 0,
    /// Then ordinary life losses
    LifeLost = 1,
    /// Then hits
    Hit = 2,
    /// Then phase changes
    Phase = 3,
    /// Then countdown display
    Countdown = 4,
    /// Lowest priority
    Other = 255,
}

/// Which countdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountdownKind {
    /// Barrier release to live play.
    Start,
    /// Clock threshold to game over.
    End,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventData {
    /// Both slots ready; fighters spawned
    BarrierReleased,

    /// Match phase changed
    PhaseChanged {
        /// Phase left
        from: MatchPhase,
        /// Phase entered
        to: MatchPhase,
    },

    /// Countdown showing a new second
    CountdownTick {
        /// Which countdown
        kind: CountdownKind,
        /// Seconds left on display
        seconds: u32,
    },

    /// Countdown reached zero
    CountdownExpired {
        /// Which countdown
        kind: CountdownKind,
    },

    /// Hit registered
    HitLanded {
        /// Fighter that landed the hit
        attacker: ParticipantId,
        /// Fighter that was struck
        victim: ParticipantId,
        /// Damage after clamping
        amount: u32,
    },

    /// Fighter fell off the stage but has stocks left
    LifeLost {
        /// Fighter that fell
        fighter: ParticipantId,
        /// Stocks remaining
        stocks_left: i32,
    },

    /// Fighter lost its last stock
    FighterEliminated {
        /// Fighter out of the match
        fighter: ParticipantId,
        /// Opponent credited with the kill
        by: Option<ParticipantId>,
    },

    /// Match ended
    MatchEnded {
        /// Winner, `None` on a draw
        winner: Option<ParticipantId>,
        /// Why the match ended
        reason: EndReason,
    },
}

/// A game event with timing and priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when event occurred
    pub tick: u32,

    /// Processing priority
    pub priority: EventPriority,

    /// Participant involved (for tie-breaking)
    pub participant: Option<ParticipantId>,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event. Priority and participant follow from the data.
    pub fn new(tick: u32, data: GameEventData) -> Self {
        let (priority, participant) = match &data {
            GameEventData::FighterEliminated { fighter, .. } => (EventPriority::Elimination, Some(*fighter)),
            GameEventData::LifeLost { fighter, .. } => (EventPriority::LifeLost, Some(*fighter)),
            GameEventData::HitLanded { victim, .. } => (EventPriority::Hit, Some(*victim)),
            GameEventData::PhaseChanged { .. } | GameEventData::BarrierReleased => (EventPriority::Phase, None),
            GameEventData::CountdownTick { .. } | GameEventData::CountdownExpired { .. } => {
                (EventPriority::Countdown, None)
            }
            GameEventData::MatchEnded { winner, .. } => (EventPriority::Other, *winner),
        };

        Self {
            tick,
            priority,
            participant,
            data,
        }
    }
}

impl PartialEq for GameEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick
            && self.priority == other.priority
            && self.participant == other.participant
    }
}

impl Eq for GameEvent {}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: tick, then priority, then participant
        self.tick
            .cmp(&other.tick)
            .then(self.priority.cmp(&other.priority))
            .then(self.participant.cmp(&other.participant))
    }
}

// =============================================================================
// PRESENTATION
// =============================================================================

/// Updates for UI observers, published on the session's broadcast channel.
#[derive(Clone, Debug, PartialEq)]
pub enum PresentationUpdate {
    /// A networked property changed value (health, stocks, nickname).
    PropertyChanged {
        /// Property.
        key: PropertyKey,
        /// New value.
        value: PropertyValue,
    },
    /// Countdown text to show.
    Countdown {
        /// Which countdown.
        kind: CountdownKind,
        /// Display string.
        text: String,
    },
    /// Countdown hold window over; clear the text.
    CountdownCleared {
        /// Which countdown.
        kind: CountdownKind,
    },
    /// Match time remaining, whole seconds.
    Clock {
        /// Seconds left.
        remaining_seconds: u32,
    },
    /// Fighter was hit; flash and lock input.
    HitFeedback {
        /// Fighter hit.
        fighter: ParticipantId,
        /// Lockout length.
        lockout_ticks: u32,
    },
    /// Phase changed.
    Phase(MatchPhase),
    /// Final result.
    Results(Box<MatchResult>),
    /// Session torn down; return to the menu.
    SessionEnded {
        /// Generic reason text.
        reason: String,
    },
}

impl PresentationUpdate {
    /// Countdown display text for a tick signal. Zero shows as "GO!" at the
    /// start and "TIME!" at the end.
    pub fn countdown_text(kind: CountdownKind, seconds: u32) -> String {
        match (kind, seconds) {
            (CountdownKind::Start, 0) => "GO!".to_string(),
            (CountdownKind::End, 0) => "TIME!".to_string(),
            (_, n) => n.to_string(),
        }
    }
}
