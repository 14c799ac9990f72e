//! Game Logic Module
//!
//! The match itself: phases, timers, fighter vitals, results and the
//! per-tick simulation step. Nothing here touches the network directly;
//! outgoing operations are queued on the state's outbox.
//!
//! ## Module Structure
//!
//! - `input`: Input frames, recording, authority input channel
//! - `host`: Boundary traits for engine, backend and lobby
//! - `timer`: Countdown and lockout timers
//! - `clock`: Match clock with end-countdown threshold
//! - `vitals`: Networked fighter vitals and the out-of-bounds check
//! - `ready`: Character-select ready barrier
//! - `machine`: Match phase state machine
//! - `results`: Winner determination
//! - `state`: Per-session match state
//! - `tick`: Authoritative simulation step
//! - `events`: Game events and presentation updates

pub mod input;
pub mod host;
pub mod timer;
pub mod clock;
pub mod vitals;
pub mod ready;
pub mod machine;
pub mod results;
pub mod events;
pub mod state;
pub mod tick;

// Re-export key types
pub use input::{AuthorityInputChannel, InputFrame, InputRecording};
pub use host::{Hit, InputSource, Lobby, MatchHost, Movement, MovementStep, Persistence, ProfileStats, StageDirector};
pub use timer::{CountdownSignal, CountdownTimer, LockoutTimer};
pub use clock::{ClockReading, MatchClock};
pub use vitals::{FighterVitals, LifeOutcome, Lifecycle, StageBounds, VitalsRules};
pub use ready::{BarrierRelease, BarrierState, ReadyBarrier, ReadyEntry, SelectionIndex};
pub use machine::{MatchPhase, MatchStateMachine, PhaseTrigger, PhaseUpdate, RosterEntry, Transition};
pub use results::{Decision, EndReason, MatchResult, MatchResultsAggregator, PlayerSummary, TieBreakPolicy};
pub use events::{CountdownKind, GameEvent, GameEventData, PresentationUpdate};
pub use state::MatchState;
pub use tick::TickResult;
