//! # Duel Sync
//!
//! Session core for a two-player real-time fighting match: one peer is the
//! authority and simulates, the other follows its broadcasts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       DUEL SYNC                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── vec2.rs     - 2D vector                                 │
//! │  ├── ids.rs      - Participant, slot, profile ids            │
//! │  └── hash.rs     - State digests for resync checks           │
//! │                                                              │
//! │  sync/           - Single-arbiter replication                │
//! │  ├── value.rs    - Property keys, values, commands           │
//! │  ├── property.rs - NetworkedProperty<T>                      │
//! │  └── outbox.rs   - Outgoing command queue                    │
//! │                                                              │
//! │  game/           - Match rules                               │
//! │  ├── input.rs    - Authority input channel                   │
//! │  ├── timer.rs    - Countdown and lockout timers              │
//! │  ├── clock.rs    - Match clock                               │
//! │  ├── vitals.rs   - Fighter vitals, out-of-bounds             │
//! │  ├── ready.rs    - Ready barrier                             │
//! │  ├── machine.rs  - Phase state machine                       │
//! │  ├── results.rs  - Results aggregator                        │
//! │  ├── state.rs    - Per-session match state                   │
//! │  └── tick.rs     - Simulation step                           │
//! │                                                              │
//! │  network/        - Sessions and transport                    │
//! │  ├── protocol.rs - Peer messages                             │
//! │  ├── transport.rs- Loopback and channel transports           │
//! │  ├── session.rs  - Match session, session manager            │
//! │  └── driver.rs   - Fixed-rate async driver                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Only the authority changes canonical state. Followers propose
//! property changes and forward input; every value a follower displays
//! arrived in an authority broadcast, so both peers converge on the
//! authority's view. Fighters are kept in BTreeMaps so both peers walk
//! them in the same order.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod sync;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{MatchConfig, SessionConfig};
pub use core::ids::{ParticipantId, ProfileId, SessionId, SlotId};
pub use core::vec2::Vec2;
pub use sync::property::NetworkedProperty;
pub use game::host::MatchHost;
pub use game::input::{AuthorityInputChannel, InputFrame};
pub use game::machine::{MatchPhase, MatchStateMachine};
pub use game::results::{MatchResult, MatchResultsAggregator};
pub use game::state::MatchState;
pub use network::session::{MatchSession, SessionError, SessionManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = config::DEFAULT_TICK_RATE;
