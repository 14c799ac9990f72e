//! Network Layer
//!
//! Peer protocol, transports and session plumbing. Game rules live in
//! `game/`; this layer decides who may send what and moves bytes.

pub mod protocol;
pub mod transport;
pub mod session;
pub mod driver;

pub use protocol::{PeerMessage, PropertyEntry, ProtocolError, Snapshot};
pub use transport::{ChannelTransport, Envelope, LoopbackEndpoint, LoopbackHub, Transport};
pub use session::{MatchSession, SessionError, SessionManager, SessionParticipant, SessionState};
pub use driver::{run_session, DriverConfig};
