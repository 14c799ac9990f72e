//! Replication Layer
//!
//! Single-arbiter state sync: followers propose, the authority applies and
//! broadcasts, everyone applies the broadcast.
//!
//! - `value`: property keys, encoded values, replication commands
//! - `property`: `NetworkedProperty<T>` with revisions and change listeners
//! - `outbox`: fire-and-forget queue drained into the transport each tick

pub mod value;
pub mod property;
pub mod outbox;

pub use value::{PropertyField, PropertyKey, PropertyValue, Revision, SyncCommand, SyncError, SyncValue};
pub use property::{ListenerId, NetworkedProperty, ProposalOutcome};
pub use outbox::{InvokeTarget, Outbox, Outgoing};
