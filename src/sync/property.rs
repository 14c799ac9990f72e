//! Networked Property
//!
//! A single replicated value with one canonical copy.
//!
//! ```text
//!   follower                         authority
//!   ────────                         ─────────
//!   propose(v) ── Propose{v,rev} ──▶ receive_proposal
//!   (no local write)                    │ owner check, stale check
//!                                       ▼
//!                                    apply(v): value = v, rev += 1
//!                                       │ listeners (if changed)
//!   apply_remote ◀── Changed{v,rev} ────┘
//!   (rev must be newer; listeners if changed)
//! ```
//!
//! Followers never write their own copy directly. Every value a follower
//! sees came from an authority broadcast, so all peers converge on the
//! authority's last applied value.

use std::fmt;
use tracing::debug;

use crate::core::ids::ParticipantId;
use crate::sync::outbox::{InvokeTarget, Outbox};
use crate::sync::value::{PropertyKey, PropertyValue, Revision, SyncCommand, SyncError, SyncValue};

/// Handle returned by [`NetworkedProperty::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Box<dyn FnMut(&T, &T) + Send + Sync>;

/// What happened to a proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// Applied by the local authority. `changed` is false for a same-value write.
    Applied {
        /// Value actually changed.
        changed: bool,
    },
    /// Sent to the authority; the local copy is untouched until it broadcasts.
    Forwarded,
    /// Authority had already moved past the proposer's revision; discarded.
    Stale,
}

/// A value with owner/authority replication semantics.
pub struct NetworkedProperty<T: SyncValue> {
    key: PropertyKey,
    value: T,
    /// Peer allowed to propose changes.
    owner: ParticipantId,
    /// Peer whose copy is canonical.
    authority: ParticipantId,
    /// This process's participant.
    local: ParticipantId,
    revision: Revision,
    listeners: Vec<(ListenerId, Listener<T>)>,
    next_listener: u64,
}

impl<T: SyncValue> NetworkedProperty<T> {
    /// Create a property at revision 0.
    pub fn new(
        key: PropertyKey,
        initial: T,
        owner: ParticipantId,
        authority: ParticipantId,
        local: ParticipantId,
    ) -> Self {
        Self {
            key,
            value: initial,
            owner,
            authority,
            local,
            revision: 0,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Current local value.
    #[inline]
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Property address.
    #[inline]
    pub fn key(&self) -> PropertyKey {
        self.key
    }

    /// Last applied revision.
    #[inline]
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Owning participant.
    #[inline]
    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    /// Authoritative participant.
    #[inline]
    pub fn authority(&self) -> ParticipantId {
        self.authority
    }

    /// True if this process holds the canonical copy.
    #[inline]
    pub fn is_authority(&self) -> bool {
        self.local == self.authority
    }

    /// Register a change listener, called with `(old, new)` once per
    /// distinct value transition.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&T, &T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Request a new value.
    ///
    /// On the authority this applies immediately and queues a broadcast.
    /// Elsewhere it queues a proposal to the authority and returns; the
    /// local copy only changes when the authority's broadcast arrives.
    pub fn propose(&mut self, value: T, outbox: &mut Outbox) -> ProposalOutcome {
        if self.is_authority() {
            let changed = self.commit(value, outbox);
            return ProposalOutcome::Applied { changed };
        }

        outbox.push_sync(
            InvokeTarget::Authority,
            SyncCommand::Propose {
                key: self.key,
                value: value.to_value(),
                base_revision: self.revision,
            },
        );
        ProposalOutcome::Forwarded
    }

    /// Authoritative write. Overwrites the value, notifies listeners on a
    /// real change and queues the broadcast.
    pub fn apply(&mut self, value: T, outbox: &mut Outbox) -> Result<bool, SyncError> {
        if !self.is_authority() {
            return Err(SyncError::NotAuthority {
                key: self.key,
                operation: "apply",
            });
        }
        Ok(self.commit(value, outbox))
    }

    /// Handle a proposal that arrived over the transport (authority side).
    pub fn receive_proposal(
        &mut self,
        from: ParticipantId,
        value: &PropertyValue,
        base_revision: Revision,
        outbox: &mut Outbox,
    ) -> Result<ProposalOutcome, SyncError> {
        if !self.is_authority() {
            return Err(SyncError::NotAuthority {
                key: self.key,
                operation: "accept proposals",
            });
        }
        if from != self.owner && from != self.authority {
            return Err(SyncError::NotOwner { key: self.key, from });
        }
        let value = T::from_value(value).ok_or(SyncError::ValueTypeMismatch(self.key))?;

        if base_revision < self.revision {
            debug!(
                "{}: stale proposal {:?} at base rev {} (current {})",
                self.key, value, base_revision, self.revision
            );
            return Ok(ProposalOutcome::Stale);
        }

        let changed = self.commit(value, outbox);
        Ok(ProposalOutcome::Applied { changed })
    }

    /// Apply an authority broadcast (follower side).
    ///
    /// Broadcasts whose revision is not newer than the last applied one are
    /// dropped, so reordered or duplicated deliveries cannot roll a value
    /// back. Returns true if the value changed.
    pub fn apply_remote(&mut self, value: &PropertyValue, revision: Revision) -> Result<bool, SyncError> {
        let value = T::from_value(value).ok_or(SyncError::ValueTypeMismatch(self.key))?;
        if revision <= self.revision {
            return Ok(false);
        }
        self.revision = revision;
        Ok(self.overwrite(value))
    }

    /// Current value and revision, for snapshots.
    pub fn snapshot(&self) -> (PropertyValue, Revision) {
        (self.value.to_value(), self.revision)
    }

    fn commit(&mut self, value: T, outbox: &mut Outbox) -> bool {
        if value == self.value {
            return false;
        }
        self.revision = self.revision.wrapping_add(1);
        outbox.push_sync(
            InvokeTarget::All,
            SyncCommand::Changed {
                key: self.key,
                value: value.to_value(),
                revision: self.revision,
            },
        );
        self.overwrite(value)
    }

    fn overwrite(&mut self, value: T) -> bool {
        if value == self.value {
            return false;
        }
        let old = std::mem::replace(&mut self.value, value);
        for (_, listener) in self.listeners.iter_mut() {
            listener(&old, &self.value);
        }
        true
    }
}

impl<T: SyncValue> fmt::Debug for NetworkedProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkedProperty")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("revision", &self.revision)
            .field("owner", &self.owner)
            .field("authority", &self.authority)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use proptest::prelude::*;

    use crate::network::protocol::PeerMessage;
    use crate::sync::value::PropertyField;

    const HOST: ParticipantId = ParticipantId::new([1; 16]);
    const GUEST: ParticipantId = ParticipantId::new([2; 16]);

    fn key() -> PropertyKey {
        PropertyKey::new(GUEST, PropertyField::Health)
    }

    /// Authority copy on HOST and follower copy on GUEST, guest-owned.
    fn pair() -> (NetworkedProperty<i32>, NetworkedProperty<i32>) {
        let host = NetworkedProperty::new(key(), 0, GUEST, HOST, HOST);
        let guest = NetworkedProperty::new(key(), 0, GUEST, HOST, GUEST);
        (host, guest)
    }

    /// Deliver everything queued: proposals to the host, broadcasts to the guest.
    fn pump(
        host: &mut NetworkedProperty<i32>,
        guest: &mut NetworkedProperty<i32>,
        host_out: &mut Outbox,
        guest_out: &mut Outbox,
    ) {
        loop {
            let to_host = guest_out.drain();
            let to_guest = host_out.drain();
            if to_host.is_empty() && to_guest.is_empty() {
                break;
            }
            for o in to_host {
                if let PeerMessage::Sync(SyncCommand::Propose { value, base_revision, .. }) = o.message {
                    host.receive_proposal(GUEST, &value, base_revision, host_out).unwrap();
                }
            }
            for o in to_guest {
                if let PeerMessage::Sync(SyncCommand::Changed { value, revision, .. }) = o.message {
                    guest.apply_remote(&value, revision).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_authority_propose_applies_and_broadcasts() {
        let (mut host, _) = pair();
        let mut out = Outbox::new();

        assert_eq!(host.propose(10, &mut out), ProposalOutcome::Applied { changed: true });
        assert_eq!(*host.get(), 10);
        assert_eq!(host.revision(), 1);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_follower_propose_does_not_write_locally() {
        let (_, mut guest) = pair();
        let mut out = Outbox::new();

        assert_eq!(guest.propose(10, &mut out), ProposalOutcome::Forwarded);
        assert_eq!(*guest.get(), 0);
        let sent = out.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, InvokeTarget::Authority);
    }

    #[test]
    fn test_follower_cannot_apply() {
        let (_, mut guest) = pair();
        let mut out = Outbox::new();
        assert!(matches!(guest.apply(5, &mut out), Err(SyncError::NotAuthority { .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn test_proposal_round_trip_converges() {
        let (mut host, mut guest) = pair();
        let (mut host_out, mut guest_out) = (Outbox::new(), Outbox::new());

        guest.propose(25, &mut guest_out);
        pump(&mut host, &mut guest, &mut host_out, &mut guest_out);

        assert_eq!(*host.get(), 25);
        assert_eq!(*guest.get(), 25);
        assert_eq!(guest.revision(), host.revision());
    }

    #[test]
    fn test_same_value_apply_skips_listeners() {
        let (mut host, _) = pair();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        host.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut out = Outbox::new();
        assert!(!host.apply(0, &mut out).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(out.is_empty());
        assert_eq!(host.revision(), 0);

        assert!(host.apply(3, &mut out).unwrap());
        assert!(!host.apply(3, &mut out).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_sees_old_and_new() {
        let (mut host, _) = pair();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        host.subscribe(move |old, new| sink.lock().unwrap().push((*old, *new)));

        let mut out = Outbox::new();
        host.apply(4, &mut out).unwrap();
        host.apply(9, &mut out).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(0, 4), (4, 9)]);
    }

    #[test]
    fn test_unsubscribe() {
        let (mut host, _) = pair();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = host.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(host.unsubscribe(id));
        assert!(!host.unsubscribe(id));
        host.apply(1, &mut Outbox::new()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_proposal_discarded() {
        let (mut host, _) = pair();
        let mut out = Outbox::new();
        host.apply(10, &mut out).unwrap();
        host.apply(20, &mut out).unwrap();

        let outcome = host
            .receive_proposal(GUEST, &PropertyValue::Int(99), 1, &mut out)
            .unwrap();
        assert_eq!(outcome, ProposalOutcome::Stale);
        assert_eq!(*host.get(), 20);
    }

    #[test]
    fn test_non_owner_proposal_rejected() {
        let (mut host, _) = pair();
        let stranger = ParticipantId::new([9; 16]);
        let result = host.receive_proposal(stranger, &PropertyValue::Int(1), 0, &mut Outbox::new());
        assert!(matches!(result, Err(SyncError::NotOwner { .. })));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let (mut host, mut guest) = pair();
        let bad = PropertyValue::Text("x".into());
        assert!(matches!(
            host.receive_proposal(GUEST, &bad, 0, &mut Outbox::new()),
            Err(SyncError::ValueTypeMismatch(_))
        ));
        assert!(matches!(guest.apply_remote(&bad, 1), Err(SyncError::ValueTypeMismatch(_))));
    }

    #[test]
    fn test_out_of_order_broadcast_dropped() {
        let (_, mut guest) = pair();
        assert!(guest.apply_remote(&PropertyValue::Int(30), 3).unwrap());
        assert!(!guest.apply_remote(&PropertyValue::Int(20), 2).unwrap());
        assert!(!guest.apply_remote(&PropertyValue::Int(30), 3).unwrap());
        assert_eq!(*guest.get(), 30);
        assert_eq!(guest.revision(), 3);
    }

    #[derive(Debug, Clone)]
    enum Step {
        GuestProposes(i32),
        HostWrites(i32),
        Deliver,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0..50i32).prop_map(Step::GuestProposes),
            (0..50i32).prop_map(Step::HostWrites),
            Just(Step::Deliver),
        ]
    }

    proptest! {
        #[test]
        fn prop_peers_converge_on_authority_value(steps in proptest::collection::vec(step(), 0..40)) {
            let (mut host, mut guest) = pair();
            let (mut host_out, mut guest_out) = (Outbox::new(), Outbox::new());

            for s in steps {
                match s {
                    Step::GuestProposes(v) => { guest.propose(v, &mut guest_out); }
                    Step::HostWrites(v) => { host.apply(v, &mut host_out).unwrap(); }
                    Step::Deliver => pump(&mut host, &mut guest, &mut host_out, &mut guest_out),
                }
            }
            pump(&mut host, &mut guest, &mut host_out, &mut guest_out);

            prop_assert_eq!(*guest.get(), *host.get());
            prop_assert_eq!(guest.revision(), host.revision());
        }

        #[test]
        fn prop_apply_current_value_never_notifies(start in -100..100i32) {
            let mut prop = NetworkedProperty::new(key(), start, GUEST, HOST, HOST);
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();
            prop.subscribe(move |_, _| { counter.fetch_add(1, Ordering::SeqCst); });

            let mut out = Outbox::new();
            prop_assert!(!prop.apply(start, &mut out).unwrap());
            prop_assert_eq!(calls.load(Ordering::SeqCst), 0);
            prop_assert!(out.is_empty());
        }
    }
}
