//! Character-Select Rendezvous
//!
//! Both slots report ready (with their selection and profile); the barrier
//! releases exactly once, and only then does the session spawn fighters and
//! leave `Waiting`.

use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::core::ids::{ProfileId, SlotId};
use crate::game::host::ProfileStats;

/// Index into the character roster.
pub type SelectionIndex = u32;

/// What one slot reported when it readied up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyEntry {
    /// Chosen character.
    pub selection: SelectionIndex,
    /// Display name.
    pub username: String,
    /// Backend profile.
    pub profile_id: ProfileId,
    /// Stats fetched for the results screen, if the backend had any.
    #[serde(default)]
    pub profile: Option<ProfileStats>,
}

/// Both slots' entries, handed over when the barrier releases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierRelease {
    /// Entries indexed by [`SlotId::index`].
    pub entries: [ReadyEntry; 2],
}

impl BarrierRelease {
    /// Entry for one slot.
    pub fn entry(&self, slot: SlotId) -> &ReadyEntry {
        &self.entries[slot.index()]
    }
}

/// Barrier state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierState {
    /// Waiting for slots.
    Open,
    /// Released. Terminal.
    Fired,
    /// Cancelled (disconnect or timeout). Terminal.
    Cancelled,
}

/// Two-slot ready barrier.
#[derive(Clone, Debug)]
pub struct ReadyBarrier {
    slots: [Option<ReadyEntry>; 2],
    state: BarrierState,
    timeout_ticks: Option<u32>,
    waited_ticks: u32,
}

impl ReadyBarrier {
    /// Open barrier. With `timeout_ticks` set, [`advance`](Self::advance)
    /// reports abandonment after that many ticks without release.
    pub fn new(timeout_ticks: Option<u32>) -> Self {
        Self {
            slots: [None, None],
            state: BarrierState::Open,
            timeout_ticks,
            waited_ticks: 0,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> BarrierState {
        self.state
    }

    /// True once released.
    #[inline]
    pub fn has_fired(&self) -> bool {
        self.state == BarrierState::Fired
    }

    /// True while slots may still ready up.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == BarrierState::Open
    }

    /// True if `slot` has reported ready.
    pub fn is_ready(&self, slot: SlotId) -> bool {
        self.slots[slot.index()].is_some()
    }

    /// Recorded entry for `slot`.
    pub fn entry(&self, slot: SlotId) -> Option<&ReadyEntry> {
        self.slots[slot.index()].as_ref()
    }

    /// Mark `slot` ready. Calling again overwrites the slot's selection.
    ///
    /// Returns the release exactly once: on the call that completes the
    /// second slot. Every later call returns `None`.
    pub fn set_ready(&mut self, slot: SlotId, entry: ReadyEntry) -> Option<BarrierRelease> {
        if self.state != BarrierState::Open {
            debug!("Ready from {:?} after barrier closed ({:?})", slot, self.state);
            return None;
        }

        self.slots[slot.index()] = Some(entry);

        match &self.slots {
            [Some(one), Some(two)] => {
                self.state = BarrierState::Fired;
                info!("Ready barrier released ({} vs {})", one.username, two.username);
                Some(BarrierRelease {
                    entries: [one.clone(), two.clone()],
                })
            }
            _ => None,
        }
    }

    /// Withdraw a slot's ready before release. Returns false once closed.
    pub fn clear(&mut self, slot: SlotId) -> bool {
        if self.state != BarrierState::Open {
            return false;
        }
        self.slots[slot.index()].take().is_some()
    }

    /// Close the barrier without releasing. Returns false if it had
    /// already fired or been cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.state != BarrierState::Open {
            return false;
        }
        self.state = BarrierState::Cancelled;
        true
    }

    /// Count one tick toward the selection timeout. Returns true exactly
    /// once, on the tick the timeout lapses; the barrier is then cancelled.
    pub fn advance(&mut self) -> bool {
        if self.state != BarrierState::Open {
            return false;
        }
        let Some(limit) = self.timeout_ticks else {
            return false;
        };
        self.waited_ticks += 1;
        if self.waited_ticks >= limit {
            self.state = BarrierState::Cancelled;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(barrier: &mut ReadyBarrier, slot: SlotId, selection: SelectionIndex) -> Option<BarrierRelease> {
        let entry = ReadyEntry {
            selection,
            username: format!("p{}", slot.index()),
            profile_id: ProfileId::new("profile"),
            profile: None,
        };
        barrier.set_ready(slot, entry)
    }

    #[test]
    fn test_fires_once_after_repeated_ready() {
        let mut barrier = ReadyBarrier::new(None);
        assert!(ready(&mut barrier, SlotId::One, 1).is_none());
        assert!(ready(&mut barrier, SlotId::One, 4).is_none());

        let release = ready(&mut barrier, SlotId::Two, 2).unwrap();
        assert_eq!(release.entry(SlotId::One).selection, 4);
        assert_eq!(release.entry(SlotId::Two).selection, 2);
        assert!(barrier.has_fired());

        assert!(ready(&mut barrier, SlotId::Two, 3).is_none());
        assert!(ready(&mut barrier, SlotId::One, 3).is_none());
    }

    #[test]
    fn test_order_independent() {
        let mut barrier = ReadyBarrier::new(None);
        assert!(ready(&mut barrier, SlotId::Two, 0).is_none());
        assert!(ready(&mut barrier, SlotId::One, 0).is_some());
    }

    #[test]
    fn test_clear_before_release() {
        let mut barrier = ReadyBarrier::new(None);
        ready(&mut barrier, SlotId::One, 0);
        assert!(barrier.clear(SlotId::One));
        assert!(!barrier.is_ready(SlotId::One));
        assert!(ready(&mut barrier, SlotId::Two, 0).is_none());
        assert!(ready(&mut barrier, SlotId::One, 0).is_some());
        assert!(!barrier.clear(SlotId::One));
    }

    #[test]
    fn test_cancel_blocks_release() {
        let mut barrier = ReadyBarrier::new(None);
        ready(&mut barrier, SlotId::One, 0);
        assert!(barrier.cancel());
        assert!(!barrier.cancel());
        assert!(ready(&mut barrier, SlotId::Two, 0).is_none());
        assert_eq!(barrier.state(), BarrierState::Cancelled);
    }

    #[test]
    fn test_no_timeout_by_default() {
        let mut barrier = ReadyBarrier::new(None);
        for _ in 0..10_000 {
            assert!(!barrier.advance());
        }
        assert_eq!(barrier.state(), BarrierState::Open);
    }

    #[test]
    fn test_timeout_reported_once() {
        let mut barrier = ReadyBarrier::new(Some(3));
        assert!(!barrier.advance());
        assert!(!barrier.advance());
        assert!(barrier.advance());
        assert!(!barrier.advance());
        assert_eq!(barrier.state(), BarrierState::Cancelled);
    }

    #[test]
    fn test_release_stops_timeout() {
        let mut barrier = ReadyBarrier::new(Some(2));
        ready(&mut barrier, SlotId::One, 0);
        ready(&mut barrier, SlotId::Two, 0);
        assert!(!barrier.advance());
        assert!(!barrier.advance());
        assert!(barrier.has_fired());
    }
}
