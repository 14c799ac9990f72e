//! Match Clock
//!
//! Elapsed / remaining play time, counted in authoritative ticks. When the
//! remaining time reaches the end-countdown threshold the clock reports it
//! once; the session then starts the end countdown, which carries the
//! match the rest of the way to game over.

use serde::{Serialize, Deserialize};

/// Clock snapshot for presentation and resync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockReading {
    /// Ticks since play started.
    pub elapsed_ticks: u32,
    /// Ticks until the configured duration is used up.
    pub remaining_ticks: u32,
}

/// Running elapsed/remaining tracker.
#[derive(Clone, Debug)]
pub struct MatchClock {
    duration_ticks: u32,
    threshold_ticks: u32,
    ticks_per_second: u32,
    elapsed_ticks: u32,
    running: bool,
    threshold_reported: bool,
}

impl MatchClock {
    /// A stopped clock for a match of `duration_ticks`, reporting the end
    /// countdown trigger when `threshold_ticks` remain.
    pub fn new(duration_ticks: u32, threshold_ticks: u32, ticks_per_second: u32) -> Self {
        Self {
            duration_ticks,
            threshold_ticks: threshold_ticks.min(duration_ticks),
            ticks_per_second: ticks_per_second.max(1),
            elapsed_ticks: 0,
            running: false,
            threshold_reported: false,
        }
    }

    /// Start counting. Returns false if the clock already ran this match.
    pub fn start(&mut self) -> bool {
        if self.running || self.elapsed_ticks > 0 {
            return false;
        }
        self.running = true;
        true
    }

    /// Freeze the clock (game over or abort).
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// True while counting.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Advance one tick. Returns true exactly once, on the tick the
    /// remaining time first reaches the threshold.
    pub fn advance(&mut self) -> bool {
        if !self.running {
            return false;
        }
        if self.elapsed_ticks < self.duration_ticks {
            self.elapsed_ticks += 1;
        }
        if !self.threshold_reported && self.remaining_ticks() <= self.threshold_ticks {
            self.threshold_reported = true;
            return true;
        }
        false
    }

    /// Ticks since play started.
    #[inline]
    pub fn elapsed_ticks(&self) -> u32 {
        self.elapsed_ticks
    }

    /// Ticks left in the match.
    #[inline]
    pub fn remaining_ticks(&self) -> u32 {
        self.duration_ticks.saturating_sub(self.elapsed_ticks)
    }

    /// Whole seconds left, rounded up for display.
    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_ticks().div_ceil(self.ticks_per_second)
    }

    /// True once the threshold has been reported.
    #[inline]
    pub fn threshold_reached(&self) -> bool {
        self.threshold_reported
    }

    /// Snapshot for broadcast.
    pub fn reading(&self) -> ClockReading {
        ClockReading {
            elapsed_ticks: self.elapsed_ticks,
            remaining_ticks: self.remaining_ticks(),
        }
    }

    /// Adopt the authority's reading (follower side).
    pub fn sync_to(&mut self, reading: ClockReading) {
        self.elapsed_ticks = reading.elapsed_ticks.min(self.duration_ticks);
        if self.remaining_ticks() <= self.threshold_ticks {
            self.threshold_reported = true;
        }
    }
}
