//! Tick-Driven Timers
//!
//! Countdowns and lockouts advance once per authoritative tick. Nothing
//! here sleeps or blocks; owners call `advance` from the tick and act on
//! the returned signals in the same tick.

use tracing::debug;

// =============================================================================
// COUNTDOWN TIMER
// =============================================================================

/// Signals produced by a countdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownSignal {
    /// A whole second is showing (emitted on start and each second after).
    Tick(u32),
    /// Reached zero. Emitted exactly once per run.
    Expired,
    /// Hold window ended; the display should clear. Timer is idle again.
    Cleared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CountdownState {
    Idle,
    Counting {
        remaining: u32,
        ticks_into_second: u32,
    },
    Holding {
        ticks_left: u32,
    },
}

/// Cancellable, idempotent seconds countdown.
///
/// `start` while running is a no-op. Reaching zero emits `Expired` once,
/// then holds for a fixed window before going idle; only then can it be
/// started again.
#[derive(Clone, Debug)]
pub struct CountdownTimer {
    label: &'static str,
    ticks_per_second: u32,
    hold_ticks: u32,
    state: CountdownState,
}

impl CountdownTimer {
    /// Create an idle countdown.
    pub fn new(label: &'static str, ticks_per_second: u32, hold_ticks: u32) -> Self {
        Self {
            label,
            ticks_per_second: ticks_per_second.max(1),
            hold_ticks,
            state: CountdownState::Idle,
        }
    }

    /// True from `start` until the hold window ends or `cancel`.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.state != CountdownState::Idle
    }

    /// Seconds left while counting; zero while holding or idle.
    pub fn remaining(&self) -> u32 {
        match self.state {
            CountdownState::Counting { remaining, .. } => remaining,
            _ => 0,
        }
    }

    /// True between expiry and clear.
    pub fn is_holding(&self) -> bool {
        matches!(self.state, CountdownState::Holding { .. })
    }

    /// Begin counting from `seconds`. Returns the first display signal, or
    /// `None` if the timer was already running (re-entry is ignored).
    ///
    /// A zero-second countdown expires on the next `advance`.
    pub fn start(&mut self, seconds: u32) -> Option<CountdownSignal> {
        if self.is_running() {
            debug!("{} countdown already running; start ignored", self.label);
            return None;
        }
        self.state = CountdownState::Counting {
            remaining: seconds,
            ticks_into_second: 0,
        };
        Some(CountdownSignal::Tick(seconds))
    }

    /// Stop without expiring. Returns true if the timer was running.
    pub fn cancel(&mut self) -> bool {
        let was_running = self.is_running();
        self.state = CountdownState::Idle;
        was_running
    }

    /// Advance one tick.
    pub fn advance(&mut self) -> Option<CountdownSignal> {
        match self.state {
            CountdownState::Idle => None,
            CountdownState::Counting { remaining: 0, .. } => self.expire(),
            CountdownState::Counting { remaining, ticks_into_second } => {
                let ticks_into_second = ticks_into_second + 1;
                if ticks_into_second < self.ticks_per_second {
                    self.state = CountdownState::Counting { remaining, ticks_into_second };
                    return None;
                }
                let remaining = remaining - 1;
                if remaining == 0 {
                    return self.expire();
                }
                self.state = CountdownState::Counting {
                    remaining,
                    ticks_into_second: 0,
                };
                Some(CountdownSignal::Tick(remaining))
            }
            CountdownState::Holding { ticks_left } => {
                if ticks_left <= 1 {
                    self.state = CountdownState::Idle;
                    Some(CountdownSignal::Cleared)
                } else {
                    self.state = CountdownState::Holding { ticks_left: ticks_left - 1 };
                    None
                }
            }
        }
    }

    fn expire(&mut self) -> Option<CountdownSignal> {
        self.state = CountdownState::Holding {
            ticks_left: self.hold_ticks,
        };
        if self.hold_ticks == 0 {
            self.state = CountdownState::Idle;
        }
        Some(CountdownSignal::Expired)
    }
}

// =============================================================================
// LOCKOUT TIMER
// =============================================================================

/// Restartable lockout window (hit stun). Restarting while active simply
/// resets the window, so repeated hits keep registering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockoutTimer {
    ticks_left: u32,
}

impl LockoutTimer {
    /// Create an inactive lockout.
    pub const fn new() -> Self {
        Self { ticks_left: 0 }
    }

    /// (Re)start for `ticks` ticks.
    pub fn restart(&mut self, ticks: u32) {
        self.ticks_left = ticks;
    }

    /// Advance one tick. Returns true on the tick the lockout ends.
    pub fn advance(&mut self) -> bool {
        if self.ticks_left == 0 {
            return false;
        }
        self.ticks_left -= 1;
        self.ticks_left == 0
    }

    /// True while locked out.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.ticks_left > 0
    }

    /// Clear immediately.
    pub fn clear(&mut self) {
        self.ticks_left = 0;
    }

    /// Ticks remaining.
    #[inline]
    pub fn ticks_left(&self) -> u32 {
        self.ticks_left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run until idle, collecting every signal.
    fn run_to_idle(timer: &mut CountdownTimer, max_ticks: u32) -> Vec<CountdownSignal> {
        let mut signals = Vec::new();
        for _ in 0..max_ticks {
            if let Some(s) = timer.advance() {
                signals.push(s);
            }
            if !timer.is_running() {
                break;
            }
        }
        signals
    }

    #[test]
    fn test_countdown_sequence() {
        let mut timer = CountdownTimer::new("start", 2, 3);
        assert_eq!(timer.start(3), Some(CountdownSignal::Tick(3)));

        let signals = run_to_idle(&mut timer, 100);
        assert_eq!(
            signals,
            vec![
                CountdownSignal::Tick(2),
                CountdownSignal::Tick(1),
                CountdownSignal::Expired,
                CountdownSignal::Cleared,
            ]
        );
        assert!(!timer.is_running());
    }

    #[test]
    fn test_expiry_timing() {
        // 3 seconds at 50 Hz: expiry lands on tick 150, clear after a 38 tick hold.
        let mut timer = CountdownTimer::new("start", 50, 38);
        timer.start(3);
        let mut expired_at = None;
        let mut cleared_at = None;
        for t in 1..=300 {
            match timer.advance() {
                Some(CountdownSignal::Expired) => expired_at = Some(t),
                Some(CountdownSignal::Cleared) => cleared_at = Some(t),
                _ => {}
            }
        }
        assert_eq!(expired_at, Some(150));
        assert_eq!(cleared_at, Some(188));
    }

    #[test]
    fn test_start_reentry_is_noop() {
        let mut timer = CountdownTimer::new("start", 1, 1);
        assert!(timer.start(3).is_some());
        timer.advance();
        assert_eq!(timer.start(3), None);
        assert_eq!(timer.remaining(), 2);

        let signals = run_to_idle(&mut timer, 100);
        let expiries = signals.iter().filter(|s| **s == CountdownSignal::Expired).count();
        assert_eq!(expiries, 1);
    }

    #[test]
    fn test_remaining_monotonic() {
        let mut timer = CountdownTimer::new("end", 3, 2);
        timer.start(5);
        let mut last = timer.remaining();
        while timer.is_running() && !timer.is_holding() {
            timer.advance();
            assert!(timer.remaining() <= last);
            last = timer.remaining();
        }
    }

    #[test]
    fn test_cannot_restart_while_holding() {
        let mut timer = CountdownTimer::new("end", 1, 5);
        timer.start(1);
        assert_eq!(timer.advance(), Some(CountdownSignal::Expired));
        assert!(timer.is_holding());
        assert_eq!(timer.start(1), None);
    }

    #[test]
    fn test_restart_after_clear() {
        let mut timer = CountdownTimer::new("start", 1, 1);
        timer.start(1);
        run_to_idle(&mut timer, 10);
        assert!(timer.start(2).is_some());
    }

    #[test]
    fn test_cancel_never_expires() {
        let mut timer = CountdownTimer::new("start", 1, 1);
        timer.start(2);
        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert_eq!(run_to_idle(&mut timer, 10), vec![]);
    }

    #[test]
    fn test_zero_hold_goes_idle_on_expiry() {
        let mut timer = CountdownTimer::new("start", 1, 0);
        timer.start(1);
        assert_eq!(timer.advance(), Some(CountdownSignal::Expired));
        assert!(!timer.is_running());
    }

    #[test]
    fn test_zero_seconds_expires_next_tick() {
        let mut timer = CountdownTimer::new("start", 50, 0);
        assert_eq!(timer.start(0), Some(CountdownSignal::Tick(0)));
        assert_eq!(timer.advance(), Some(CountdownSignal::Expired));
    }

    #[test]
    fn test_lockout_restart() {
        let mut lockout = LockoutTimer::new();
        assert!(!lockout.is_active());
        lockout.restart(3);
        lockout.advance();
        lockout.restart(3);
        assert_eq!(lockout.ticks_left(), 3);
        assert!(!lockout.advance());
        assert!(!lockout.advance());
        assert!(lockout.advance());
        assert!(!lockout.is_active());
        assert!(!lockout.advance());
    }
}
