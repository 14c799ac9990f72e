//! Match and Session Configuration
//!
//! Gameplay tunables live in [`MatchConfig`], per-session plumbing in
//! [`SessionConfig`]. Both have canonical defaults and can be overridden
//! from `DUEL_*` environment variables.

use std::str::FromStr;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::vec2::Vec2;
use crate::game::results::TieBreakPolicy;
use crate::game::vitals::StageBounds;

/// Simulation tick rate (Hz). Matches a 0.02s fixed-update step.
pub const DEFAULT_TICK_RATE: u32 = 50;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Environment variable present but not parseable.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// Parsed value violates a constraint.
    #[error("{0}")]
    OutOfRange(&'static str),
}

/// One countdown's configuration: whole seconds to count, then how long the
/// terminal display stays up before clearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownConfig {
    /// Seconds counted down (coarse, one tick signal per second).
    pub seconds: u32,
    /// Hold window after expiry before the display clears.
    pub hold: Duration,
}

/// Gameplay configuration for a single match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Authoritative tick rate (Hz).
    pub tick_rate: u32,
    /// Lives each fighter starts with.
    pub starting_stocks: i32,
    /// Countdown from barrier release to live play.
    pub start_countdown: CountdownConfig,
    /// Countdown from clock threshold to game over.
    pub end_countdown: CountdownConfig,
    /// Total match length. The end countdown begins when
    /// `end_countdown.seconds` remain.
    pub match_duration: Duration,
    /// Input lockout applied to a fighter after it takes a hit.
    pub hit_lockout: Duration,
    /// Ticks a fighter stays in the respawning state after losing a life.
    /// Zero re-arms the out-of-bounds check at the end of the transaction.
    pub respawn_delay_ticks: u32,
    /// Stage rectangle used by the out-of-bounds check.
    pub stage: StageBounds,
    /// Where a fighter reappears after losing a life.
    pub respawn_point: Vec2,
    /// Opposing spawn points, indexed by slot.
    pub spawn_points: [Vec2; 2],
    /// Rule applied when kills and damage taken are both level.
    pub tie_break: TieBreakPolicy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            starting_stocks: 3,
            start_countdown: CountdownConfig {
                seconds: 3,
                hold: Duration::from_millis(750),
            },
            end_countdown: CountdownConfig {
                seconds: 5,
                hold: Duration::from_millis(2500),
            },
            match_duration: Duration::from_secs(180),
            hit_lockout: Duration::from_millis(500),
            respawn_delay_ticks: 0,
            stage: StageBounds::default(),
            respawn_point: Vec2::new(0.0, 5.0),
            spawn_points: [Vec2::new(-5.0, 1.0), Vec2::new(5.0, 1.0)],
            tie_break: TieBreakPolicy::Draw,
        }
    }
}

impl MatchConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(rate) = env_parse::<u32>("DUEL_TICK_RATE")? {
            config.tick_rate = rate;
        }
        if let Some(stocks) = env_parse::<i32>("DUEL_STARTING_STOCKS")? {
            config.starting_stocks = stocks;
        }
        if let Some(secs) = env_parse::<u32>("DUEL_START_COUNTDOWN_SECS")? {
            config.start_countdown.seconds = secs;
        }
        if let Some(secs) = env_parse::<u32>("DUEL_END_COUNTDOWN_SECS")? {
            config.end_countdown.seconds = secs;
        }
        if let Some(secs) = env_parse::<u64>("DUEL_MATCH_DURATION_SECS")? {
            config.match_duration = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("DUEL_HIT_LOCKOUT_MS")? {
            config.hit_lockout = Duration::from_millis(ms);
        }
        if let Some(policy) = env_parse::<TieBreakPolicy>("DUEL_TIE_BREAK")? {
            config.tie_break = policy;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the state machine cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::OutOfRange("tick rate must be positive"));
        }
        if self.starting_stocks < 1 {
            return Err(ConfigError::OutOfRange("starting stocks must be at least 1"));
        }
        if self.match_duration < Duration::from_secs(self.end_countdown.seconds as u64) {
            return Err(ConfigError::OutOfRange("match shorter than its end countdown"));
        }
        Ok(())
    }

    /// Convert a duration to whole ticks, rounding up so a non-zero
    /// duration is never zero ticks.
    pub fn ticks(&self, duration: Duration) -> u32 {
        let ticks = duration.as_secs_f64() * self.tick_rate as f64;
        ticks.ceil() as u32
    }

    /// Ticks in one second.
    #[inline]
    pub fn ticks_per_second(&self) -> u32 {
        self.tick_rate
    }
}

/// Per-session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Participants in a duel.
    pub max_participants: usize,
    /// Abort the session if character select has not released after this
    /// many ticks. `None` waits forever.
    pub selection_timeout_ticks: Option<u32>,
    /// Capacity of the presentation broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_participants: 2,
            selection_timeout_ticks: None,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables.
    pub fn from_env(tick_rate: u32) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u32>("DUEL_SELECTION_TIMEOUT_SECS")? {
            config.selection_timeout_ticks = Some(secs.saturating_mul(tick_rate));
        }
        Ok(config)
    }
}

fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(None),
    }
}
