//! Match Results
//!
//! Reads both fighters' terminal vitals once at game over and decides the
//! winner. A fighter's kills are the opponent's deaths; they are never
//! tracked separately.
//!
//! Precedence:
//! 1. Elimination: the surviving fighter wins outright.
//! 2. More kills.
//! 3. More stocks left.
//! 4. Less damage taken in the current life.
//! 5. The configured [`TieBreakPolicy`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::ids::{ParticipantId, ProfileId, SlotId};
use crate::game::host::ProfileStats;
use crate::game::ready::{ReadyEntry, SelectionIndex};
use crate::game::vitals::FighterVitals;

// =============================================================================
// POLICY / REASONS
// =============================================================================

/// Final rule when kills, stocks and damage taken are all level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// No winner.
    Draw,
    /// Whoever landed more damage; a draw if that is level too.
    MoreDamageDealt,
    /// Slot one takes it.
    SlotOneWins,
}

impl FromStr for TieBreakPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draw" => Ok(TieBreakPolicy::Draw),
            "more_damage_dealt" => Ok(TieBreakPolicy::MoreDamageDealt),
            "slot_one_wins" => Ok(TieBreakPolicy::SlotOneWins),
            other => Err(format!("unknown tie-break policy: {}", other)),
        }
    }
}

impl fmt::Display for TieBreakPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TieBreakPolicy::Draw => "draw",
            TieBreakPolicy::MoreDamageDealt => "more_damage_dealt",
            TieBreakPolicy::SlotOneWins => "slot_one_wins",
        };
        f.write_str(name)
    }
}

/// Why the match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A fighter ran out of stocks.
    Elimination {
        /// The fighter that was eliminated.
        eliminated: ParticipantId,
    },
    /// The end countdown ran out.
    TimeExpired,
}

/// Which rule settled the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Opponent eliminated.
    Elimination,
    /// Kill count.
    Kills,
    /// Stocks remaining.
    Stocks,
    /// Lower damage taken.
    DamageTaken,
    /// Tie-break policy.
    TieBreak(TieBreakPolicy),
}

// =============================================================================
// MATCH RESULT
// =============================================================================

/// One fighter's line on the results screen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    /// Participant.
    pub participant: ParticipantId,
    /// Character-select slot.
    pub slot: SlotId,
    /// Display name.
    pub username: String,
    /// Backend profile.
    pub profile_id: ProfileId,
    /// Character played.
    pub selection: SelectionIndex,
    /// Lifetime stats fetched during character select.
    pub profile: Option<ProfileStats>,
    /// Opponent's deaths.
    pub kills: u32,
    /// Own deaths.
    pub deaths: u32,
    /// Stocks left at the end.
    pub stocks_left: i32,
    /// Damage taken in the final life.
    pub damage_taken: i32,
    /// Damage landed over the match.
    pub damage_dealt: u32,
}

/// Frozen end-of-match summary, handed once to persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Winner, `None` on a draw.
    pub winner: Option<ParticipantId>,
    /// Loser, `None` on a draw.
    pub loser: Option<ParticipantId>,
    /// Why the match ended.
    pub reason: EndReason,
    /// Rule that decided it.
    pub decided_by: Decision,
    /// Per-player summaries, slot order.
    pub players: Vec<PlayerSummary>,
    /// Authoritative tick of game over.
    pub end_tick: u32,
    /// Wall-clock time the result was computed.
    pub finished_at: DateTime<Utc>,
}

impl MatchResult {
    /// True if nobody won.
    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }

    /// Summary for one participant.
    pub fn player(&self, participant: &ParticipantId) -> Option<&PlayerSummary> {
        self.players.iter().find(|p| p.participant == *participant)
    }
}

/// Aggregation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultsError {
    /// A slot never had a fighter assigned.
    #[error("no fighter assigned to slot {0:?}")]
    MissingFighter(SlotId),
}

// =============================================================================
// AGGREGATOR
// =============================================================================

/// Computes the result at most once per session.
#[derive(Debug, Clone)]
pub struct MatchResultsAggregator {
    policy: TieBreakPolicy,
    result: Option<MatchResult>,
}

impl MatchResultsAggregator {
    /// Create with the configured tie-break.
    pub fn new(policy: TieBreakPolicy) -> Self {
        Self { policy, result: None }
    }

    /// Computed result, if any.
    pub fn result(&self) -> Option<&MatchResult> {
        self.result.as_ref()
    }

    /// True once computed.
    pub fn is_computed(&self) -> bool {
        self.result.is_some()
    }

    /// Compute the result from both slots' fighters and their ready
    /// entries. A second call returns the first result unchanged.
    pub fn compute(
        &mut self,
        fighters: [Option<(&FighterVitals, &ReadyEntry)>; 2],
        reason: EndReason,
        end_tick: u32,
    ) -> Result<&MatchResult, ResultsError> {
        match self.result {
            Some(ref result) => {
                debug!("Match result already computed");
                Ok(result)
            }
            None => {
                let result = build(fighters, reason, end_tick, self.policy)?;
                Ok(&*self.result.insert(result))
            }
        }
    }
}

fn build(
    fighters: [Option<(&FighterVitals, &ReadyEntry)>; 2],
    reason: EndReason,
    end_tick: u32,
    policy: TieBreakPolicy,
) -> Result<MatchResult, ResultsError> {
    let [one, two] = fighters;
    let (one, one_entry) = one.ok_or(ResultsError::MissingFighter(SlotId::One))?;
    let (two, two_entry) = two.ok_or(ResultsError::MissingFighter(SlotId::Two))?;

    let summaries = [
        summarize(one, one_entry, two),
        summarize(two, two_entry, one),
    ];
    let (winner_slot, decided_by) = decide(&summaries, reason, policy);

    let (winner, loser) = match winner_slot {
        Some(slot) => (
            Some(summaries[slot.index()].participant),
            Some(summaries[slot.other().index()].participant),
        ),
        None => (None, None),
    };

    info!(
        "Match result: winner={} decided_by={:?} kills={}-{}",
        winner.map(|w| w.to_string()).unwrap_or_else(|| "draw".into()),
        decided_by,
        summaries[0].kills,
        summaries[1].kills,
    );

    Ok(MatchResult {
        winner,
        loser,
        reason,
        decided_by,
        players: summaries.to_vec(),
        end_tick,
        finished_at: Utc::now(),
    })
}

fn summarize(fighter: &FighterVitals, entry: &ReadyEntry, opponent: &FighterVitals) -> PlayerSummary {
    PlayerSummary {
        participant: fighter.id(),
        slot: fighter.slot(),
        username: entry.username.clone(),
        profile_id: entry.profile_id.clone(),
        selection: entry.selection,
        profile: entry.profile.clone(),
        kills: opponent.deaths(),
        deaths: fighter.deaths(),
        stocks_left: fighter.stocks(),
        damage_taken: fighter.health(),
        damage_dealt: fighter.damage_dealt(),
    }
}

/// Winning slot (or `None` for a draw) and the rule that settled it.
fn decide(players: &[PlayerSummary; 2], reason: EndReason, policy: TieBreakPolicy) -> (Option<SlotId>, Decision) {
    if let EndReason::Elimination { eliminated } = reason {
        if let Some(loser) = players.iter().find(|p| p.participant == eliminated) {
            return (Some(loser.slot.other()), Decision::Elimination);
        }
    }

    let (one, two) = (&players[0], &players[1]);
    let slot_for = |ord: Ordering| match ord {
        Ordering::Greater => Some(SlotId::One),
        Ordering::Less => Some(SlotId::Two),
        Ordering::Equal => None,
    };

    if let Some(slot) = slot_for(one.kills.cmp(&two.kills)) {
        return (Some(slot), Decision::Kills);
    }
    if let Some(slot) = slot_for(one.stocks_left.cmp(&two.stocks_left)) {
        return (Some(slot), Decision::Stocks);
    }
    // Lower damage taken is the better outcome.
    if let Some(slot) = slot_for(two.damage_taken.cmp(&one.damage_taken)) {
        return (Some(slot), Decision::DamageTaken);
    }

    let winner = match policy {
        TieBreakPolicy::Draw => None,
        TieBreakPolicy::MoreDamageDealt => slot_for(one.damage_dealt.cmp(&two.damage_dealt)),
        TieBreakPolicy::SlotOneWins => Some(SlotId::One),
    };
    (winner, Decision::TieBreak(policy))
}
