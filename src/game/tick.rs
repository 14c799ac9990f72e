//! Simulation Tick
//!
//! One fixed step of the session. On the authority this runs the match:
//! timers, input, movement, hits, the boundary check, the clock and
//! phase resolution, in that order. On a follower it only polls and
//! forwards input and keeps local display state moving between
//! authority broadcasts.
//!
//! Triggers raised during a tick are resolved at its end, elimination
//! first, so a fighter falling out on the same tick the clock runs out
//! still ends the match by elimination.

use tracing::{debug, warn};

use crate::core::ids::ParticipantId;
use crate::game::events::{CountdownKind, GameEvent, GameEventData, PresentationUpdate};
use crate::game::host::{Hit, MatchHost};
use crate::game::input::InputFrame;
use crate::game::machine::{MatchPhase, PhaseTrigger, Transition};
use crate::game::state::MatchState;
use crate::game::timer::CountdownSignal;
use crate::game::vitals::LifeOutcome;
use crate::network::protocol::PeerMessage;
use crate::network::session::SessionError;
use crate::sync::outbox::InvokeTarget;

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick, in processing order
    pub events: Vec<GameEvent>,
    /// Phase transition applied this tick
    pub transition: Option<Transition>,
    /// Character select timed out; the session should be torn down
    pub abandoned: bool,
    /// Whether match ended this tick
    pub match_ended: bool,
    /// Winner (if match ended with winner)
    pub winner: Option<ParticipantId>,
}

/// Run one tick.
///
/// # Arguments
///
/// * `state` - The match state (will be mutated)
/// * `host` - Input device, physics, scene and backend collaborators
///
/// Fighters are visited in participant order (BTreeMap), so two runs with
/// the same inputs and physics produce the same outcome.
pub fn tick<H>(state: &mut MatchState, host: &mut H) -> Result<TickResult, SessionError>
where
    H: MatchHost + ?Sized,
{
    let mut result = TickResult::default();

    // 0. Advance tick counter
    state.tick += 1;

    if state.is_authority() {
        authority_tick(state, host, &mut result)?;
    } else {
        follower_tick(state, host);
    }

    result.events = state.take_events();
    Ok(result)
}

// =============================================================================
// AUTHORITY
// =============================================================================

fn authority_tick<H>(state: &mut MatchState, host: &mut H, result: &mut TickResult) -> Result<(), SessionError>
where
    H: MatchHost + ?Sized,
{
    match state.phase() {
        MatchPhase::Waiting => {
            if state.barrier.advance() {
                warn!("Character select timed out at tick {}", state.tick);
                result.abandoned = true;
            }
        }
        MatchPhase::CountingDown => {
            if let Some(signal) = state.start_countdown.advance() {
                state.countdown_signal(CountdownKind::Start, signal);
                if signal == CountdownSignal::Expired {
                    let transition = state.transition(PhaseTrigger::StartCountdownExpired, host)?;
                    note(result, transition);
                }
            }
        }
        MatchPhase::Running => {
            // Start countdown finishes its hold window during play
            if let Some(signal) = state.start_countdown.advance() {
                state.countdown_signal(CountdownKind::Start, signal);
            }
            run_live(state, host, result)?;
        }
        MatchPhase::GameOver => {
            if let Some(signal) = state.end_countdown.advance() {
                state.countdown_signal(CountdownKind::End, signal);
            }
        }
    }
    Ok(())
}

/// Live play on the authority.
fn run_live<H>(state: &mut MatchState, host: &mut H, result: &mut TickResult) -> Result<(), SessionError>
where
    H: MatchHost + ?Sized,
{
    let tick = state.tick;
    let ids: Vec<ParticipantId> = state.fighters.keys().copied().collect();

    // 1. Age lockouts and respawn delays from earlier ticks
    for fighter in state.fighters.values_mut() {
        fighter.advance();
    }

    // 2. Poll local input (follower frames arrive via receive_input)
    state.inputs.poll(tick, host, &mut state.outbox);

    // 3. Movement
    let hits = step_fighters(state, host, &ids);

    // 4. Hits
    for hit in hits {
        apply_hit(state, hit);
    }

    // 5. Boundary check
    let eliminated = check_boundaries(state, host, &ids)?;

    // 6. Clock and end countdown
    let time_expired = advance_clock(state);

    // 7. Resolve, elimination first
    let trigger = match (eliminated, time_expired) {
        (Some(eliminated), _) => Some(PhaseTrigger::Elimination { eliminated }),
        (None, true) => Some(PhaseTrigger::TimeExpired),
        (None, false) => None,
    };
    if let Some(trigger) = trigger {
        let transition = state.transition(trigger, host)?;
        note(result, transition);
        if state.phase() == MatchPhase::GameOver {
            result.match_ended = true;
            result.winner = state.results.result().and_then(|r| r.winner);
        }
    }

    // 8. Record inputs for replay
    state.inputs.record_tick(tick, &ids);
    Ok(())
}

fn step_fighters<H>(state: &mut MatchState, host: &mut H, ids: &[ParticipantId]) -> Vec<Hit>
where
    H: MatchHost + ?Sized,
{
    let mut hits = Vec::new();
    for id in ids {
        let input = state.inputs.frame_for(id);
        let Some(fighter) = state.fighters.get_mut(id) else {
            continue;
        };
        if !fighter.is_active() {
            continue;
        }
        let can_act = fighter.can_act();
        let input = if can_act { input } else { InputFrame::neutral() };
        let step = host.step(*id, &input, can_act, fighter.position, fighter.velocity);
        fighter.position = step.position;
        fighter.velocity = step.velocity;
        hits.extend(step.hits);
    }
    hits
}

fn apply_hit(state: &mut MatchState, hit: Hit) {
    if hit.attacker == hit.victim {
        debug!("Ignoring self-hit by {}", hit.attacker);
        return;
    }
    let lockout_ticks = state.rules.hit_lockout_ticks;
    let Some(victim) = state.fighters.get_mut(&hit.victim) else {
        debug!("Hit on unknown fighter {}", hit.victim);
        return;
    };
    if !victim.is_active() {
        return;
    }
    let (amount, _) = victim.damage(hit.amount, lockout_ticks, &mut state.outbox);
    if let Some(attacker) = state.fighters.get_mut(&hit.attacker) {
        attacker.record_damage_dealt(amount);
    }

    state.push_event(GameEventData::HitLanded {
        attacker: hit.attacker,
        victim: hit.victim,
        amount,
    });
    state.present(PresentationUpdate::HitFeedback {
        fighter: hit.victim,
        lockout_ticks,
    });
    state.outbox.push(
        InvokeTarget::All,
        PeerMessage::HitFeedback {
            fighter: hit.victim,
            lockout_ticks,
        },
    );
}

/// Returns the first fighter eliminated this tick.
fn check_boundaries<H>(
    state: &mut MatchState,
    host: &mut H,
    ids: &[ParticipantId],
) -> Result<Option<ParticipantId>, SessionError>
where
    H: MatchHost + ?Sized,
{
    let mut eliminated = None;
    for id in ids {
        let Some(fighter) = state.fighters.get_mut(id) else {
            continue;
        };
        let slot = fighter.slot();
        let Some(outcome) = fighter.check_out_of_bounds(&state.rules, &mut state.outbox)? else {
            continue;
        };

        match outcome {
            LifeOutcome::LifeLost { stocks_left } => {
                state.push_event(GameEventData::LifeLost { fighter: *id, stocks_left });
            }
            LifeOutcome::Eliminated => {
                host.despawn_fighter(*id);
                let by = state.slot_participant(slot.other());
                state.push_event(GameEventData::FighterEliminated { fighter: *id, by });
                eliminated.get_or_insert(*id);
            }
        }
    }
    Ok(eliminated)
}

/// Returns true on the tick the end countdown expires.
fn advance_clock(state: &mut MatchState) -> bool {
    let mut time_expired = false;
    if state.clock.advance() {
        if let Some(signal) = state.end_countdown.start(state.config.end_countdown.seconds) {
            state.countdown_signal(CountdownKind::End, signal);
        }
    } else if let Some(signal) = state.end_countdown.advance() {
        state.countdown_signal(CountdownKind::End, signal);
        time_expired = signal == CountdownSignal::Expired;
    }
    state.emit_clock();
    time_expired
}

fn note(result: &mut TickResult, transition: Transition) {
    if transition.applied() {
        result.transition = Some(transition);
    }
}

// =============================================================================
// FOLLOWER
// =============================================================================

fn follower_tick<H>(state: &mut MatchState, host: &mut H)
where
    H: MatchHost + ?Sized,
{
    if state.phase() != MatchPhase::Running {
        return;
    }
    state.inputs.poll(state.tick, host, &mut state.outbox);
    for fighter in state.fighters.values_mut() {
        fighter.advance();
    }
    state.clock.advance();
    state.emit_clock();
}
