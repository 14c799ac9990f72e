//! Duel Sync Demo
//!
//! Runs an authority and a follower against each other over the in-process
//! loopback transport, with scripted input and a toy physics host, and logs
//! the match as the follower's UI would see it.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use duel_sync::{
    TICK_RATE, VERSION,
    config::{MatchConfig, SessionConfig},
    core::{hash::short_hex, ids::{ParticipantId, ProfileId, SessionId, SlotId}, vec2::Vec2},
    game::{
        events::PresentationUpdate,
        host::{Hit, InputSource, Lobby, Movement, MovementStep, Persistence, StageDirector},
        input::InputFrame,
        ready::SelectionIndex,
        results::MatchResult,
    },
    network::{
        driver::{run_session, DriverConfig},
        session::{MatchSession, SessionManager},
        transport::LoopbackHub,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let match_config = MatchConfig::from_env().context("invalid match configuration")?;
    let session_config = SessionConfig::from_env(match_config.tick_rate).context("invalid session configuration")?;

    info!("Duel Sync v{}", VERSION);
    info!("Tick Rate: {} Hz (default {})", match_config.tick_rate, TICK_RATE);
    info!("Match Duration: {:?}", match_config.match_duration);

    demo_match(match_config, session_config).await
}

/// Play one scripted match between two in-process peers.
async fn demo_match(match_config: MatchConfig, session_config: SessionConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Match ===");

    let host_id = ParticipantId::random();
    let guest_id = ParticipantId::random();
    info!("Authority: {}  Follower: {}", host_id.short(), guest_id.short());

    let manager = SessionManager::new();
    let session_id = manager
        .create_session(host_id, host_id, match_config.clone(), session_config.clone())
        .await;
    let leader = manager
        .get_session(&session_id)
        .await
        .context("session vanished after creation")?;
    manager.register_participant(host_id, session_id).await;
    manager.register_participant(guest_id, session_id).await;

    let follower = Arc::new(RwLock::new(MatchSession::new(
        session_id,
        guest_id,
        host_id,
        match_config.clone(),
        session_config,
    )));

    // Host fights in place and swings; guest wanders off the right edge
    let rate = match_config.tick_rate;
    let mut leader_host = DemoHost::new(|_| InputFrame::new(0.0, false, true, false), rate);
    let mut follower_host = DemoHost::new(|tick| InputFrame::new(1.0, tick % 40 == 0, false, false), rate);

    for session in [&leader, &follower] {
        let mut s = session.write().await;
        s.add_participant(host_id)?;
        s.add_participant(guest_id)?;
    }
    leader
        .write()
        .await
        .set_ready(0, "host".into(), ProfileId::new("demo-host"), &mut leader_host)?;
    follower
        .write()
        .await
        .set_ready(1, "guest".into(), ProfileId::new("demo-guest"), &mut follower_host)?;

    let printer = tokio::spawn(log_presentation(follower.read().await.subscribe_events()));

    let hub = LoopbackHub::new();
    let driver = DriverConfig::for_match(&match_config);
    let leader_task = tokio::spawn(run_session(leader.clone(), hub.endpoint(host_id), leader_host, driver));
    let follower_task = tokio::spawn(run_session(follower.clone(), hub.endpoint(guest_id), follower_host, driver));

    let leader_result = leader_task.await.context("authority driver panicked")??;
    let follower_result = follower_task.await.context("follower driver panicked")??;
    printer.abort();

    match (&leader_result, &follower_result) {
        (Some(result), Some(seen)) => {
            log_result(result);
            if result == seen {
                info!("Follower agrees with the authority's result");
            } else {
                warn!("Follower result differs from the authority's");
            }
        }
        _ => warn!("Match did not finish"),
    }

    let digests = (leader.read().await.game().digest(), follower.read().await.game().digest());
    info!("State digest: {}", short_hex(&digests.0));
    if digests.0 != digests.1 {
        warn!("Follower digest {} differs", short_hex(&digests.1));
    }

    info!("Closed sessions cleaned up: {}", manager.cleanup().await);
    Ok(())
}

fn log_result(result: &MatchResult) {
    info!("=== Match Results ===");
    info!("Ended at tick {} ({:?}, decided by {:?})", result.end_tick, result.reason, result.decided_by);
    for player in &result.players {
        info!(
            "{:?} {}: {} kills, {} deaths, {} stocks, {} damage taken",
            player.slot, player.username, player.kills, player.deaths, player.stocks_left, player.damage_taken
        );
    }
    match result.winner.and_then(|w| result.player(&w)) {
        Some(winner) => info!("Winner: {}", winner.username),
        None => info!("Draw"),
    }
}

/// Follower-side UI stand-in.
async fn log_presentation(mut rx: broadcast::Receiver<PresentationUpdate>) {
    loop {
        match rx.recv().await {
            Ok(PresentationUpdate::Countdown { kind, text }) => info!("[ui] {:?} countdown: {}", kind, text),
            Ok(PresentationUpdate::Phase(phase)) => info!("[ui] phase: {}", phase),
            Ok(PresentationUpdate::PropertyChanged { key, value }) => info!("[ui] {} = {:?}", key, value),
            Ok(PresentationUpdate::Results(result)) => info!("[ui] results in, winner {:?}", result.winner),
            Ok(PresentationUpdate::SessionEnded { reason }) => info!("[ui] session ended: {}", reason),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("[ui] skipped {} updates", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// =============================================================================
// DEMO HOST
// =============================================================================

/// Scripted input plus flat-ground physics.
struct DemoHost {
    script: fn(u32) -> InputFrame,
    dt: f32,
    polls: u32,
    positions: BTreeMap<ParticipantId, Vec2>,
    recorded: u32,
}

impl DemoHost {
    const SPEED: f32 = 6.0;
    const REACH: f32 = 1.5;
    const DAMAGE: i32 = 4;

    fn new(script: fn(u32) -> InputFrame, tick_rate: u32) -> Self {
        Self {
            script,
            dt: 1.0 / tick_rate.max(1) as f32,
            polls: 0,
            positions: BTreeMap::new(),
            recorded: 0,
        }
    }
}

impl InputSource for DemoHost {
    fn poll_local_input(&mut self) -> InputFrame {
        self.polls += 1;
        (self.script)(self.polls)
    }
}

impl Movement for DemoHost {
    fn step(
        &mut self,
        fighter: ParticipantId,
        input: &InputFrame,
        can_act: bool,
        position: Vec2,
        _velocity: Vec2,
    ) -> MovementStep {
        let velocity = if can_act { Vec2::new(input.movement * Self::SPEED, 0.0) } else { Vec2::ZERO };
        let position = position + velocity * self.dt;
        self.positions.insert(fighter, position);

        let hits = if can_act && input.attack() {
            self.positions
                .iter()
                .filter(|(id, at)| **id != fighter && at.distance_squared(position) <= Self::REACH * Self::REACH)
                .map(|(id, _)| Hit { attacker: fighter, victim: *id, amount: Self::DAMAGE })
                .collect()
        } else {
            Vec::new()
        };
        MovementStep { position, velocity, hits }
    }
}

impl StageDirector for DemoHost {
    fn spawn_fighter(&mut self, fighter: ParticipantId, slot: SlotId, selection: SelectionIndex, at: Vec2) {
        info!("Spawn {} in {:?} as character {} at {}", fighter.short(), slot, selection, at);
        self.positions.insert(fighter, at);
    }

    fn despawn_fighter(&mut self, fighter: ParticipantId) {
        self.positions.remove(&fighter);
    }
}

impl Persistence for DemoHost {
    fn record_match_result(&mut self, result: &MatchResult) {
        self.recorded += 1;
        info!("Persisted result #{} for {} players", self.recorded, result.players.len());
    }
}

impl Lobby for DemoHost {
    fn session_ended(&mut self, session: SessionId, reason: &str) {
        info!("Session {} back to lobby: {}", hex::encode(&session[..4]), reason);
    }
}
