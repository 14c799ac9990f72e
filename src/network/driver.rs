//! Session Driver
//!
//! Runs one peer's session on a fixed-rate tokio interval: drain the
//! transport, tick, flush. Stops once the session aborts, or a short
//! while after the result is known so the last broadcasts and the end
//! countdown hold make it out.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::MatchConfig;
use crate::game::host::MatchHost;
use crate::game::results::MatchResult;
use crate::network::session::{MatchSession, SessionError, SessionState};
use crate::network::transport::Transport;

/// Driver timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Wall-clock time between ticks.
    pub tick_interval: Duration,
    /// Ticks to keep running after the result is known.
    pub linger_ticks: u32,
}

impl DriverConfig {
    /// Real-time pacing for a match configuration.
    pub fn for_match(config: &MatchConfig) -> Self {
        Self {
            tick_interval: Duration::from_micros(1_000_000 / config.tick_rate.max(1) as u64),
            linger_ticks: config.ticks(config.end_countdown.hold) + 1,
        }
    }
}

/// Drive a session until it finishes or aborts.
///
/// Returns the final result, or `None` if the session was torn down.
pub async fn run_session<T, H>(
    session: Arc<RwLock<MatchSession>>,
    mut transport: T,
    mut host: H,
    config: DriverConfig,
) -> Result<Option<MatchResult>, SessionError>
where
    T: Transport + Send,
    H: MatchHost + Send,
{
    let mut tick_interval = interval(config.tick_interval);
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut lingered = 0;

    loop {
        tick_interval.tick().await;

        let mut s = session.write().await;

        for envelope in transport.receive() {
            if let Err(e) = s.handle_message(envelope.from, envelope.message, &mut host) {
                s.flush(&mut transport);
                return Err(e);
            }
        }

        let tick_result = s.tick(&mut host);
        s.flush(&mut transport);

        match tick_result {
            Ok(_) => {}
            Err(SessionError::Aborted) => {
                info!("Session {} aborted", hex::encode(&s.id[..4]));
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        match s.state {
            SessionState::Open => {}
            SessionState::Aborted => return Ok(None),
            SessionState::Finished => {
                lingered += 1;
                if lingered >= config.linger_ticks {
                    debug!("Session {} finished at tick {}", hex::encode(&s.id[..4]), s.current_tick());
                    return Ok(s.result().cloned());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CountdownConfig, SessionConfig};
    use crate::core::ids::{ParticipantId, ProfileId};
    use crate::game::host::testing::TestHost;
    use crate::game::results::{Decision, EndReason, TieBreakPolicy};
    use crate::network::transport::LoopbackHub;

    const A: ParticipantId = ParticipantId::new([1; 16]);
    const B: ParticipantId = ParticipantId::new([2; 16]);

    /// 10 Hz simulated, 1 ms per tick of wall clock.
    fn short_match() -> MatchConfig {
        MatchConfig {
            tick_rate: 10,
            start_countdown: CountdownConfig {
                seconds: 1,
                hold: Duration::from_millis(200),
            },
            end_countdown: CountdownConfig {
                seconds: 1,
                hold: Duration::from_millis(200),
            },
            match_duration: Duration::from_secs(2),
            tie_break: TieBreakPolicy::Draw,
            ..MatchConfig::default()
        }
    }

    fn session(local: ParticipantId) -> Arc<RwLock<MatchSession>> {
        let mut session = MatchSession::new([4; 16], local, A, short_match(), SessionConfig::default());
        session.add_participant(A).unwrap();
        session.add_participant(B).unwrap();
        Arc::new(RwLock::new(session))
    }

    #[tokio::test]
    async fn test_drivers_play_to_time_expiry() {
        let hub = LoopbackHub::new();
        let (leader, follower) = (session(A), session(B));
        let (mut host_a, mut host_b) = (TestHost::default(), TestHost::default());

        leader
            .write()
            .await
            .set_ready(0, "host".into(), ProfileId::new("p-a"), &mut host_a)
            .unwrap();
        follower
            .write()
            .await
            .set_ready(1, "guest".into(), ProfileId::new("p-b"), &mut host_b)
            .unwrap();

        let config = DriverConfig {
            tick_interval: Duration::from_millis(1),
            linger_ticks: 3,
        };
        let leader_task = tokio::spawn(run_session(leader.clone(), hub.endpoint(A), host_a, config));
        let follower_task = tokio::spawn(run_session(follower.clone(), hub.endpoint(B), host_b, config));

        let leader_result = leader_task.await.unwrap().unwrap().unwrap();
        let follower_result = follower_task.await.unwrap().unwrap().unwrap();

        assert_eq!(leader_result.reason, EndReason::TimeExpired);
        assert_eq!(leader_result.decided_by, Decision::TieBreak(TieBreakPolicy::Draw));
        assert!(leader_result.is_draw());
        assert_eq!(follower_result, leader_result);
    }

    #[tokio::test]
    async fn test_abort_stops_driver() {
        let hub = LoopbackHub::new();
        let leader = session(A);
        leader.write().await.abort("shutdown", &mut TestHost::default());

        let config = DriverConfig {
            tick_interval: Duration::from_millis(1),
            linger_ticks: 1,
        };
        let outcome = run_session(leader, hub.endpoint(A), TestHost::default(), config).await;
        assert_eq!(outcome, Ok(None));
    }

    #[test]
    fn test_driver_config_for_match() {
        let config = DriverConfig::for_match(&MatchConfig::default());
        assert_eq!(config.tick_interval, Duration::from_millis(20));
        // 2.5s hold at 50 Hz
        assert_eq!(config.linger_ticks, 126);
    }
}
