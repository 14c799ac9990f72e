//! Match Session Management
//!
//! Wraps one peer's [`MatchState`] with participant bookkeeping, role
//! checks on inbound messages and teardown. Coordinates between the
//! transport and the simulation: inbound messages go through
//! [`MatchSession::handle_message`], the tick runs through
//! [`MatchSession::tick`], and everything queued goes out in
//! [`MatchSession::flush`].

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::{MatchConfig, SessionConfig};
use crate::core::ids::{ParticipantId, ProfileId, SessionId, SlotId};
use crate::game::events::PresentationUpdate;
use crate::game::host::MatchHost;
use crate::game::machine::{MachineError, MatchPhase, Transition};
use crate::game::ready::SelectionIndex;
use crate::game::results::MatchResult;
use crate::game::state::MatchState;
use crate::game::tick::{tick, TickResult};
use crate::network::protocol::PeerMessage;
use crate::network::transport::{Envelope, Transport};
use crate::sync::outbox::InvokeTarget;
use crate::sync::property::ProposalOutcome;
use crate::sync::value::{SyncCommand, SyncError};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Character select or match in progress.
    Open,
    /// Result known; presentation may still be finishing.
    Finished,
    /// Torn down before a result.
    Aborted,
}

/// A participant seated in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParticipant {
    /// Participant identifier.
    pub participant_id: ParticipantId,
    /// Seat, once assigned.
    pub slot: Option<SlotId>,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A slot the operation needs has nobody in it. Fatal to the session.
    #[error("No participant in slot {0:?}")]
    MissingParticipant(SlotId),

    /// Session is full.
    #[error("Session is full")]
    SessionFull,

    /// Participant not in this session.
    #[error("Unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// Operation not valid in the current phase.
    #[error("Expected phase {expected}, session is in {actual}")]
    InvalidPhase {
        /// Phase the operation needs.
        expected: MatchPhase,
        /// Phase the session is in.
        actual: MatchPhase,
    },

    /// Operation reserved for the authority.
    #[error("Only the authority may {0}")]
    NotAuthority(&'static str),

    /// Session was torn down.
    #[error("Session aborted")]
    Aborted,

    /// State machine rejected a request.
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// Replication rejected a command.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// A match session, as seen by one peer.
pub struct MatchSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Current state.
    pub state: SessionState,
    /// Session configuration.
    pub config: SessionConfig,
    local: ParticipantId,
    authority: ParticipantId,
    /// Seated participants.
    participants: BTreeMap<ParticipantId, SessionParticipant>,
    /// Game state.
    game: MatchState,
    /// Presentation broadcast channel.
    event_tx: broadcast::Sender<PresentationUpdate>,
}

impl MatchSession {
    /// Create a new session for `local`, run by `authority`.
    pub fn new(
        id: SessionId,
        local: ParticipantId,
        authority: ParticipantId,
        match_config: MatchConfig,
        config: SessionConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let game = MatchState::new(
            local,
            authority,
            match_config,
            config.selection_timeout_ticks,
            event_tx.clone(),
        );

        Self {
            id,
            state: SessionState::Open,
            config,
            local,
            authority,
            participants: BTreeMap::new(),
            game,
            event_tx,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// This peer.
    pub fn local(&self) -> ParticipantId {
        self.local
    }

    /// The session authority.
    pub fn authority(&self) -> ParticipantId {
        self.authority
    }

    /// True on the authority.
    pub fn is_authority(&self) -> bool {
        self.local == self.authority
    }

    /// Game state.
    pub fn game(&self) -> &MatchState {
        &self.game
    }

    /// Game state, mutable (listener registration, direct proposals).
    pub fn game_mut(&mut self) -> &mut MatchState {
        &mut self.game
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        self.game.phase()
    }

    /// Get current tick.
    pub fn current_tick(&self) -> u32 {
        self.game.tick
    }

    /// Final result, once known.
    pub fn result(&self) -> Option<&MatchResult> {
        self.game.result()
    }

    /// True once finished or aborted.
    pub fn is_closed(&self) -> bool {
        self.state != SessionState::Open
    }

    /// Seated participants in id order.
    pub fn participants(&self) -> impl Iterator<Item = &SessionParticipant> {
        self.participants.values()
    }

    /// Number of seated participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Subscribe to presentation updates.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PresentationUpdate> {
        self.event_tx.subscribe()
    }

    // =========================================================================
    // Participants
    // =========================================================================

    /// Seat a participant in the first free slot. Both peers add the same
    /// participants in the same order; the authority's roster is what
    /// counts once the barrier releases.
    pub fn add_participant(&mut self, participant_id: ParticipantId) -> Result<SlotId, SessionError> {
        if self.phase() != MatchPhase::Waiting {
            return Err(SessionError::InvalidPhase {
                expected: MatchPhase::Waiting,
                actual: self.phase(),
            });
        }
        if let Some(slot) = self.participants.get(&participant_id).and_then(|p| p.slot) {
            return Ok(slot);
        }
        if self.participants.len() >= self.config.max_participants {
            return Err(SessionError::SessionFull);
        }

        let slot = SlotId::ALL
            .into_iter()
            .find(|slot| self.game.slot_participant(*slot).is_none())
            .ok_or(SessionError::SessionFull)?;
        self.game.assign_slot(slot, participant_id);
        self.participants.insert(
            participant_id,
            SessionParticipant {
                participant_id,
                slot: Some(slot),
            },
        );
        info!("Participant {} joined session in slot {:?}", participant_id, slot);
        Ok(slot)
    }

    /// A participant disconnected or left. Before release this frees the
    /// seat; any later, non-final phase tears the session down.
    pub fn participant_left<H>(&mut self, participant_id: ParticipantId, host: &mut H)
    where
        H: MatchHost + ?Sized,
    {
        if self.is_closed() || self.participants.remove(&participant_id).is_none() {
            return;
        }
        info!("Participant {} left session", participant_id);

        if participant_id == self.authority {
            self.abort("host left", host);
            return;
        }
        match self.phase() {
            MatchPhase::Waiting => {
                self.game.vacate_slot(&participant_id);
            }
            MatchPhase::GameOver => {}
            _ => self.abort("opponent left", host),
        }
    }

    /// Leave voluntarily: tell the peers, then tear down locally.
    pub fn leave<H>(&mut self, host: &mut H)
    where
        H: MatchHost + ?Sized,
    {
        if self.is_closed() {
            return;
        }
        self.game.outbox.push(InvokeTarget::All, PeerMessage::Leave);
        self.teardown("left session", host);
    }

    // =========================================================================
    // Local actions
    // =========================================================================

    /// Ready the local slot with a selection. The authority records it
    /// directly; a follower sends it to the authority.
    pub fn set_ready<H>(
        &mut self,
        selection: SelectionIndex,
        username: String,
        profile_id: ProfileId,
        host: &mut H,
    ) -> Result<Transition, SessionError>
    where
        H: MatchHost + ?Sized,
    {
        self.ensure_open()?;
        let slot = self
            .game
            .slot_of(&self.local)
            .ok_or(SessionError::UnknownParticipant(self.local))?;

        if !self.is_authority() {
            self.game.outbox.push(
                InvokeTarget::Authority,
                PeerMessage::SelectionReady {
                    slot,
                    selection,
                    username,
                    profile_id,
                },
            );
            return Ok(Transition::Ignored);
        }
        let result = self.game.set_ready(slot, selection, username, profile_id, host);
        self.check_fatal(result, host)
    }

    /// Withdraw the local ready.
    pub fn clear_ready(&mut self) -> Result<bool, SessionError> {
        self.ensure_open()?;
        let slot = self
            .game
            .slot_of(&self.local)
            .ok_or(SessionError::UnknownParticipant(self.local))?;
        if self.is_authority() {
            return Ok(self.game.clear_ready(slot));
        }
        self.game
            .outbox
            .push(InvokeTarget::Authority, PeerMessage::SelectionCleared { slot });
        Ok(true)
    }

    /// Propose a new display name for the local fighter.
    pub fn set_nickname(&mut self, name: String) -> Result<ProposalOutcome, SessionError> {
        self.ensure_open()?;
        let fighter = self
            .game
            .fighters
            .get_mut(&self.local)
            .ok_or(SessionError::UnknownParticipant(self.local))?;
        Ok(fighter.set_nickname(name, &mut self.game.outbox))
    }

    // =========================================================================
    // Tick / flush
    // =========================================================================

    /// Run one simulation tick.
    pub fn tick<H>(&mut self, host: &mut H) -> Result<TickResult, SessionError>
    where
        H: MatchHost + ?Sized,
    {
        if self.state == SessionState::Aborted {
            return Err(SessionError::Aborted);
        }

        let result = tick(&mut self.game, host);
        let result = self.check_fatal(result, host)?;

        if result.abandoned {
            self.abort("character select timed out", host);
        } else if self.state == SessionState::Open && self.game.result().is_some() {
            self.state = SessionState::Finished;
        }
        Ok(result)
    }

    /// Hand every queued message to the transport.
    pub fn flush<T>(&mut self, transport: &mut T) -> usize
    where
        T: Transport + ?Sized,
    {
        let queued = self.game.outbox.drain();
        let mut sent = 0;
        for out in queued {
            let targets: Vec<ParticipantId> = match out.target {
                InvokeTarget::Local => vec![self.local],
                InvokeTarget::Authority => vec![self.authority],
                InvokeTarget::Peer(peer) => vec![peer],
                InvokeTarget::All => self
                    .participants
                    .keys()
                    .copied()
                    .filter(|id| *id != self.local)
                    .collect(),
            };
            for to in targets {
                transport.send(
                    to,
                    Envelope {
                        from: self.local,
                        message: out.message.clone(),
                    },
                );
                sent += 1;
            }
        }
        sent
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Handle one inbound message. Messages that fail a role check are
    /// logged and dropped; only fatal errors are returned.
    pub fn handle_message<H>(
        &mut self,
        from: ParticipantId,
        message: PeerMessage,
        host: &mut H,
    ) -> Result<(), SessionError>
    where
        H: MatchHost + ?Sized,
    {
        if self.state == SessionState::Aborted {
            debug!("Dropping {} from {}: session aborted", message.name(), from);
            return Ok(());
        }
        if !self.participants.contains_key(&from) {
            warn!("Dropping {} from non-participant {}", message.name(), from);
            return Ok(());
        }
        let result = self.dispatch(from, message, host);
        self.check_fatal(result, host)
    }

    fn dispatch<H>(&mut self, from: ParticipantId, message: PeerMessage, host: &mut H) -> Result<(), SessionError>
    where
        H: MatchHost + ?Sized,
    {
        let name = message.name();
        let from_authority = from == self.authority;

        // Authority-bound operations
        if matches!(
            message,
            PeerMessage::Sync(SyncCommand::Propose { .. })
                | PeerMessage::Input { .. }
                | PeerMessage::SelectionReady { .. }
                | PeerMessage::SelectionCleared { .. }
                | PeerMessage::ResyncRequest
        ) && !self.is_authority()
        {
            warn!("Dropping {} from {}: not the authority", name, from);
            return Ok(());
        }

        // Authority-originated operations
        if matches!(
            message,
            PeerMessage::Sync(SyncCommand::Changed { .. })
                | PeerMessage::PhaseChanged(_)
                | PeerMessage::Countdown { .. }
                | PeerMessage::CountdownCleared { .. }
                | PeerMessage::Clock(_)
                | PeerMessage::HitFeedback { .. }
                | PeerMessage::MatchOver(_)
                | PeerMessage::Snapshot(_)
                | PeerMessage::Abort { .. }
        ) && (!from_authority || self.is_authority())
        {
            warn!("Dropping {} from {}: sender is not the authority", name, from);
            return Ok(());
        }

        match message {
            PeerMessage::Sync(SyncCommand::Propose { key, value, base_revision }) => {
                match self.game.receive_proposal(from, key, &value, base_revision) {
                    Ok(outcome) => debug!("Proposal {} from {}: {:?}", key, from, outcome),
                    Err(e) => warn!("Rejected proposal from {}: {}", from, e),
                }
            }
            PeerMessage::Sync(SyncCommand::Changed { key, value, revision }) => {
                match self.game.apply_property(key, &value, revision, host) {
                    Ok(_) => {}
                    Err(SyncError::UnknownProperty(key)) => {
                        debug!("Unknown property {}; requesting resync", key);
                        self.game.outbox.push(InvokeTarget::Authority, PeerMessage::ResyncRequest);
                    }
                    Err(e) => warn!("Dropped change from authority: {}", e),
                }
            }
            PeerMessage::Input { tick, frame } => {
                self.game.receive_input(from, tick, frame);
            }
            PeerMessage::SelectionReady {
                slot,
                selection,
                username,
                profile_id,
            } => {
                if self.game.slot_of(&from) != Some(slot) {
                    warn!("Dropping ready for {:?} from {}: not their slot", slot, from);
                    return Ok(());
                }
                self.game.set_ready(slot, selection, username, profile_id, host)?;
            }
            PeerMessage::SelectionCleared { slot } => {
                if self.game.slot_of(&from) == Some(slot) {
                    self.game.clear_ready(slot);
                }
            }
            PeerMessage::PhaseChanged(update) => {
                self.game.apply_phase_update(update, host);
            }
            PeerMessage::Countdown { kind, seconds } => self.game.apply_countdown(kind, Some(seconds)),
            PeerMessage::CountdownCleared { kind } => self.game.apply_countdown(kind, None),
            PeerMessage::Clock(reading) => self.game.apply_clock(reading),
            PeerMessage::HitFeedback { fighter, lockout_ticks } => {
                self.game.present(PresentationUpdate::HitFeedback { fighter, lockout_ticks });
            }
            PeerMessage::MatchOver(result) => {
                self.game.apply_result(result);
                if self.state == SessionState::Open {
                    self.state = SessionState::Finished;
                }
            }
            PeerMessage::Snapshot(snapshot) => {
                self.game.apply_snapshot(snapshot, host);
            }
            PeerMessage::ResyncRequest => {
                let snapshot = self.game.snapshot();
                self.game.outbox.push(InvokeTarget::Peer(from), PeerMessage::Snapshot(snapshot));
            }
            PeerMessage::Leave => self.participant_left(from, host),
            PeerMessage::Abort { reason } => {
                info!("Authority aborted session: {}", reason);
                self.teardown(&reason, host);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Tear the session down and, on the authority, tell the followers.
    pub fn abort<H>(&mut self, reason: &str, host: &mut H)
    where
        H: MatchHost + ?Sized,
    {
        if self.state == SessionState::Aborted {
            return;
        }
        if self.is_authority() {
            self.game.outbox.push(
                InvokeTarget::All,
                PeerMessage::Abort {
                    reason: reason.to_string(),
                },
            );
        }
        self.teardown(reason, host);
    }

    fn teardown<H>(&mut self, reason: &str, host: &mut H)
    where
        H: MatchHost + ?Sized,
    {
        warn!("Session {} torn down: {}", hex::encode(&self.id[..4]), reason);
        self.game.teardown(host);
        self.state = SessionState::Aborted;
        host.session_ended(self.id, reason);
        self.game.present(PresentationUpdate::SessionEnded {
            reason: reason.to_string(),
        });
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Aborted => Err(SessionError::Aborted),
            _ => Ok(()),
        }
    }

    /// A missing participant cannot be recovered from: abort and report.
    fn check_fatal<R, H>(&mut self, result: Result<R, SessionError>, host: &mut H) -> Result<R, SessionError>
    where
        H: MatchHost + ?Sized,
    {
        if let Err(SessionError::MissingParticipant(slot)) = &result {
            warn!("Slot {:?} has no participant; aborting", slot);
            self.abort("participant missing", host);
        }
        result
    }
}

impl std::fmt::Debug for MatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSession")
            .field("id", &hex::encode(self.id))
            .field("state", &self.state)
            .field("participants", &self.participants.len())
            .field("game", &self.game)
            .finish()
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Manages all sessions this process takes part in.
pub struct SessionManager {
    /// Active sessions.
    sessions: RwLock<BTreeMap<SessionId, Arc<RwLock<MatchSession>>>>,
    /// Participant to session mapping.
    participant_sessions: RwLock<BTreeMap<ParticipantId, SessionId>>,
}

impl SessionManager {
    /// Create new session manager.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            participant_sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a new session.
    pub async fn create_session(
        &self,
        local: ParticipantId,
        authority: ParticipantId,
        match_config: MatchConfig,
        config: SessionConfig,
    ) -> SessionId {
        let id = uuid::Uuid::new_v4().into_bytes();
        let session = MatchSession::new(id, local, authority, match_config, config);

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, Arc::new(RwLock::new(session)));

        id
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<RwLock<MatchSession>>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Get session for a participant.
    pub async fn get_participant_session(&self, participant_id: &ParticipantId) -> Option<Arc<RwLock<MatchSession>>> {
        let participant_sessions = self.participant_sessions.read().await;
        if let Some(session_id) = participant_sessions.get(participant_id) {
            self.get_session(session_id).await
        } else {
            None
        }
    }

    /// Register participant in a session.
    pub async fn register_participant(&self, participant_id: ParticipantId, session_id: SessionId) {
        let mut participant_sessions = self.participant_sessions.write().await;
        participant_sessions.insert(participant_id, session_id);
    }

    /// Unregister participant from session.
    pub async fn unregister_participant(&self, participant_id: &ParticipantId) {
        let mut participant_sessions = self.participant_sessions.write().await;
        participant_sessions.remove(participant_id);
    }

    /// Remove a session.
    pub async fn remove_session(&self, id: &SessionId) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Drop closed sessions and their participant mappings.
    pub async fn cleanup(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut to_remove = Vec::new();

        for (id, session) in sessions.iter() {
            let s = session.read().await;
            if s.is_closed() {
                to_remove.push(*id);
            }
        }

        for id in &to_remove {
            sessions.remove(id);
        }
        drop(sessions);

        let mut participant_sessions = self.participant_sessions.write().await;
        participant_sessions.retain(|_, session_id| !to_remove.contains(session_id));
        to_remove.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::host::testing::TestHost;
    use crate::game::results::Decision;
    use crate::game::vitals::Lifecycle;
    use crate::sync::value::{PropertyField, PropertyKey, PropertyValue};

    const A: ParticipantId = ParticipantId::new([1; 16]);
    const B: ParticipantId = ParticipantId::new([2; 16]);
    const C: ParticipantId = ParticipantId::new([3; 16]);

    fn match_config() -> MatchConfig {
        MatchConfig {
            tick_rate: 10,
            ..MatchConfig::default()
        }
    }

    fn create_session(local: ParticipantId) -> MatchSession {
        let mut session = MatchSession::new([9; 16], local, A, match_config(), SessionConfig::default());
        session.add_participant(A).unwrap();
        session.add_participant(B).unwrap();
        session
    }

    /// Deliver everything `from` has queued to `to`.
    fn pump(from: &mut MatchSession, to: &mut MatchSession, host: &mut TestHost) {
        let sender = from.local();
        for out in from.game.outbox.drain() {
            if out.target == InvokeTarget::Local {
                continue;
            }
            to.handle_message(sender, out.message, host).unwrap();
        }
    }

    fn pump_both(a: &mut MatchSession, b: &mut MatchSession, host_a: &mut TestHost, host_b: &mut TestHost) {
        pump(a, b, host_b);
        pump(b, a, host_a);
        pump(a, b, host_b);
    }

    fn ready_both(a: &mut MatchSession, b: &mut MatchSession, host_a: &mut TestHost, host_b: &mut TestHost) {
        a.set_ready(1, "host".into(), ProfileId::new("p-a"), host_a).unwrap();
        b.set_ready(2, "guest".into(), ProfileId::new("p-b"), host_b).unwrap();
        pump_both(a, b, host_a, host_b);
    }

    #[tokio::test]
    async fn test_add_participants() {
        let mut session = MatchSession::new([0; 16], A, A, match_config(), SessionConfig::default());

        assert_eq!(session.add_participant(A).unwrap(), SlotId::One);
        assert_eq!(session.add_participant(B).unwrap(), SlotId::Two);
        assert_eq!(session.add_participant(A).unwrap(), SlotId::One);
        assert!(matches!(session.add_participant(C), Err(SessionError::SessionFull)));
        assert_eq!(session.participant_count(), 2);
    }

    #[tokio::test]
    async fn test_leave_before_release_frees_slot() {
        let mut session = create_session(A);
        let mut host = TestHost::default();

        session.participant_left(B, &mut host);
        assert_eq!(session.state, SessionState::Open);
        assert_eq!(session.add_participant(C).unwrap(), SlotId::Two);
    }

    #[tokio::test]
    async fn test_follower_ready_goes_to_authority() {
        let mut session = create_session(B);
        let mut host = TestHost::default();

        let transition = session.set_ready(4, "guest".into(), ProfileId::new("p-b"), &mut host).unwrap();
        assert_eq!(transition, Transition::Ignored);

        let queued = session.game.outbox.drain();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].target, InvokeTarget::Authority);
        assert!(matches!(
            queued[0].message,
            PeerMessage::SelectionReady { slot: SlotId::Two, selection: 4, .. }
        ));
    }

    #[tokio::test]
    async fn test_release_replicates_to_follower() {
        let (mut a, mut b) = (create_session(A), create_session(B));
        let (mut host_a, mut host_b) = (TestHost::default(), TestHost::default());
        ready_both(&mut a, &mut b, &mut host_a, &mut host_b);

        assert_eq!(a.phase(), MatchPhase::CountingDown);
        assert_eq!(b.phase(), MatchPhase::CountingDown);
        assert_eq!(host_a.spawned, host_b.spawned);
        assert_eq!(host_b.spawned.len(), 2);
        assert_eq!(b.game().fighter(&B).unwrap().nickname(), "guest");
    }

    #[tokio::test]
    async fn test_full_match_over_loopback() {
        let (mut a, mut b) = (create_session(A), create_session(B));
        let (mut host_a, mut host_b) = (TestHost::default(), TestHost::default());
        let mut events = b.subscribe_events();
        ready_both(&mut a, &mut b, &mut host_a, &mut host_b);

        // 3s countdown at 10 Hz
        for _ in 0..30 {
            a.tick(&mut host_a).unwrap();
            b.tick(&mut host_b).unwrap();
            pump_both(&mut a, &mut b, &mut host_a, &mut host_b);
        }
        assert_eq!(b.phase(), MatchPhase::Running);

        host_a.hit(A, B, 7);
        for _ in 0..3 {
            host_a.knock_out(B);
            a.tick(&mut host_a).unwrap();
            b.tick(&mut host_b).unwrap();
            pump_both(&mut a, &mut b, &mut host_a, &mut host_b);
        }

        assert_eq!(a.phase(), MatchPhase::GameOver);
        assert_eq!(b.phase(), MatchPhase::GameOver);
        assert_eq!(a.state, SessionState::Finished);
        assert_eq!(b.state, SessionState::Finished);

        let result = a.result().unwrap().clone();
        assert_eq!(result.winner, Some(A));
        assert_eq!(result.decided_by, Decision::Elimination);
        assert_eq!(b.result(), Some(&result));
        assert_eq!(host_a.recorded.len(), 1);
        assert!(host_b.recorded.is_empty());

        let follower_copy = b.game().fighter(&B).unwrap();
        assert_eq!(follower_copy.stocks(), 0);
        assert_eq!(follower_copy.lifecycle(), Lifecycle::Eliminated);
        assert_eq!(host_a.despawned, vec![B]);
        assert_eq!(host_b.despawned, vec![B]);
        assert_eq!(b.game().digest(), a.game().digest());

        let mut saw_results = false;
        while let Ok(update) = events.try_recv() {
            saw_results |= matches!(update, PresentationUpdate::Results(_));
        }
        assert!(saw_results);
    }

    #[tokio::test]
    async fn test_role_checks_drop_messages() {
        let mut a = create_session(A);
        let mut host = TestHost::default();

        // Follower may not drive the phase
        let forged = a.game().machine().update();
        a.handle_message(B, PeerMessage::PhaseChanged(forged), &mut host).unwrap();
        assert_eq!(a.phase(), MatchPhase::Waiting);

        // Strangers are ignored entirely
        a.handle_message(C, PeerMessage::Leave, &mut host).unwrap();
        assert_eq!(a.state, SessionState::Open);

        // Nobody may ready another participant's slot
        a.handle_message(
            B,
            PeerMessage::SelectionReady {
                slot: SlotId::One,
                selection: 0,
                username: "x".into(),
                profile_id: ProfileId::default(),
            },
            &mut host,
        )
        .unwrap();
        assert!(!a.game().barrier().is_ready(SlotId::One));
    }

    #[tokio::test]
    async fn test_vital_proposals_from_follower_are_refused() {
        let (mut a, mut b) = (create_session(A), create_session(B));
        let (mut host_a, mut host_b) = (TestHost::default(), TestHost::default());
        ready_both(&mut a, &mut b, &mut host_a, &mut host_b);
        a.game.outbox.drain();

        let propose = |field, value, base_revision| {
            PeerMessage::Sync(SyncCommand::Propose {
                key: PropertyKey::new(B, field),
                value,
                base_revision,
            })
        };
        a.handle_message(B, propose(PropertyField::Stocks, PropertyValue::Int(99), 0), &mut host_a)
            .unwrap();
        a.handle_message(B, propose(PropertyField::Health, PropertyValue::Int(-40), 0), &mut host_a)
            .unwrap();
        a.handle_message(B, propose(PropertyField::Stocks, PropertyValue::Int(-3), 1), &mut host_a)
            .unwrap();

        let fighter = a.game().fighter(&B).unwrap();
        assert_eq!(fighter.stocks(), 3);
        assert_eq!(fighter.health(), 0);
        assert_eq!(fighter.lifecycle(), Lifecycle::Alive);
        assert!(a.game.outbox.is_empty());

        // The nickname stays open to its owner
        a.handle_message(B, propose(PropertyField::Nickname, PropertyValue::Text("Nova".into()), 0), &mut host_a)
            .unwrap();
        assert_eq!(a.game().fighter(&B).unwrap().nickname(), "Nova");
    }

    #[tokio::test]
    async fn test_unknown_property_triggers_resync() {
        let (mut a, mut b) = (create_session(A), create_session(B));
        let (mut host_a, mut host_b) = (TestHost::default(), TestHost::default());

        a.set_ready(1, "host".into(), ProfileId::new("p-a"), &mut host_a).unwrap();
        a.handle_message(
            B,
            PeerMessage::SelectionReady {
                slot: SlotId::Two,
                selection: 2,
                username: "guest".into(),
                profile_id: ProfileId::new("p-b"),
            },
            &mut host_a,
        )
        .unwrap();
        a.game.outbox.drain();

        // The follower only sees the property change, not the release
        a.set_nickname("Ace".into()).unwrap();
        pump(&mut a, &mut b, &mut host_b);
        let queued = b.game.outbox.drain();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].message, PeerMessage::ResyncRequest);

        a.handle_message(B, PeerMessage::ResyncRequest, &mut host_a).unwrap();
        let reply = a.game.outbox.drain();
        assert_eq!(reply[0].target, InvokeTarget::Peer(B));
        for out in reply {
            b.handle_message(A, out.message, &mut host_b).unwrap();
        }

        assert_eq!(b.phase(), MatchPhase::CountingDown);
        assert_eq!(b.game().fighter(&A).unwrap().nickname(), "Ace");
        assert_eq!(b.game().digest(), a.game().digest());
    }

    #[tokio::test]
    async fn test_opponent_leaving_aborts() {
        let (mut a, mut b) = (create_session(A), create_session(B));
        let (mut host_a, mut host_b) = (TestHost::default(), TestHost::default());
        ready_both(&mut a, &mut b, &mut host_a, &mut host_b);

        b.leave(&mut host_b);
        assert_eq!(b.state, SessionState::Aborted);
        pump(&mut b, &mut a, &mut host_a);

        assert_eq!(a.state, SessionState::Aborted);
        assert_eq!(host_a.ended, vec!["opponent left".to_string()]);
        assert_eq!(host_a.despawned.len(), 2);
        assert!(matches!(a.tick(&mut host_a), Err(SessionError::Aborted)));

        // Abort is queued for any remaining peers
        let queued = a.game.outbox.drain();
        assert!(queued
            .iter()
            .any(|out| matches!(out.message, PeerMessage::Abort { .. })));
    }

    #[tokio::test]
    async fn test_session_manager() {
        let manager = SessionManager::new();

        let session_id = manager
            .create_session(A, A, match_config(), SessionConfig::default())
            .await;
        assert_eq!(manager.session_count().await, 1);

        manager.register_participant(B, session_id).await;
        let session = manager.get_participant_session(&B).await.unwrap();
        assert_eq!(manager.cleanup().await, 0);

        {
            let mut session = session.write().await;
            session.abort("test", &mut TestHost::default());
        }
        assert_eq!(manager.cleanup().await, 1);
        assert_eq!(manager.session_count().await, 0);
        assert!(manager.get_participant_session(&B).await.is_none());
    }
}
