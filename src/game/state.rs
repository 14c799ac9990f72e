//! Match State
//!
//! Everything one session owns: the phase machine, the ready barrier, both
//! fighters' vitals, timers, the clock, input and the outgoing queue. Each
//! peer holds one. The authority's copy is canonical; a follower's copy is
//! only ever written from authority messages.
//!
//! Uses BTreeMap for a stable fighter order on every peer.

use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::MatchConfig;
use crate::core::hash::{short_hex, StateHash, StateHasher};
use crate::core::ids::{ParticipantId, ProfileId, SlotId};
use crate::game::clock::{ClockReading, MatchClock};
use crate::game::events::{CountdownKind, GameEvent, GameEventData, PresentationUpdate};
use crate::game::host::MatchHost;
use crate::game::input::{AuthorityInputChannel, InputFrame};
use crate::game::machine::{MatchPhase, MatchStateMachine, PhaseTrigger, PhaseUpdate, RosterEntry, Transition};
use crate::game::ready::{BarrierRelease, ReadyBarrier, ReadyEntry, SelectionIndex};
use crate::game::results::{MatchResult, MatchResultsAggregator, ResultsError};
use crate::game::timer::{CountdownSignal, CountdownTimer};
use crate::game::vitals::{FighterVitals, Lifecycle, VitalsRules};
use crate::network::protocol::{PeerMessage, PropertyEntry, Snapshot};
use crate::network::session::SessionError;
use crate::sync::outbox::{InvokeTarget, Outbox};
use crate::sync::property::ProposalOutcome;
use crate::sync::value::{PropertyKey, PropertyValue, Revision, SyncError};

/// Session-scoped match state.
pub struct MatchState {
    /// Ticks run so far.
    pub tick: u32,
    pub(crate) local: ParticipantId,
    pub(crate) authority: ParticipantId,
    pub(crate) config: MatchConfig,
    pub(crate) rules: VitalsRules,
    pub(crate) machine: MatchStateMachine,
    pub(crate) barrier: ReadyBarrier,
    pub(crate) slots: [Option<ParticipantId>; 2],
    pub(crate) fighters: BTreeMap<ParticipantId, FighterVitals>,
    pub(crate) inputs: AuthorityInputChannel,
    pub(crate) start_countdown: CountdownTimer,
    pub(crate) end_countdown: CountdownTimer,
    pub(crate) clock: MatchClock,
    pub(crate) results: MatchResultsAggregator,
    /// Result received from the authority (follower side).
    pub(crate) remote_result: Option<MatchResult>,
    pub(crate) outbox: Outbox,
    pub(crate) events: Vec<GameEvent>,
    pub(crate) presentation: broadcast::Sender<PresentationUpdate>,
    pub(crate) last_clock_second: Option<u32>,
}

impl MatchState {
    /// Fresh state in `Waiting`.
    pub fn new(
        local: ParticipantId,
        authority: ParticipantId,
        config: MatchConfig,
        selection_timeout_ticks: Option<u32>,
        presentation: broadcast::Sender<PresentationUpdate>,
    ) -> Self {
        let tps = config.ticks_per_second();
        let rules = VitalsRules {
            stage: config.stage,
            respawn_point: config.respawn_point,
            hit_lockout_ticks: config.ticks(config.hit_lockout),
            respawn_delay_ticks: config.respawn_delay_ticks,
        };
        let start_countdown = CountdownTimer::new("start", tps, config.ticks(config.start_countdown.hold));
        let end_countdown = CountdownTimer::new("end", tps, config.ticks(config.end_countdown.hold));
        let clock = MatchClock::new(
            config.ticks(config.match_duration),
            config.end_countdown.seconds.saturating_mul(tps),
            tps,
        );

        Self {
            tick: 0,
            local,
            authority,
            rules,
            machine: MatchStateMachine::new(local == authority),
            barrier: ReadyBarrier::new(selection_timeout_ticks),
            slots: [None, None],
            fighters: BTreeMap::new(),
            inputs: AuthorityInputChannel::new(local, authority),
            start_countdown,
            end_countdown,
            clock,
            results: MatchResultsAggregator::new(config.tie_break),
            remote_result: None,
            outbox: Outbox::new(),
            events: Vec::new(),
            presentation,
            last_clock_second: None,
            config,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// True on the authority.
    #[inline]
    pub fn is_authority(&self) -> bool {
        self.local == self.authority
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> MatchPhase {
        self.machine.phase()
    }

    /// Phase machine.
    pub fn machine(&self) -> &MatchStateMachine {
        &self.machine
    }

    /// Ready barrier.
    pub fn barrier(&self) -> &ReadyBarrier {
        &self.barrier
    }

    /// Match clock.
    pub fn clock(&self) -> &MatchClock {
        &self.clock
    }

    /// Input channel.
    pub fn inputs(&self) -> &AuthorityInputChannel {
        &self.inputs
    }

    /// A fighter's vitals.
    pub fn fighter(&self, id: &ParticipantId) -> Option<&FighterVitals> {
        self.fighters.get(id)
    }

    /// A fighter's vitals, mutable (listener registration, local proposals).
    pub fn fighter_mut(&mut self, id: &ParticipantId) -> Option<&mut FighterVitals> {
        self.fighters.get_mut(id)
    }

    /// All fighters in id order.
    pub fn fighters(&self) -> impl Iterator<Item = &FighterVitals> {
        self.fighters.values()
    }

    /// Participant assigned to a slot.
    pub fn slot_participant(&self, slot: SlotId) -> Option<ParticipantId> {
        self.slots[slot.index()]
    }

    /// Slot a participant holds.
    pub fn slot_of(&self, participant: &ParticipantId) -> Option<SlotId> {
        SlotId::ALL
            .into_iter()
            .find(|slot| self.slots[slot.index()] == Some(*participant))
    }

    /// The match result: computed here on the authority, received on a
    /// follower.
    pub fn result(&self) -> Option<&MatchResult> {
        self.results.result().or(self.remote_result.as_ref())
    }

    /// Configuration.
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Queue for this tick's outgoing messages.
    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Take the events recorded since the last call, in processing order.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        let mut events = std::mem::take(&mut self.events);
        events.sort();
        events
    }

    pub(crate) fn push_event(&mut self, data: GameEventData) {
        self.events.push(GameEvent::new(self.tick, data));
    }

    pub(crate) fn present(&self, update: PresentationUpdate) {
        // No subscribers is fine.
        let _ = self.presentation.send(update);
    }

    // =========================================================================
    // Character select
    // =========================================================================

    /// Seat a participant in a slot. Fails if the slot is taken.
    pub fn assign_slot(&mut self, slot: SlotId, participant: ParticipantId) -> bool {
        match self.slots[slot.index()] {
            Some(current) => current == participant,
            None => {
                self.slots[slot.index()] = Some(participant);
                true
            }
        }
    }

    /// Free a participant's slot (only before the barrier releases).
    pub fn vacate_slot(&mut self, participant: &ParticipantId) -> Option<SlotId> {
        let slot = self.slot_of(participant)?;
        if self.barrier.has_fired() {
            return None;
        }
        self.slots[slot.index()] = None;
        self.barrier.clear(slot);
        Some(slot)
    }

    /// Record a slot's ready (authority). On the call that readies the
    /// second slot, runs the release sequence and enters `CountingDown`.
    pub fn set_ready<H: MatchHost + ?Sized>(
        &mut self,
        slot: SlotId,
        selection: SelectionIndex,
        username: String,
        profile_id: ProfileId,
        host: &mut H,
    ) -> Result<Transition, SessionError> {
        if !self.is_authority() {
            return Err(SessionError::NotAuthority("set ready"));
        }
        if !self.barrier.is_open() {
            debug!("Ready from {:?} ignored: barrier closed", slot);
            return Ok(Transition::Ignored);
        }
        let profile = host.fetch_profile(&profile_id);
        if let Some(stats) = &profile {
            debug!("Profile {} stats: {} wins / {} losses", stats.profile_id.as_str(), stats.wins, stats.losses);
        }
        let entry = ReadyEntry {
            selection,
            username,
            profile_id,
            profile,
        };
        match self.barrier.set_ready(slot, entry) {
            Some(release) => self.release(release, host),
            None => Ok(Transition::Ignored),
        }
    }

    /// Withdraw a slot's ready (authority).
    pub fn clear_ready(&mut self, slot: SlotId) -> bool {
        self.barrier.clear(slot)
    }

    fn release<H: MatchHost + ?Sized>(
        &mut self,
        release: BarrierRelease,
        host: &mut H,
    ) -> Result<Transition, SessionError> {
        let roster = self.build_roster(&release)?;

        self.enter_match_scene(&roster, host);
        if !self.machine.assign_roster(roster) {
            warn!("Roster already assigned");
        }
        self.push_event(GameEventData::BarrierReleased);
        self.transition(PhaseTrigger::BarrierReleased, host)
    }

    fn build_roster(&self, release: &BarrierRelease) -> Result<[RosterEntry; 2], SessionError> {
        let entry = |slot: SlotId| -> Result<RosterEntry, SessionError> {
            let participant = self.slots[slot.index()].ok_or(SessionError::MissingParticipant(slot))?;
            let ReadyEntry { selection, username, profile_id, .. } = release.entry(slot).clone();
            Ok(RosterEntry {
                participant,
                slot,
                selection,
                username,
                profile_id,
            })
        };
        Ok([entry(SlotId::One)?, entry(SlotId::Two)?])
    }

    /// Stage select, placeholder despawn and fighter spawn. Runs once per
    /// peer: on release (authority) or first roster broadcast (follower).
    fn enter_match_scene<H: MatchHost + ?Sized>(&mut self, roster: &[RosterEntry; 2], host: &mut H) {
        if !self.fighters.is_empty() {
            return;
        }
        host.select_stage();
        host.despawn_selection_placeholders();

        for entry in roster {
            let spawn = self.config.spawn_points[entry.slot.index()];
            let mut vitals = FighterVitals::new(
                entry.participant,
                entry.slot,
                entry.username.clone(),
                self.config.starting_stocks,
                spawn,
                self.authority,
                self.local,
            );
            self.attach_presentation(&mut vitals);
            host.spawn_fighter(entry.participant, entry.slot, entry.selection, spawn);
            self.fighters.insert(entry.participant, vitals);
        }
        info!(
            "Spawned {} vs {}",
            roster[0].username, roster[1].username
        );
    }

    fn attach_presentation(&self, vitals: &mut FighterVitals) {
        let tx = self.presentation.clone();
        let key = vitals.health_mut().key();
        vitals.health_mut().subscribe(move |_, new: &i32| {
            let _ = tx.send(PresentationUpdate::PropertyChanged { key, value: PropertyValue::Int(*new) });
        });

        let tx = self.presentation.clone();
        let key = vitals.stocks_mut().key();
        vitals.stocks_mut().subscribe(move |_, new: &i32| {
            let _ = tx.send(PresentationUpdate::PropertyChanged { key, value: PropertyValue::Int(*new) });
        });

        let tx = self.presentation.clone();
        let key = vitals.nickname_mut().key();
        vitals.nickname_mut().subscribe(move |_, new: &String| {
            let _ = tx.send(PresentationUpdate::PropertyChanged { key, value: PropertyValue::Text(new.clone()) });
        });
    }

    // =========================================================================
    // Transitions (authority)
    // =========================================================================

    /// Request a transition and run its entry effects.
    pub(crate) fn transition<H: MatchHost + ?Sized>(
        &mut self,
        trigger: PhaseTrigger,
        host: &mut H,
    ) -> Result<Transition, SessionError> {
        let transition = self.machine.request(trigger, self.tick)?;
        let Transition::Applied { from, to } = transition else {
            return Ok(transition);
        };

        self.push_event(GameEventData::PhaseChanged { from, to });
        self.present(PresentationUpdate::Phase(to));
        self.outbox.push(InvokeTarget::All, PeerMessage::PhaseChanged(self.machine.update()));

        match to {
            MatchPhase::CountingDown => {
                if let Some(signal) = self.start_countdown.start(self.config.start_countdown.seconds) {
                    self.countdown_signal(CountdownKind::Start, signal);
                }
            }
            MatchPhase::Running => {
                self.clock.start();
                self.emit_clock();
            }
            MatchPhase::GameOver => {
                self.clock.stop();
                if !self.end_countdown.is_holding() && self.end_countdown.cancel() {
                    self.countdown_signal(CountdownKind::End, CountdownSignal::Cleared);
                }
                self.finalize(host)?;
            }
            MatchPhase::Waiting => {}
        }
        Ok(transition)
    }

    /// Compute the result once and hand it to persistence and the peers.
    fn finalize<H: MatchHost + ?Sized>(&mut self, host: &mut H) -> Result<(), SessionError> {
        if self.results.is_computed() {
            return Ok(());
        }
        let reason = self
            .machine
            .end_reason()
            .ok_or(SessionError::InvalidPhase { expected: MatchPhase::GameOver, actual: self.phase() })?;
        let end_tick = self.machine.ends_at_tick().unwrap_or(self.tick);

        let roster = self.machine.roster();
        let pair = |slot: SlotId| {
            let entry = roster.map(|r| &r[slot.index()])?;
            let fighter = self.fighters.get(&entry.participant)?;
            let ready = self.barrier.entry(slot)?;
            Some((fighter, ready))
        };
        let fighters = [pair(SlotId::One), pair(SlotId::Two)];

        let result = match self.results.compute(fighters, reason, end_tick) {
            Ok(result) => result.clone(),
            Err(ResultsError::MissingFighter(slot)) => return Err(SessionError::MissingParticipant(slot)),
        };

        match (result.winner, result.loser) {
            (Some(winner), Some(loser)) => info!("Match over: {} beat {} ({:?})", winner, loser, result.decided_by),
            _ => info!("Match over: draw ({:?})", result.decided_by),
        }
        self.push_event(GameEventData::MatchEnded {
            winner: result.winner,
            reason: result.reason,
        });
        host.record_match_result(&result);
        self.outbox.push(InvokeTarget::All, PeerMessage::MatchOver(result.clone()));
        self.present(PresentationUpdate::Results(Box::new(result)));
        Ok(())
    }

    pub(crate) fn countdown_signal(&mut self, kind: CountdownKind, signal: CountdownSignal) {
        match signal {
            CountdownSignal::Tick(seconds) => {
                self.push_event(GameEventData::CountdownTick { kind, seconds });
                self.present(PresentationUpdate::Countdown {
                    kind,
                    text: PresentationUpdate::countdown_text(kind, seconds),
                });
                self.outbox.push(InvokeTarget::All, PeerMessage::Countdown { kind, seconds });
            }
            CountdownSignal::Expired => {
                self.push_event(GameEventData::CountdownExpired { kind });
                self.present(PresentationUpdate::Countdown {
                    kind,
                    text: PresentationUpdate::countdown_text(kind, 0),
                });
                self.outbox.push(InvokeTarget::All, PeerMessage::Countdown { kind, seconds: 0 });
            }
            CountdownSignal::Cleared => {
                self.present(PresentationUpdate::CountdownCleared { kind });
                self.outbox.push(InvokeTarget::All, PeerMessage::CountdownCleared { kind });
            }
        }
    }

    /// Publish the clock when the displayed second changes.
    pub(crate) fn emit_clock(&mut self) {
        let seconds = self.clock.remaining_seconds();
        if self.last_clock_second == Some(seconds) {
            return;
        }
        self.last_clock_second = Some(seconds);
        self.present(PresentationUpdate::Clock { remaining_seconds: seconds });
        if self.is_authority() {
            self.outbox.push(InvokeTarget::All, PeerMessage::Clock(self.clock.reading()));
        }
    }

    // =========================================================================
    // Inbound (role checked by the session before dispatch)
    // =========================================================================

    /// Authority: a follower's input frame.
    pub fn receive_input(&mut self, from: ParticipantId, tick: u32, frame: InputFrame) -> bool {
        if self.phase() != MatchPhase::Running {
            return false;
        }
        self.inputs.receive(from, tick, frame)
    }

    /// Authority: a property proposal.
    pub fn receive_proposal(
        &mut self,
        from: ParticipantId,
        key: PropertyKey,
        value: &PropertyValue,
        base_revision: Revision,
    ) -> Result<ProposalOutcome, SyncError> {
        let fighter = self.fighters.get_mut(&key.fighter).ok_or(SyncError::UnknownProperty(key))?;
        fighter.receive_proposal(from, key.field, value, base_revision, &mut self.outbox)
    }

    /// Follower: an authoritative property change. Removes the local
    /// fighter entity when the change eliminates it.
    pub fn apply_property<H: MatchHost + ?Sized>(
        &mut self,
        key: PropertyKey,
        value: &PropertyValue,
        revision: Revision,
        host: &mut H,
    ) -> Result<bool, SyncError> {
        let fighter = self.fighters.get_mut(&key.fighter).ok_or(SyncError::UnknownProperty(key))?;
        let was_alive = fighter.lifecycle() == Lifecycle::Alive;
        let changed = fighter.apply_remote(key.field, value, revision)?;
        if was_alive && fighter.lifecycle() == Lifecycle::Eliminated {
            debug!("Fighter {} eliminated by authority broadcast", key.fighter);
            host.despawn_fighter(key.fighter);
        }
        Ok(changed)
    }

    /// Follower: adopt the authority's phase state. Spawns the local
    /// fighter copies the first time a roster appears.
    pub fn apply_phase_update<H: MatchHost + ?Sized>(&mut self, update: PhaseUpdate, host: &mut H) -> Transition {
        let roster = update.roster.clone();
        let transition = self.machine.apply_remote(update);
        if let Some(roster) = roster {
            for entry in &roster {
                self.slots[entry.slot.index()] = Some(entry.participant);
            }
            self.enter_match_scene(&roster, host);
        }

        if let Transition::Applied { from, to } = transition {
            self.push_event(GameEventData::PhaseChanged { from, to });
            self.present(PresentationUpdate::Phase(to));
            match to {
                MatchPhase::Running => {
                    self.clock.start();
                }
                MatchPhase::GameOver => self.clock.stop(),
                _ => {}
            }
        }
        transition
    }

    /// Follower: countdown display from the authority.
    pub fn apply_countdown(&mut self, kind: CountdownKind, seconds: Option<u32>) {
        match seconds {
            Some(seconds) => self.present(PresentationUpdate::Countdown {
                kind,
                text: PresentationUpdate::countdown_text(kind, seconds),
            }),
            None => self.present(PresentationUpdate::CountdownCleared { kind }),
        }
    }

    /// Follower: realign the clock.
    pub fn apply_clock(&mut self, reading: ClockReading) {
        self.clock.sync_to(reading);
        self.emit_clock();
    }

    /// Follower: the authority's final result.
    pub fn apply_result(&mut self, result: MatchResult) {
        if self.remote_result.is_some() {
            return;
        }
        self.present(PresentationUpdate::Results(Box::new(result.clone())));
        self.remote_result = Some(result);
    }

    // =========================================================================
    // Snapshot / resync
    // =========================================================================

    /// Digest over phase, roster and every fighter's replicated fields.
    pub fn digest(&self) -> StateHash {
        let mut hasher = StateHasher::for_snapshot();
        let update = self.machine.update();
        hasher.update_u8(update.phase as u8);
        hasher.update_u32(update.revision);
        if let Some(roster) = &update.roster {
            for entry in roster {
                hasher.update_uuid(entry.participant.as_bytes());
                hasher.update_u32(entry.selection);
            }
        }
        for fighter in self.fighters.values() {
            fighter.hash_into(&mut hasher);
        }
        hasher.finalize()
    }

    /// Full replicated state (authority).
    pub fn snapshot(&self) -> Snapshot {
        let properties = self
            .fighters
            .values()
            .flat_map(|f| {
                let id = f.id();
                f.snapshot().into_iter().map(move |(field, value, revision)| PropertyEntry {
                    key: PropertyKey::new(id, field),
                    value,
                    revision,
                })
            })
            .collect();

        Snapshot {
            tick: self.tick,
            phase: self.machine.update(),
            properties,
            clock: self.clock.reading(),
            digest: self.digest(),
        }
    }

    /// Apply a snapshot (follower). Revision rules still hold, so nothing
    /// moves backwards. Returns true if the local digest now matches.
    pub fn apply_snapshot<H: MatchHost + ?Sized>(&mut self, snapshot: Snapshot, host: &mut H) -> bool {
        self.apply_phase_update(snapshot.phase, host);
        for entry in &snapshot.properties {
            if let Err(e) = self.apply_property(entry.key, &entry.value, entry.revision, host) {
                debug!("Snapshot entry {} skipped: {}", entry.key, e);
            }
        }
        self.clock.sync_to(snapshot.clock);

        let local = self.digest();
        let matches = local == snapshot.digest;
        if !matches {
            warn!(
                "State digest mismatch after snapshot at tick {}: local {} authority {}",
                snapshot.tick,
                short_hex(&local),
                short_hex(&snapshot.digest)
            );
        }
        matches
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Stop everything and remove fighters from the scene.
    pub fn teardown<H: MatchHost + ?Sized>(&mut self, host: &mut H) {
        self.barrier.cancel();
        self.start_countdown.cancel();
        self.end_countdown.cancel();
        self.clock.stop();
        for (id, fighter) in self.fighters.iter_mut() {
            if fighter.is_active() {
                fighter.deactivate();
                host.despawn_fighter(*id);
            }
            self.inputs.clear(id);
        }
    }
}

impl std::fmt::Debug for MatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchState")
            .field("tick", &self.tick)
            .field("local", &self.local)
            .field("authority", &self.authority)
            .field("phase", &self.phase())
            .field("fighters", &self.fighters.len())
            .finish()
    }
}
