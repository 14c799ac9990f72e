//! Fighter Vitals
//!
//! Damage taken, lives and display name for one fighter, each carried by a
//! [`NetworkedProperty`], plus the authority-only out-of-bounds rule that
//! costs a life.
//!
//! "Health" here counts damage *taken* within the current life. It only
//! grows from hits, shrinks from heals (floored at zero) and resets to zero
//! when a life is lost.

use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::core::hash::StateHasher;
use crate::core::ids::{ParticipantId, SlotId};
use crate::core::vec2::Vec2;
use crate::game::timer::LockoutTimer;
use crate::sync::outbox::Outbox;
use crate::sync::property::{NetworkedProperty, ProposalOutcome};
use crate::sync::value::{PropertyField, PropertyKey, PropertyValue, Revision, SyncError};

// =============================================================================
// STAGE BOUNDS
// =============================================================================

/// Rectangular stage boundary in world units. A fighter strictly outside
/// it loses a life.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageBounds {
    /// Upper edge (y).
    pub top: f32,
    /// Lower edge (y).
    pub bottom: f32,
    /// Left edge (x).
    pub left: f32,
    /// Right edge (x).
    pub right: f32,
}

impl Default for StageBounds {
    fn default() -> Self {
        Self {
            top: 15.0,
            bottom: -5.0,
            left: -15.0,
            right: 15.0,
        }
    }
}

impl StageBounds {
    /// True if `point` is on or inside the boundary. Non-finite positions
    /// count as outside.
    pub fn contains(&self, point: Vec2) -> bool {
        point.is_finite()
            && point.x >= self.left
            && point.x <= self.right
            && point.y >= self.bottom
            && point.y <= self.top
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Fighter lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Has stocks left.
    Alive,
    /// Out of stocks. Terminal.
    Eliminated,
}

/// Result of a life-loss transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifeOutcome {
    /// Lost a life, repositioned at the respawn point.
    LifeLost {
        /// Lives left after the loss.
        stocks_left: i32,
    },
    /// Lost the last life.
    Eliminated,
}

/// Settings the vitals rules need from the match configuration.
#[derive(Clone, Copy, Debug)]
pub struct VitalsRules {
    /// Stage rectangle for the out-of-bounds check.
    pub stage: StageBounds,
    /// Where a fighter reappears after losing a life.
    pub respawn_point: Vec2,
    /// Ticks of input lockout after a hit.
    pub hit_lockout_ticks: u32,
    /// Ticks the fighter stays respawning after a life loss.
    pub respawn_delay_ticks: u32,
}

// =============================================================================
// FIGHTER VITALS
// =============================================================================

/// Networked vitals for one fighter, created at spawn and dropped at
/// despawn.
#[derive(Debug)]
pub struct FighterVitals {
    id: ParticipantId,
    slot: SlotId,
    health: NetworkedProperty<i32>,
    stocks: NetworkedProperty<i32>,
    nickname: NetworkedProperty<String>,
    /// Lives lost. Not networked; the opponent's kill count reads it.
    deaths: u32,
    /// Damage this fighter has landed on the opponent.
    damage_dealt: u32,
    /// Owned by physics; read for the out-of-bounds check.
    pub position: Vec2,
    /// Owned by physics.
    pub velocity: Vec2,
    respawning: bool,
    respawn_ticks_left: u32,
    lifecycle: Lifecycle,
    lockout: LockoutTimer,
    active: bool,
}

impl FighterVitals {
    /// Create vitals for a freshly spawned fighter. The fighter's own
    /// participant owns its properties; `authority` holds the canonical copy.
    pub fn new(
        id: ParticipantId,
        slot: SlotId,
        nickname: String,
        starting_stocks: i32,
        spawn: Vec2,
        authority: ParticipantId,
        local: ParticipantId,
    ) -> Self {
        let prop = |field| PropertyKey::new(id, field);
        Self {
            id,
            slot,
            health: NetworkedProperty::new(prop(PropertyField::Health), 0, id, authority, local),
            stocks: NetworkedProperty::new(
                prop(PropertyField::Stocks),
                starting_stocks.max(0),
                id,
                authority,
                local,
            ),
            nickname: NetworkedProperty::new(prop(PropertyField::Nickname), nickname, id, authority, local),
            deaths: 0,
            damage_dealt: 0,
            position: spawn,
            velocity: Vec2::ZERO,
            respawning: false,
            respawn_ticks_left: 0,
            lifecycle: Lifecycle::Alive,
            lockout: LockoutTimer::new(),
            active: true,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Fighter id.
    #[inline]
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Character-select slot.
    #[inline]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Damage taken this life.
    #[inline]
    pub fn health(&self) -> i32 {
        *self.health.get()
    }

    /// Lives remaining.
    #[inline]
    pub fn stocks(&self) -> i32 {
        *self.stocks.get()
    }

    /// Display name.
    #[inline]
    pub fn nickname(&self) -> &str {
        self.nickname.get()
    }

    /// Lives lost so far.
    #[inline]
    pub fn deaths(&self) -> u32 {
        self.deaths
    }

    /// Damage landed on the opponent.
    #[inline]
    pub fn damage_dealt(&self) -> u32 {
        self.damage_dealt
    }

    /// Current lifecycle state.
    #[inline]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// True while the life-loss transaction or respawn delay is in flight.
    #[inline]
    pub fn is_respawning(&self) -> bool {
        self.respawning
    }

    /// True while locked out after a hit.
    #[inline]
    pub fn is_locked_out(&self) -> bool {
        self.lockout.is_active()
    }

    /// True if the fighter entity is live in the scene.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether input should reach physics this tick.
    pub fn can_act(&self) -> bool {
        self.active
            && self.lifecycle == Lifecycle::Alive
            && !self.respawning
            && !self.lockout.is_active()
    }

    /// Health property, for listener registration.
    pub fn health_mut(&mut self) -> &mut NetworkedProperty<i32> {
        &mut self.health
    }

    /// Stocks property, for listener registration.
    pub fn stocks_mut(&mut self) -> &mut NetworkedProperty<i32> {
        &mut self.stocks
    }

    /// Nickname property, for listener registration.
    pub fn nickname_mut(&mut self) -> &mut NetworkedProperty<String> {
        &mut self.nickname
    }

    // -------------------------------------------------------------------------
    // Damage / heal
    // -------------------------------------------------------------------------

    /// Take a hit. Negative amounts count as zero. Restarts the input
    /// lockout even for a zero hit so repeated hits keep registering.
    ///
    /// Returns the clamped amount and what happened to the health proposal.
    pub fn damage(&mut self, amount: i32, lockout_ticks: u32, outbox: &mut Outbox) -> (u32, ProposalOutcome) {
        let amount = amount.max(0);
        if self.lifecycle == Lifecycle::Eliminated {
            return (0, ProposalOutcome::Applied { changed: false });
        }
        let next = self.health().saturating_add(amount);
        let outcome = self.health.propose(next, outbox);
        self.lockout.restart(lockout_ticks);
        (amount as u32, outcome)
    }

    /// Recover. Negative amounts count as zero; health floors at zero.
    pub fn heal(&mut self, amount: i32, outbox: &mut Outbox) -> ProposalOutcome {
        let amount = amount.max(0);
        let next = self.health().saturating_sub(amount).max(0);
        self.health.propose(next, outbox)
    }

    /// Credit damage this fighter landed.
    pub fn record_damage_dealt(&mut self, amount: u32) {
        self.damage_dealt = self.damage_dealt.saturating_add(amount);
    }

    /// Request a new display name.
    pub fn set_nickname(&mut self, name: String, outbox: &mut Outbox) -> ProposalOutcome {
        self.nickname.propose(name, outbox)
    }

    // -------------------------------------------------------------------------
    // Out of bounds
    // -------------------------------------------------------------------------

    /// Authority-only per-tick boundary check.
    ///
    /// If the fighter is alive, not already respawning and outside the
    /// stage, runs the life-loss transaction once: one stock off, one death
    /// on, health back to zero. The last stock eliminates and deactivates the
    /// fighter; otherwise it is moved to the respawn point with zero
    /// velocity. The respawning flag is held for the whole transaction so a
    /// second check in the same tick is a no-op.
    pub fn check_out_of_bounds(
        &mut self,
        rules: &VitalsRules,
        outbox: &mut Outbox,
    ) -> Result<Option<LifeOutcome>, SyncError> {
        if !self.stocks.is_authority() {
            return Err(SyncError::NotAuthority {
                key: self.stocks.key(),
                operation: "run the out-of-bounds check",
            });
        }
        if self.lifecycle != Lifecycle::Alive || self.respawning || !self.active {
            return Ok(None);
        }
        if rules.stage.contains(self.position) {
            return Ok(None);
        }

        self.respawning = true;

        let stocks_left = (self.stocks() - 1).max(0);
        self.stocks.apply(stocks_left, outbox)?;
        self.deaths += 1;
        self.health.apply(0, outbox)?;
        self.lockout.clear();

        if stocks_left == 0 {
            self.lifecycle = Lifecycle::Eliminated;
            self.active = false;
            self.velocity = Vec2::ZERO;
            info!("Fighter {} eliminated (deaths: {})", self.id, self.deaths);
            return Ok(Some(LifeOutcome::Eliminated));
        }

        self.position = rules.respawn_point;
        self.velocity = Vec2::ZERO;
        if rules.respawn_delay_ticks == 0 {
            self.respawning = false;
        } else {
            self.respawn_ticks_left = rules.respawn_delay_ticks;
        }
        debug!("Fighter {} lost a life ({} left)", self.id, stocks_left);
        Ok(Some(LifeOutcome::LifeLost { stocks_left }))
    }

    /// Per-tick bookkeeping: lockout and respawn delay.
    pub fn advance(&mut self) {
        self.lockout.advance();
        if self.respawning && self.lifecycle == Lifecycle::Alive && self.respawn_ticks_left > 0 {
            self.respawn_ticks_left -= 1;
            if self.respawn_ticks_left == 0 {
                self.respawning = false;
            }
        }
    }

    /// Remove from play without eliminating (teardown).
    pub fn deactivate(&mut self) {
        self.active = false;
        self.lockout.clear();
    }

    // -------------------------------------------------------------------------
    // Replication
    // -------------------------------------------------------------------------

    /// Route an inbound proposal to the addressed property (authority side).
    ///
    /// Only the nickname is open to peers. Health and stocks move through
    /// hits, heals and the out-of-bounds check on the authority.
    pub fn receive_proposal(
        &mut self,
        from: ParticipantId,
        field: PropertyField,
        value: &PropertyValue,
        base_revision: Revision,
        outbox: &mut Outbox,
    ) -> Result<ProposalOutcome, SyncError> {
        match field {
            PropertyField::Nickname => self.nickname.receive_proposal(from, value, base_revision, outbox),
            PropertyField::Health | PropertyField::Stocks => {
                let key = PropertyKey::new(self.id, field);
                if !self.stocks.is_authority() {
                    return Err(SyncError::NotAuthority { key, operation: "accept proposals" });
                }
                Err(SyncError::NotProposable { key, from })
            }
        }
    }

    /// Apply an authority broadcast (follower side). A drop in stocks counts
    /// as deaths, and reaching zero eliminates the local copy.
    pub fn apply_remote(
        &mut self,
        field: PropertyField,
        value: &PropertyValue,
        revision: Revision,
    ) -> Result<bool, SyncError> {
        match field {
            PropertyField::Health => self.health.apply_remote(value, revision),
            PropertyField::Nickname => self.nickname.apply_remote(value, revision),
            PropertyField::Stocks => {
                let before = self.stocks();
                let changed = self.stocks.apply_remote(value, revision)?;
                let after = self.stocks();
                if after < before {
                    self.deaths += (before - after) as u32;
                }
                if after == 0 && self.lifecycle == Lifecycle::Alive {
                    self.lifecycle = Lifecycle::Eliminated;
                    self.active = false;
                }
                Ok(changed)
            }
        }
    }

    /// Every property's value and revision, in field order.
    pub fn snapshot(&self) -> Vec<(PropertyField, PropertyValue, Revision)> {
        let (health, health_rev) = self.health.snapshot();
        let (stocks, stocks_rev) = self.stocks.snapshot();
        let (nickname, nickname_rev) = self.nickname.snapshot();
        vec![
            (PropertyField::Health, health, health_rev),
            (PropertyField::Stocks, stocks, stocks_rev),
            (PropertyField::Nickname, nickname, nickname_rev),
        ]
    }

    /// Feed the replicated fields into a digest.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_uuid(self.id.as_bytes());
        hasher.update_u8(self.slot as u8);
        hasher.update_i32(self.health());
        hasher.update_i32(self.stocks());
        hasher.update_str(self.nickname());
        hasher.update_bool(self.lifecycle == Lifecycle::Eliminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::PeerMessage;
    use crate::sync::value::SyncCommand;

    const HOST: ParticipantId = ParticipantId::new([1; 16]);
    const GUEST: ParticipantId = ParticipantId::new([2; 16]);

    fn rules() -> VitalsRules {
        VitalsRules {
            stage: StageBounds::default(),
            respawn_point: Vec2::new(0.0, 5.0),
            hit_lockout_ticks: 25,
            respawn_delay_ticks: 0,
        }
    }

    fn authority_vitals() -> FighterVitals {
        FighterVitals::new(GUEST, SlotId::Two, "Guest".into(), 3, Vec2::new(5.0, 1.0), HOST, HOST)
    }

    #[test]
    fn test_stage_bounds() {
        let stage = StageBounds::default();
        assert!(stage.contains(Vec2::new(0.0, 0.0)));
        assert!(stage.contains(Vec2::new(15.0, 15.0)));
        assert!(stage.contains(Vec2::new(-15.0, -5.0)));
        assert!(!stage.contains(Vec2::new(15.1, 0.0)));
        assert!(!stage.contains(Vec2::new(0.0, -5.5)));
        assert!(!stage.contains(Vec2::new(f32::NAN, 0.0)));
    }

    #[test]
    fn test_damage_accumulates() {
        let mut vitals = authority_vitals();
        let mut out = Outbox::new();
        vitals.damage(12, 25, &mut out);
        vitals.damage(8, 25, &mut out);
        assert_eq!(vitals.health(), 20);
        assert!(vitals.is_locked_out());
        assert!(!vitals.can_act());
    }

    #[test]
    fn test_negative_damage_is_zero_damage() {
        let mut a = authority_vitals();
        let mut b = authority_vitals();
        let mut out = Outbox::new();

        let (dealt_a, outcome_a) = a.damage(-5, 25, &mut out);
        let (dealt_b, outcome_b) = b.damage(0, 25, &mut out);
        assert_eq!(dealt_a, dealt_b);
        assert_eq!(outcome_a, outcome_b);
        assert_eq!(a.health(), b.health());
        assert_eq!(a.health(), 0);
        assert_eq!(a.is_locked_out(), b.is_locked_out());
        assert!(out.is_empty());
    }

    #[test]
    fn test_heal_floors_at_zero() {
        let mut vitals = authority_vitals();
        let mut out = Outbox::new();
        vitals.damage(10, 0, &mut out);
        vitals.heal(4, &mut out);
        assert_eq!(vitals.health(), 6);
        vitals.heal(100, &mut out);
        assert_eq!(vitals.health(), 0);
        vitals.heal(-3, &mut out);
        assert_eq!(vitals.health(), 0);
    }

    #[test]
    fn test_lockout_expires() {
        let mut vitals = authority_vitals();
        vitals.damage(1, 2, &mut Outbox::new());
        vitals.advance();
        assert!(vitals.is_locked_out());
        vitals.advance();
        assert!(vitals.can_act());
    }

    #[test]
    fn test_three_falls_eliminate() {
        let mut vitals = authority_vitals();
        let mut out = Outbox::new();
        let rules = rules();

        vitals.damage(30, 0, &mut out);
        vitals.position = Vec2::new(0.0, -20.0);
        assert_eq!(
            vitals.check_out_of_bounds(&rules, &mut out).unwrap(),
            Some(LifeOutcome::LifeLost { stocks_left: 2 })
        );
        assert_eq!(vitals.stocks(), 2);
        assert_eq!(vitals.health(), 0);
        assert_eq!(vitals.deaths(), 1);
        assert_eq!(vitals.position, rules.respawn_point);
        assert_eq!(vitals.velocity, Vec2::ZERO);
        assert!(!vitals.is_respawning());

        vitals.position = Vec2::new(40.0, 0.0);
        assert_eq!(
            vitals.check_out_of_bounds(&rules, &mut out).unwrap(),
            Some(LifeOutcome::LifeLost { stocks_left: 1 })
        );

        vitals.position = Vec2::new(-40.0, 0.0);
        assert_eq!(vitals.check_out_of_bounds(&rules, &mut out).unwrap(), Some(LifeOutcome::Eliminated));
        assert_eq!(vitals.stocks(), 0);
        assert_eq!(vitals.deaths(), 3);
        assert_eq!(vitals.lifecycle(), Lifecycle::Eliminated);
        assert!(!vitals.is_active());

        // Terminal: further checks and hits do nothing.
        assert_eq!(vitals.check_out_of_bounds(&rules, &mut out).unwrap(), None);
        assert_eq!(vitals.damage(10, 0, &mut out).0, 0);
        assert_eq!(vitals.stocks(), 0);
    }

    #[test]
    fn test_respawn_delay_guards_reentry() {
        let mut vitals = authority_vitals();
        let mut out = Outbox::new();
        let rules = VitalsRules {
            respawn_delay_ticks: 3,
            ..rules()
        };

        vitals.position = Vec2::new(0.0, -20.0);
        assert!(vitals.check_out_of_bounds(&rules, &mut out).unwrap().is_some());
        assert!(vitals.is_respawning());

        // Still respawning: a second out-of-bounds reading does not cost a life.
        vitals.position = Vec2::new(0.0, -20.0);
        assert_eq!(vitals.check_out_of_bounds(&rules, &mut out).unwrap(), None);
        assert_eq!(vitals.stocks(), 2);

        for _ in 0..3 {
            vitals.advance();
        }
        assert!(!vitals.is_respawning());
        assert!(vitals.check_out_of_bounds(&rules, &mut out).unwrap().is_some());
        assert_eq!(vitals.stocks(), 1);
    }

    #[test]
    fn test_follower_cannot_check_bounds() {
        let mut vitals = FighterVitals::new(GUEST, SlotId::Two, "Guest".into(), 3, Vec2::ZERO, HOST, GUEST);
        vitals.position = Vec2::new(0.0, -50.0);
        assert!(matches!(
            vitals.check_out_of_bounds(&rules(), &mut Outbox::new()),
            Err(SyncError::NotAuthority { .. })
        ));
        assert_eq!(vitals.stocks(), 3);
    }

    #[test]
    fn test_follower_tracks_deaths_from_broadcasts() {
        let mut host = authority_vitals();
        let mut guest = FighterVitals::new(GUEST, SlotId::Two, "Guest".into(), 3, Vec2::ZERO, HOST, GUEST);
        let mut out = Outbox::new();

        for _ in 0..3 {
            host.position = Vec2::new(0.0, -50.0);
            host.check_out_of_bounds(&rules(), &mut out).unwrap();
        }
        for o in out.drain() {
            if let PeerMessage::Sync(SyncCommand::Changed { key, value, revision }) = o.message {
                guest.apply_remote(key.field, &value, revision).unwrap();
            }
        }
        assert_eq!(guest.stocks(), 0);
        assert_eq!(guest.deaths(), 3);
        assert_eq!(guest.lifecycle(), Lifecycle::Eliminated);
    }

    #[test]
    fn test_follower_damage_forwards_proposal() {
        let mut guest = FighterVitals::new(GUEST, SlotId::Two, "Guest".into(), 3, Vec2::ZERO, HOST, GUEST);
        let mut out = Outbox::new();
        assert_eq!(guest.damage(5, 0, &mut out).1, ProposalOutcome::Forwarded);
        assert_eq!(guest.health(), 0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_authority_refuses_vital_proposals() {
        let mut vitals = authority_vitals();
        let mut out = Outbox::new();

        for (field, value) in [
            (PropertyField::Stocks, PropertyValue::Int(99)),
            (PropertyField::Stocks, PropertyValue::Int(-3)),
            (PropertyField::Health, PropertyValue::Int(-40)),
        ] {
            assert!(matches!(
                vitals.receive_proposal(GUEST, field, &value, 0, &mut out),
                Err(SyncError::NotProposable { from, .. }) if from == GUEST
            ));
        }
        assert_eq!(vitals.stocks(), 3);
        assert_eq!(vitals.health(), 0);
        assert!(out.is_empty());

        let outcome = vitals
            .receive_proposal(GUEST, PropertyField::Nickname, &PropertyValue::Text("Rook".into()), 0, &mut out)
            .unwrap();
        assert_eq!(outcome, ProposalOutcome::Applied { changed: true });
        assert_eq!(vitals.nickname(), "Rook");
    }

    #[test]
    fn test_nickname_listener() {
        use std::sync::{Arc, Mutex};

        let mut vitals = authority_vitals();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        vitals
            .nickname_mut()
            .subscribe(move |_, new: &String| sink.lock().unwrap().push(new.clone()));

        let mut out = Outbox::new();
        vitals.set_nickname("Rook".into(), &mut out);
        vitals.set_nickname("Rook".into(), &mut out);
        assert_eq!(*seen.lock().unwrap(), vec!["Rook".to_string()]);
        assert_eq!(vitals.nickname(), "Rook");
    }
}
