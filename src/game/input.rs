//! Input Capture and Delivery
//!
//! Each peer polls its local device once per tick. The authority keeps the
//! latest frame from every participant and hands them to the movement
//! collaborator; followers ship their frame to the authority.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::ids::ParticipantId;
use crate::game::host::InputSource;
use crate::network::protocol::PeerMessage;
use crate::sync::outbox::{InvokeTarget, Outbox};

// =============================================================================
// INPUT FRAME
// =============================================================================

/// Input state for a single tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Horizontal movement axis: -1.0 (left) to +1.0 (right).
    pub movement: f32,

    /// Action flags (packed bits):
    /// - Bit 0: Jump
    /// - Bit 1: Attack
    /// - Bit 2: Dodge
    /// - Bit 3-7: Reserved
    pub flags: u8,
}

impl InputFrame {
    /// Jump flag bit
    pub const FLAG_JUMP: u8 = 0x01;

    /// Attack flag bit
    pub const FLAG_ATTACK: u8 = 0x02;

    /// Dodge flag bit
    pub const FLAG_DODGE: u8 = 0x04;

    const KNOWN_FLAGS: u8 = Self::FLAG_JUMP | Self::FLAG_ATTACK | Self::FLAG_DODGE;

    /// Idle frame (no movement, no buttons).
    pub const fn neutral() -> Self {
        Self {
            movement: 0.0,
            flags: 0,
        }
    }

    /// Build a frame from the polled device state.
    pub fn new(movement: f32, jump: bool, attack: bool, dodge: bool) -> Self {
        let mut frame = Self {
            movement,
            flags: 0,
        };
        frame.set_flag(Self::FLAG_JUMP, jump);
        frame.set_flag(Self::FLAG_ATTACK, attack);
        frame.set_flag(Self::FLAG_DODGE, dodge);
        frame.sanitized()
    }

    /// Clamp movement into [-1, 1], map NaN to 0 and clear reserved bits.
    /// Remote frames are untrusted.
    pub fn sanitized(self) -> Self {
        let movement = if self.movement.is_finite() {
            self.movement.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        Self {
            movement,
            flags: self.flags & Self::KNOWN_FLAGS,
        }
    }

    /// Jump pressed this frame.
    #[inline]
    pub fn jump(&self) -> bool {
        self.flags & Self::FLAG_JUMP != 0
    }

    /// Attack pressed this frame.
    #[inline]
    pub fn attack(&self) -> bool {
        self.flags & Self::FLAG_ATTACK != 0
    }

    /// Dodge pressed this frame.
    #[inline]
    pub fn dodge(&self) -> bool {
        self.flags & Self::FLAG_DODGE != 0
    }

    /// True if nothing is pressed and the stick is centred.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.movement == 0.0 && self.flags == 0
    }

    fn set_flag(&mut self, bit: u8, pressed: bool) {
        if pressed {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }
}

// =============================================================================
// INPUT RECORDING
// =============================================================================

/// One change point in a recording.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputDelta {
    /// Tick when this input state began
    pub tick: u32,
    /// The new input state
    pub frame: InputFrame,
}

/// Per-participant input history, storing only ticks where input changed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InputRecording {
    deltas: Vec<InputDelta>,
    /// Last tick recorded.
    pub end_tick: u32,
    #[serde(skip)]
    last_frame: Option<InputFrame>,
}

impl InputRecording {
    /// Record the frame in effect at `tick`.
    pub fn record(&mut self, tick: u32, frame: InputFrame) {
        self.end_tick = tick;
        if self.last_frame != Some(frame) {
            self.deltas.push(InputDelta { tick, frame });
            self.last_frame = Some(frame);
        }
    }

    /// Frame in effect at `tick` (neutral before the first change).
    pub fn frame_at(&self, tick: u32) -> InputFrame {
        let idx = self.deltas.partition_point(|d| d.tick <= tick);
        if idx == 0 {
            InputFrame::neutral()
        } else {
            self.deltas[idx - 1].frame
        }
    }

    /// All change points.
    pub fn deltas(&self) -> &[InputDelta] {
        &self.deltas
    }
}

// =============================================================================
// AUTHORITY INPUT CHANNEL
// =============================================================================

/// Collects each participant's input once per tick for the authoritative
/// simulator.
#[derive(Debug)]
pub struct AuthorityInputChannel {
    local: ParticipantId,
    authority: ParticipantId,
    /// Latest frame and the tick it was captured on, per participant.
    latest: BTreeMap<ParticipantId, (u32, InputFrame)>,
    last_polled_tick: Option<u32>,
    recordings: BTreeMap<ParticipantId, InputRecording>,
}

impl AuthorityInputChannel {
    /// Create a channel for `local` in a session run by `authority`.
    pub fn new(local: ParticipantId, authority: ParticipantId) -> Self {
        Self {
            local,
            authority,
            latest: BTreeMap::new(),
            last_polled_tick: None,
            recordings: BTreeMap::new(),
        }
    }

    /// True if this process is the simulator.
    #[inline]
    pub fn is_authority(&self) -> bool {
        self.local == self.authority
    }

    /// Poll the local device for `tick`. A second poll in the same tick is
    /// ignored. Followers forward the frame to the authority.
    pub fn poll<S>(&mut self, tick: u32, source: &mut S, outbox: &mut Outbox)
    where
        S: InputSource + ?Sized,
    {
        if self.last_polled_tick == Some(tick) {
            return;
        }
        self.last_polled_tick = Some(tick);

        let frame = source.poll_local_input().sanitized();
        if self.is_authority() {
            self.latest.insert(self.local, (tick, frame));
        } else {
            outbox.push(InvokeTarget::Authority, PeerMessage::Input { tick, frame });
        }
    }

    /// Accept a follower's frame (authority side). Frames older than the
    /// newest one already held for that participant are dropped.
    pub fn receive(&mut self, from: ParticipantId, tick: u32, frame: InputFrame) -> bool {
        if !self.is_authority() {
            return false;
        }
        if let Some((held_tick, _)) = self.latest.get(&from) {
            if tick < *held_tick {
                debug!("Dropping late input from {} (tick {} < {})", from, tick, held_tick);
                return false;
            }
        }
        self.latest.insert(from, (tick, frame.sanitized()));
        true
    }

    /// Frame to simulate for `participant` (neutral if none received yet).
    pub fn frame_for(&self, participant: &ParticipantId) -> InputFrame {
        self.latest
            .get(participant)
            .map(|(_, frame)| *frame)
            .unwrap_or_else(InputFrame::neutral)
    }

    /// Record every participant's current frame at `tick`.
    pub fn record_tick(&mut self, tick: u32, participants: &[ParticipantId]) {
        for id in participants {
            let frame = self.frame_for(id);
            self.recordings.entry(*id).or_default().record(tick, frame);
        }
    }

    /// Forget a participant's input (disconnect); they simulate as idle.
    pub fn clear(&mut self, participant: &ParticipantId) {
        self.latest.remove(participant);
    }

    /// Input history for a participant.
    pub fn recording(&self, participant: &ParticipantId) -> Option<&InputRecording> {
        self.recordings.get(participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: ParticipantId = ParticipantId::new([1; 16]);
    const GUEST: ParticipantId = ParticipantId::new([2; 16]);

    struct Scripted(Vec<InputFrame>);

    impl InputSource for Scripted {
        fn poll_local_input(&mut self) -> InputFrame {
            if self.0.is_empty() {
                InputFrame::neutral()
            } else {
                self.0.remove(0)
            }
        }
    }

    #[test]
    fn test_frame_flags() {
        let frame = InputFrame::new(0.5, true, false, true);
        assert!(frame.jump());
        assert!(!frame.attack());
        assert!(frame.dodge());
        assert!(!frame.is_idle());
        assert!(InputFrame::neutral().is_idle());
    }

    #[test]
    fn test_sanitize_untrusted_frame() {
        let frame = InputFrame { movement: 7.0, flags: 0xff }.sanitized();
        assert_eq!(frame.movement, 1.0);
        assert_eq!(frame.flags, 0x07);

        let frame = InputFrame { movement: f32::NAN, flags: 0 }.sanitized();
        assert_eq!(frame.movement, 0.0);
    }

    #[test]
    fn test_authority_polls_once_per_tick() {
        let mut channel = AuthorityInputChannel::new(HOST, HOST);
        let mut source = Scripted(vec![
            InputFrame::new(1.0, false, false, false),
            InputFrame::new(-1.0, false, false, false),
        ]);
        let mut out = Outbox::new();

        channel.poll(1, &mut source, &mut out);
        channel.poll(1, &mut source, &mut out);
        assert_eq!(channel.frame_for(&HOST).movement, 1.0);

        channel.poll(2, &mut source, &mut out);
        assert_eq!(channel.frame_for(&HOST).movement, -1.0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_follower_forwards_input() {
        let mut channel = AuthorityInputChannel::new(GUEST, HOST);
        let mut source = Scripted(vec![InputFrame::new(0.25, false, true, false)]);
        let mut out = Outbox::new();

        channel.poll(3, &mut source, &mut out);
        let sent = out.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, InvokeTarget::Authority);
        assert!(matches!(sent[0].message, PeerMessage::Input { tick: 3, .. }));
        assert!(channel.frame_for(&GUEST).is_idle());
    }

    #[test]
    fn test_receive_drops_late_frames() {
        let mut channel = AuthorityInputChannel::new(HOST, HOST);
        assert!(channel.receive(GUEST, 10, InputFrame::new(1.0, false, false, false)));
        assert!(!channel.receive(GUEST, 9, InputFrame::new(-1.0, false, false, false)));
        assert_eq!(channel.frame_for(&GUEST).movement, 1.0);

        channel.clear(&GUEST);
        assert!(channel.frame_for(&GUEST).is_idle());
    }

    #[test]
    fn test_follower_ignores_remote_frames() {
        let mut channel = AuthorityInputChannel::new(GUEST, HOST);
        assert!(!channel.receive(HOST, 1, InputFrame::neutral()));
    }

    #[test]
    fn test_recording_delta_compression() {
        let mut channel = AuthorityInputChannel::new(HOST, HOST);
        let right = InputFrame::new(1.0, false, false, false);
        channel.receive(GUEST, 0, right);
        for tick in 0..5 {
            channel.record_tick(tick, &[GUEST]);
        }
        channel.receive(GUEST, 5, InputFrame::neutral());
        channel.record_tick(5, &[GUEST]);

        let rec = channel.recording(&GUEST).unwrap();
        assert_eq!(rec.deltas().len(), 2);
        assert_eq!(rec.frame_at(3), right);
        assert!(rec.frame_at(5).is_idle());
        assert_eq!(rec.end_tick, 5);
    }
}
