//! Per-peer MIDI channel state shared by journal recovery and the watchdog.

use std::time::Instant;

use crate::protocol::{CHANNEL_COUNT, MidiCommand, NOTE_COUNT, PITCH_WHEEL_CENTER};

/// Held notes and pitch wheel position for one MIDI channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pitch_wheel: u16,
    pitch_wheel_at: Option<Instant>,
    note_on_at: [Option<Instant>; NOTE_COUNT],
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            pitch_wheel: PITCH_WHEEL_CENTER,
            pitch_wheel_at: None,
            note_on_at: [None; NOTE_COUNT],
        }
    }
}

impl ChannelState {
    /// Last known pitch wheel value.
    #[must_use]
    pub const fn pitch_wheel(&self) -> u16 {
        self.pitch_wheel
    }

    /// When the pitch wheel last left centre, if it has not returned since.
    #[must_use]
    pub const fn pitch_wheel_since(&self) -> Option<Instant> {
        self.pitch_wheel_at
    }

    /// When `note` was switched on, if it is still held.
    #[must_use]
    pub fn note_on_since(&self, note: u8) -> Option<Instant> {
        self.note_on_at.get(usize::from(note)).copied().flatten()
    }

    /// Notes currently held, ascending.
    pub fn held_notes(&self) -> impl Iterator<Item = u8> + '_ {
        self.note_on_at
            .iter()
            .zip(0u8..)
            .filter_map(|(at, note)| at.map(|_| note))
    }

    /// Record a NoteOn.
    pub fn note_on(&mut self, note: u8, now: Instant) {
        if let Some(slot) = self.note_on_at.get_mut(usize::from(note)) {
            *slot = Some(now);
        }
    }

    /// Forget a held note. Returns whether it was held.
    pub fn note_off(&mut self, note: u8) -> bool {
        self.note_on_at
            .get_mut(usize::from(note))
            .and_then(Option::take)
            .is_some()
    }

    /// Store a pitch wheel value. Returns whether it changed.
    ///
    /// The timestamp is kept while the wheel is off centre and cleared when it
    /// returns.
    pub fn set_pitch_wheel(&mut self, value: u16, now: Instant) -> bool {
        let changed = self.pitch_wheel != value;
        self.pitch_wheel = value;
        if value == PITCH_WHEEL_CENTER {
            self.pitch_wheel_at = None;
        } else if changed || self.pitch_wheel_at.is_none() {
            self.pitch_wheel_at = Some(now);
        }
        changed
    }

    /// Return the wheel to centre and clear its timestamp.
    pub fn reset_pitch_wheel(&mut self) {
        self.pitch_wheel = PITCH_WHEEL_CENTER;
        self.pitch_wheel_at = None;
    }

    /// Update state from a live command addressed to this channel.
    pub fn apply(&mut self, command: &MidiCommand, now: Instant) {
        match *command {
            MidiCommand::NoteOn { note, velocity, .. } if velocity > 0 => self.note_on(note, now),
            MidiCommand::NoteOn { note, .. } | MidiCommand::NoteOff { note, .. } => {
                self.note_off(note);
            }
            MidiCommand::PitchBend { value, .. } => {
                self.set_pitch_wheel(value, now);
            }
            MidiCommand::PolyAftertouch { .. }
            | MidiCommand::ControlChange { .. }
            | MidiCommand::ProgramChange { .. }
            | MidiCommand::ChannelAftertouch { .. } => {}
        }
    }
}

/// Sixteen independent channel records belonging to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerChannels {
    channels: [ChannelState; CHANNEL_COUNT],
}

impl Default for PeerChannels {
    fn default() -> Self {
        Self {
            channels: std::array::from_fn(|_| ChannelState::default()),
        }
    }
}

impl PeerChannels {
    /// Create sixteen channels at rest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow one channel.
    #[must_use]
    pub fn get(&self, channel: u8) -> Option<&ChannelState> {
        self.channels.get(usize::from(channel))
    }

    /// Mutably borrow one channel.
    pub fn get_mut(&mut self, channel: u8) -> Option<&mut ChannelState> {
        self.channels.get_mut(usize::from(channel))
    }

    /// Iterate channels with their numbers.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &ChannelState)> {
        (0u8..).zip(self.channels.iter())
    }

    /// Iterate channels mutably with their numbers.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u8, &mut ChannelState)> {
        (0u8..).zip(self.channels.iter_mut())
    }

    /// Number of notes held across all channels.
    #[must_use]
    pub fn held_note_count(&self) -> usize {
        self.channels
            .iter()
            .map(|channel| channel.held_notes().count())
            .sum()
    }
}
