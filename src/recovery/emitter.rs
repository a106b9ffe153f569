//! MIDI sink abstraction and batched delivery of recovery actions.

use tracing::trace;

use crate::protocol::{MidiCommand, RecoveryAction};

/// Downstream consumer of MIDI events (synthesizer, router, sequencer port).
///
/// Calls must be fast and local; the engine may hold a peer lock while
/// emitting. Repeated NoteOffs for a note that is already off must be
/// accepted.
pub trait MidiSink {
    /// Note on.
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8);
    /// Note off.
    fn note_off(&mut self, channel: u8, note: u8, velocity: u8);
    /// Polyphonic key pressure.
    fn poly_aftertouch(&mut self, channel: u8, note: u8, pressure: u8);
    /// Control change.
    fn control_change(&mut self, channel: u8, controller: u8, value: u8);
    /// Program change.
    fn program_change(&mut self, channel: u8, program: u8);
    /// Channel pressure.
    fn channel_aftertouch(&mut self, channel: u8, pressure: u8);
    /// Pitch bend (14-bit, centre 0x2000).
    fn pitch_bend(&mut self, channel: u8, value: u16);
    /// Push any buffered events out.
    fn flush(&mut self) {}

    /// Deliver a live command.
    fn send_command(&mut self, command: &MidiCommand) {
        match *command {
            MidiCommand::NoteOn {
                channel,
                note,
                velocity,
            } => self.note_on(channel, note, velocity),
            MidiCommand::NoteOff {
                channel,
                note,
                velocity,
            } => self.note_off(channel, note, velocity),
            MidiCommand::PolyAftertouch {
                channel,
                note,
                pressure,
            } => self.poly_aftertouch(channel, note, pressure),
            MidiCommand::ControlChange {
                channel,
                controller,
                value,
            } => self.control_change(channel, controller, value),
            MidiCommand::ProgramChange { channel, program } => {
                self.program_change(channel, program);
            }
            MidiCommand::ChannelAftertouch { channel, pressure } => {
                self.channel_aftertouch(channel, pressure);
            }
            MidiCommand::PitchBend { channel, value } => self.pitch_bend(channel, value),
        }
    }
}

/// Event recorded by the `Vec` sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkEvent {
    /// A command delivered to the sink.
    Command(MidiCommand),
    /// A flush request.
    Flush,
}

impl MidiSink for Vec<SinkEvent> {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        self.push(SinkEvent::Command(MidiCommand::NoteOn {
            channel,
            note,
            velocity,
        }));
    }

    fn note_off(&mut self, channel: u8, note: u8, velocity: u8) {
        self.push(SinkEvent::Command(MidiCommand::NoteOff {
            channel,
            note,
            velocity,
        }));
    }

    fn poly_aftertouch(&mut self, channel: u8, note: u8, pressure: u8) {
        self.push(SinkEvent::Command(MidiCommand::PolyAftertouch {
            channel,
            note,
            pressure,
        }));
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        self.push(SinkEvent::Command(MidiCommand::ControlChange {
            channel,
            controller,
            value,
        }));
    }

    fn program_change(&mut self, channel: u8, program: u8) {
        self.push(SinkEvent::Command(MidiCommand::ProgramChange {
            channel,
            program,
        }));
    }

    fn channel_aftertouch(&mut self, channel: u8, pressure: u8) {
        self.push(SinkEvent::Command(MidiCommand::ChannelAftertouch {
            channel,
            pressure,
        }));
    }

    fn pitch_bend(&mut self, channel: u8, value: u16) {
        self.push(SinkEvent::Command(MidiCommand::PitchBend { channel, value }));
    }

    fn flush(&mut self) {
        self.push(SinkEvent::Flush);
    }
}

/// Ordered buffer of pending recovery actions.
#[derive(Debug)]
pub struct RecoveryEmitter {
    pending: Vec<RecoveryAction>,
    batch_size: usize,
    note_off_velocity: u8,
    emitted: usize,
}

impl RecoveryEmitter {
    /// Create an emitter draining every `batch_size` actions.
    #[must_use]
    pub fn new(batch_size: usize, note_off_velocity: u8) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            pending: Vec::with_capacity(batch_size),
            batch_size,
            note_off_velocity,
            emitted: 0,
        }
    }

    /// Buffer an action, draining to `sink` once a batch is full.
    pub fn push<S: MidiSink + ?Sized>(&mut self, action: RecoveryAction, sink: &mut S) {
        self.pending.push(action);
        if self.pending.len() >= self.batch_size {
            self.drain(sink);
        }
    }

    /// Send every buffered action to `sink` in order and flush it.
    ///
    /// Returns the number of actions sent.
    pub fn drain<S: MidiSink + ?Sized>(&mut self, sink: &mut S) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let count = self.pending.len();
        for action in self.pending.drain(..) {
            trace!(%action, "emit recovery action");
            match action {
                RecoveryAction::NoteOff { channel, note } => {
                    sink.note_off(channel, note, self.note_off_velocity);
                }
                RecoveryAction::PitchWheelReset { channel, value } => {
                    sink.pitch_bend(channel, value);
                }
            }
        }
        sink.flush();
        self.emitted += count;
        count
    }

    /// Actions waiting for the next drain.
    #[must_use]
    pub fn pending(&self) -> &[RecoveryAction] {
        &self.pending
    }

    /// Total actions sent since creation.
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_off(note: u8) -> RecoveryAction {
        RecoveryAction::NoteOff { channel: 2, note }
    }

    #[test]
    fn drains_in_batches_preserving_order() {
        let mut sink: Vec<SinkEvent> = Vec::new();
        let mut emitter = RecoveryEmitter::new(3, 64);
        for note in 0..7 {
            emitter.push(note_off(note), &mut sink);
        }
        // two full batches sent, one action pending
        assert_eq!(emitter.pending().len(), 1);
        assert_eq!(emitter.drain(&mut sink), 1);
        assert_eq!(emitter.emitted(), 7);

        let notes: Vec<u8> = sink
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Command(MidiCommand::NoteOff { note, velocity, .. }) => {
                    assert_eq!(*velocity, 64);
                    Some(*note)
                }
                _ => None,
            })
            .collect();
        assert_eq!(notes, (0..7).collect::<Vec<_>>());
        let flushes = sink.iter().filter(|e| **e == SinkEvent::Flush).count();
        assert_eq!(flushes, 3);
    }

    #[test]
    fn empty_drain_does_not_flush() {
        let mut sink: Vec<SinkEvent> = Vec::new();
        let mut emitter = RecoveryEmitter::new(8, 0);
        assert_eq!(emitter.drain(&mut sink), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn pitch_reset_maps_to_pitch_bend() {
        let mut sink: Vec<SinkEvent> = Vec::new();
        let mut emitter = RecoveryEmitter::new(8, 0);
        emitter.push(
            RecoveryAction::PitchWheelReset {
                channel: 4,
                value: 0x2000,
            },
            &mut sink,
        );
        emitter.drain(&mut sink);
        assert_eq!(
            sink,
            vec![
                SinkEvent::Command(MidiCommand::PitchBend {
                    channel: 4,
                    value: 0x2000
                }),
                SinkEvent::Flush
            ]
        );
    }

    #[test]
    fn repeated_note_off_is_accepted() {
        let mut sink: Vec<SinkEvent> = Vec::new();
        let mut emitter = RecoveryEmitter::new(8, 0);
        emitter.push(note_off(60), &mut sink);
        emitter.push(note_off(60), &mut sink);
        assert_eq!(emitter.drain(&mut sink), 2);
    }
}
