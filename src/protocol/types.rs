//! Recovery journal flag sets, chapter kinds, and MIDI command types

use std::fmt;

use super::{CHANNEL_COUNT, NOTE_COUNT};

/// Recovery journal header flags (first octet of the journal header)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JournalFlags(u8);

impl JournalFlags {
    /// Valid flag bits mask
    pub const VALID_MASK: u8 =
        Self::SINGLE_LOSS | Self::SYSTEM | Self::CHANNELS | Self::ENHANCED;
    /// Journal encodes a single lost packet (S)
    pub const SINGLE_LOSS: u8 = 1 << 7;
    /// System journal present (Y)
    pub const SYSTEM: u8 = 1 << 6;
    /// Channel journals present (A)
    pub const CHANNELS: u8 = 1 << 5;
    /// Enhanced chapter C encoding (H)
    pub const ENHANCED: u8 = 1 << 4;

    /// Create empty flags
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Create from the journal header octet, ignoring the TOTCHAN nibble
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        Self(value & Self::VALID_MASK)
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Set a flag
    #[must_use]
    pub const fn with(mut self, flag: u8) -> Self {
        debug_assert!(flag & !Self::VALID_MASK == 0, "invalid flag bit");
        self.0 |= flag;
        self
    }

    /// Check if flag is set
    #[must_use]
    pub const fn has(self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Sender marked the journal as covering a single lost packet
    #[must_use]
    pub const fn single_loss(self) -> bool {
        self.has(Self::SINGLE_LOSS)
    }

    /// System journal present
    #[must_use]
    pub const fn system_present(self) -> bool {
        self.has(Self::SYSTEM)
    }

    /// Channel journals present
    #[must_use]
    pub const fn channels_present(self) -> bool {
        self.has(Self::CHANNELS)
    }

    /// Enhanced chapter C encoding in use
    #[must_use]
    pub const fn enhanced(self) -> bool {
        self.has(Self::ENHANCED)
    }
}

impl fmt::Display for JournalFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.single_loss() {
            parts.push("S");
        }
        if self.system_present() {
            parts.push("Y");
        }
        if self.channels_present() {
            parts.push("A");
        }
        if self.enhanced() {
            parts.push("H");
        }
        if parts.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", parts.join(" | "))
        }
    }
}

/// Chapter kinds inside a channel journal, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChapterKind {
    /// Program change (P)
    ProgramChange = 0x80,
    /// Control change (C)
    ControlChange = 0x40,
    /// Parameter system (M)
    ParameterChange = 0x20,
    /// Pitch wheel (W)
    PitchWheel = 0x10,
    /// Note on/off (N)
    NoteOnOff = 0x08,
    /// Note command extras (E)
    NoteExtras = 0x04,
    /// Channel aftertouch (T)
    ChannelAftertouch = 0x02,
    /// Poly aftertouch (A)
    PolyAftertouch = 0x01,
}

impl ChapterKind {
    /// All chapter kinds in the order they appear on the wire
    pub const WIRE_ORDER: [Self; 8] = [
        Self::ProgramChange,
        Self::ControlChange,
        Self::ParameterChange,
        Self::PitchWheel,
        Self::NoteOnOff,
        Self::NoteExtras,
        Self::ChannelAftertouch,
        Self::PolyAftertouch,
    ];

    /// Presence bit in the chapter header's third octet
    #[must_use]
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Single-letter chapter name used by RFC 6295
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::ProgramChange => 'P',
            Self::ControlChange => 'C',
            Self::ParameterChange => 'M',
            Self::PitchWheel => 'W',
            Self::NoteOnOff => 'N',
            Self::NoteExtras => 'E',
            Self::ChannelAftertouch => 'T',
            Self::PolyAftertouch => 'A',
        }
    }
}

impl fmt::Display for ChapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chapter {}", self.letter())
    }
}

/// Chapter presence bits (third octet of a channel journal header)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChapterFlags(u8);

impl ChapterFlags {
    /// Create empty flags
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Create from the presence octet; every bit is meaningful
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        Self(value)
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Mark a chapter as present
    #[must_use]
    pub const fn with(mut self, kind: ChapterKind) -> Self {
        self.0 |= kind.bit();
        self
    }

    /// Check whether a chapter is present
    #[must_use]
    pub const fn has(self, kind: ChapterKind) -> bool {
        (self.0 & kind.bit()) != 0
    }

    /// Present chapters in wire order
    pub fn iter(self) -> impl Iterator<Item = ChapterKind> {
        ChapterKind::WIRE_ORDER
            .into_iter()
            .filter(move |kind| self.has(*kind))
    }
}

impl fmt::Display for ChapterFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters: String = self.iter().map(ChapterKind::letter).collect();
        if letters.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{letters}")
        }
    }
}

/// Corrective event derived from the journal or the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecoveryAction {
    /// Release a note that is (or may be) held
    NoteOff {
        /// MIDI channel (0-15)
        channel: u8,
        /// Note number (0-127)
        note: u8,
    },
    /// Move the pitch wheel to a known value
    PitchWheelReset {
        /// MIDI channel (0-15)
        channel: u8,
        /// 14-bit pitch wheel value
        value: u16,
    },
}

impl RecoveryAction {
    /// Channel the action targets
    #[must_use]
    pub const fn channel(self) -> u8 {
        match self {
            Self::NoteOff { channel, .. } | Self::PitchWheelReset { channel, .. } => channel,
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoteOff { channel, note } => write!(f, "NoteOff(ch={channel}, note={note})"),
            Self::PitchWheelReset { channel, value } => {
                write!(f, "PitchWheel(ch={channel}, value={value:#06x})")
            }
        }
    }
}

/// Channel voice command carried in an RTP-MIDI command section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MidiCommand {
    /// Note on (velocity 0 is a note off)
    NoteOn {
        /// MIDI channel
        channel: u8,
        /// Note number
        note: u8,
        /// Velocity
        velocity: u8,
    },
    /// Note off
    NoteOff {
        /// MIDI channel
        channel: u8,
        /// Note number
        note: u8,
        /// Release velocity
        velocity: u8,
    },
    /// Polyphonic key pressure
    PolyAftertouch {
        /// MIDI channel
        channel: u8,
        /// Note number
        note: u8,
        /// Pressure
        pressure: u8,
    },
    /// Control change
    ControlChange {
        /// MIDI channel
        channel: u8,
        /// Controller number
        controller: u8,
        /// Controller value
        value: u8,
    },
    /// Program change
    ProgramChange {
        /// MIDI channel
        channel: u8,
        /// Program number
        program: u8,
    },
    /// Channel pressure
    ChannelAftertouch {
        /// MIDI channel
        channel: u8,
        /// Pressure
        pressure: u8,
    },
    /// Pitch bend change (14-bit value, centre 0x2000)
    PitchBend {
        /// MIDI channel
        channel: u8,
        /// Pitch wheel value
        value: u16,
    },
}

impl MidiCommand {
    /// Build a pitch bend command from its LSB/MSB data bytes
    #[must_use]
    pub const fn pitch_bend(channel: u8, lsb: u8, msb: u8) -> Self {
        Self::PitchBend {
            channel,
            value: pitch_wheel_value(lsb, msb),
        }
    }

    /// Channel the command addresses
    #[must_use]
    pub const fn channel(self) -> u8 {
        match self {
            Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::PolyAftertouch { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::ChannelAftertouch { channel, .. }
            | Self::PitchBend { channel, .. } => channel,
        }
    }

    /// Check the channel, note and value ranges a MIDI 1.0 stream permits
    #[must_use]
    pub fn is_valid(self) -> bool {
        let data_ok = match self {
            Self::NoteOn { note, velocity, .. } | Self::NoteOff { note, velocity, .. } => {
                usize::from(note) < NOTE_COUNT && velocity < 0x80
            }
            Self::PolyAftertouch { note, pressure, .. } => {
                usize::from(note) < NOTE_COUNT && pressure < 0x80
            }
            Self::ControlChange {
                controller, value, ..
            } => controller < 0x80 && value < 0x80,
            Self::ProgramChange { program, .. } => program < 0x80,
            Self::ChannelAftertouch { pressure, .. } => pressure < 0x80,
            Self::PitchBend { value, .. } => value < 0x4000,
        };
        usize::from(self.channel()) < CHANNEL_COUNT && data_ok
    }
}

/// Combine 7-bit LSB/MSB data bytes into a 14-bit pitch wheel value
#[must_use]
pub const fn pitch_wheel_value(lsb: u8, msb: u8) -> u16 {
    ((msb as u16 & 0x7f) << 7) | (lsb as u16 & 0x7f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_flags_ignore_totchan() {
        let flags = JournalFlags::from_u8(0b1010_0011);
        assert!(flags.single_loss());
        assert!(flags.channels_present());
        assert!(!flags.system_present());
        assert!(!flags.enhanced());
        assert_eq!(flags.as_u8(), 0b1010_0000);
        assert_eq!(flags.to_string(), "S | A");
    }

    #[test]
    fn test_chapter_flags_iterate_in_wire_order() {
        let flags = ChapterFlags::new()
            .with(ChapterKind::PolyAftertouch)
            .with(ChapterKind::NoteOnOff)
            .with(ChapterKind::ProgramChange);
        let order: Vec<_> = flags.iter().collect();
        assert_eq!(
            order,
            vec![
                ChapterKind::ProgramChange,
                ChapterKind::NoteOnOff,
                ChapterKind::PolyAftertouch
            ]
        );
        assert_eq!(flags.to_string(), "PNA");
        assert_eq!(ChapterFlags::from_u8(0xff).iter().count(), 8);
    }

    #[test]
    fn test_pitch_wheel_value_is_fourteen_bit() {
        assert_eq!(pitch_wheel_value(0x00, 0x40), 0x2000);
        assert_eq!(pitch_wheel_value(0x7f, 0x7f), 0x3fff);
        assert_eq!(pitch_wheel_value(0xff, 0xff), 0x3fff);
        assert_eq!(
            MidiCommand::pitch_bend(3, 0x01, 0x40),
            MidiCommand::PitchBend {
                channel: 3,
                value: 0x2001
            }
        );
    }

    #[test]
    fn test_command_validation() {
        assert!(
            MidiCommand::NoteOn {
                channel: 15,
                note: 127,
                velocity: 100
            }
            .is_valid()
        );
        assert!(
            !MidiCommand::NoteOn {
                channel: 16,
                note: 60,
                velocity: 100
            }
            .is_valid()
        );
        assert!(
            !MidiCommand::PitchBend {
                channel: 0,
                value: 0x4000
            }
            .is_valid()
        );
    }
}
