//! RTP-MIDI recovery journal wire format
//!
//! This module provides the journal and chapter headers, chapter framing, and
//! the bounds-checked chapter parser.

mod chapter;
mod error;
mod header;
mod journal;
mod types;

pub use chapter::{ChapterError, ChapterFacts, ChapterParser};
pub use error::{Error, Result};
pub use header::{ChapterHeader, JournalHeader};
pub use journal::{
    FramedChapter, RecoveryJournal, SYSTEM_JOURNAL_HEADER_SIZE, frame_trailing_chapter,
};
pub use types::{
    ChapterFlags, ChapterKind, JournalFlags, MidiCommand, RecoveryAction, pitch_wheel_value,
};

/// Number of MIDI channels tracked per peer
pub const CHANNEL_COUNT: usize = 16;

/// Number of MIDI notes per channel
pub const NOTE_COUNT: usize = 128;

/// Pitch wheel centre position
pub const PITCH_WHEEL_CENTER: u16 = 0x2000;
