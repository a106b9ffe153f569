//! Channel chapter parsing
//!
//! A channel chapter is a run of optional records (P, C, M, W, N, E, T, A)
//! whose presence is declared by the chapter header. Only the pitch wheel
//! (W) and note on/off (N) records carry state used for recovery; the rest
//! are measured and skipped.

use core::fmt;

use tracing::trace;

use super::{ChapterFlags, ChapterKind, pitch_wheel_value};

/// Recovery-relevant facts decoded from one channel chapter
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChapterFacts {
    /// Pitch wheel value carried by chapter W
    pub pitch_wheel: Option<u16>,
    /// Notes whose NoteOff bit is set in chapter N, in bitmap order
    pub note_offs: Vec<u8>,
    /// Number of NoteOn logs skipped in chapter N
    pub note_on_logs: usize,
}

impl ChapterFacts {
    /// True when nothing recovery-relevant was found
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pitch_wheel.is_none() && self.note_offs.is_empty()
    }
}

/// Error type for chapter parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterError {
    /// A record runs past the end of the chapter.
    Truncated {
        /// Record being decoded.
        kind: ChapterKind,
        /// Offset one past the last byte the record needs.
        needed: usize,
        /// Length of the buffer being parsed.
        available: usize,
    },
    /// Note on/off header declares LOW > HIGH outside the empty-bitmap encodings.
    MalformedNoteRange {
        /// LOW nibble.
        low: u8,
        /// HIGH nibble.
        high: u8,
    },
    /// Note on/off header declares more NoteOn logs than the chapter holds.
    NoteLogOverrun {
        /// Declared NoteOn log count.
        note_on_count: usize,
        /// Bytes left after the note on/off header.
        available: usize,
    },
}

impl fmt::Display for ChapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated {
                kind,
                needed,
                available,
            } => write!(
                f,
                "{kind} truncated: need {needed} bytes, have {available}"
            ),
            Self::MalformedNoteRange { low, high } => {
                write!(f, "malformed note bitmap range: low {low} > high {high}")
            }
            Self::NoteLogOverrun {
                note_on_count,
                available,
            } => write!(
                f,
                "{note_on_count} note logs declared but only {available} bytes remain"
            ),
        }
    }
}

impl std::error::Error for ChapterError {}

/// Bounds-checked cursor over a chapter payload.
#[derive(Debug)]
pub struct ChapterParser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ChapterParser<'a> {
    /// Start parsing `buf` at `start`.
    #[must_use]
    pub const fn new(buf: &'a [u8], start: usize) -> Self {
        Self { buf, pos: start }
    }

    /// Current offset into the buffer.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Walk the records flagged in `chapters`, in wire order.
    ///
    /// Facts are written to `facts` as they are decoded, so whatever was
    /// recovered before an error stays available to the caller. Returns the
    /// offset just past the last record.
    pub fn parse(
        mut self,
        chapters: ChapterFlags,
        facts: &mut ChapterFacts,
    ) -> Result<usize, ChapterError> {
        for kind in chapters.iter() {
            match kind {
                ChapterKind::ProgramChange => self.skip(kind, 3)?,
                ChapterKind::ControlChange
                | ChapterKind::NoteExtras
                | ChapterKind::PolyAftertouch => {
                    let len = usize::from(self.peek(kind, 0)? & 0x7f);
                    self.skip(kind, len)?;
                }
                ChapterKind::ParameterChange => {
                    let len = usize::from(self.peek(kind, 0)? & 0x03) * 256
                        + usize::from(self.peek(kind, 1)?);
                    self.skip(kind, len)?;
                }
                ChapterKind::PitchWheel => {
                    let fine = self.peek(kind, 0)? & 0x7f;
                    let coarse = self.peek(kind, 1)? & 0x7f;
                    let value = pitch_wheel_value(fine, coarse);
                    trace!(value, "chapter W pitch wheel");
                    facts.pitch_wheel = Some(value);
                    self.skip(kind, 2)?;
                }
                ChapterKind::NoteOnOff => self.note_on_off(facts)?,
                ChapterKind::ChannelAftertouch => self.skip(kind, 1)?,
            }
        }
        Ok(self.pos)
    }

    fn note_on_off(&mut self, facts: &mut ChapterFacts) -> Result<(), ChapterError> {
        let kind = ChapterKind::NoteOnOff;
        let b0 = self.peek(kind, 0)?;
        let b1 = self.peek(kind, 1)?;

        let high = b1 & 0x0f;
        let low = b1 >> 4;
        let mut note_on_count = usize::from(b0 & 0x7f);
        if note_on_count == 127 && low == 15 && high == 0 {
            note_on_count = 128;
        }

        let bitmap_len = if low == 15 && high <= 1 {
            0
        } else if low <= high {
            usize::from(high - low + 1)
        } else {
            return Err(ChapterError::MalformedNoteRange { low, high });
        };

        self.pos += 2;
        let available = self.buf.len().saturating_sub(self.pos);
        if note_on_count * 2 > available {
            return Err(ChapterError::NoteLogOverrun {
                note_on_count,
                available,
            });
        }
        trace!(
            s_bit = b0 & 0x80 != 0,
            note_on_count, low, high, "chapter N header"
        );
        self.pos += note_on_count * 2;
        facts.note_on_logs += note_on_count;

        let mut note = low * 8;
        for _ in 0..bitmap_len {
            let octet = self.peek(kind, 0)?;
            for bit in (0..8).rev() {
                if octet & (1 << bit) != 0 {
                    facts.note_offs.push(note);
                }
                note += 1;
            }
            self.pos += 1;
        }
        Ok(())
    }

    fn peek(&self, kind: ChapterKind, rel: usize) -> Result<u8, ChapterError> {
        let at = self.pos + rel;
        self.buf
            .get(at)
            .copied()
            .ok_or(ChapterError::Truncated {
                kind,
                needed: at + 1,
                available: self.buf.len(),
            })
    }

    fn skip(&mut self, kind: ChapterKind, len: usize) -> Result<(), ChapterError> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(ChapterError::Truncated {
                kind,
                needed: end,
                available: self.buf.len(),
            });
        }
        self.pos = end;
        Ok(())
    }
}
