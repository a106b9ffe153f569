//! Journal framing error types

use thiserror::Error;

/// Errors raised while framing a recovery journal or its channel chapters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer too small
    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall {
        /// Needed size
        needed: usize,
        /// Actual size
        got: usize,
    },

    /// Chapter length cannot hold its own header or overruns the journal
    #[error("invalid chapter length {length} at offset {offset} ({available} bytes available)")]
    InvalidChapterLength {
        /// Declared chapter length (header included)
        length: usize,
        /// Offset of the chapter header within the journal buffer
        offset: usize,
        /// Bytes available from that offset
        available: usize,
    },

    /// System journal length overruns the packet
    #[error("invalid system journal length {length} ({available} bytes available)")]
    InvalidSystemJournalLength {
        /// Declared system journal length
        length: usize,
        /// Bytes available
        available: usize,
    },

    /// MIDI channel outside 0-15
    #[error("invalid MIDI channel: {0}")]
    InvalidChannel(u8),

    /// Channel journal flag set without a framed first chapter
    #[error("channel journal flagged but no first chapter supplied")]
    MissingFirstChapter,

    /// Configuration value rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
