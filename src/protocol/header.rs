//! Recovery journal and channel chapter headers
//!
//! Both headers are three octets. The journal header is framed by the
//! transport; chapter headers after the first are re-framed by the decoder.

use super::{CHANNEL_COUNT, ChapterFlags, Error, JournalFlags, Result};

/// Recovery journal header
///
/// # Wire Format
///
/// ```text
///  0                   1                   2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |S|Y|A|H|TOTCHAN|   Checkpoint Packet Seqnum    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JournalHeader {
    flags: JournalFlags,
    total_channels: u8,
    checkpoint: u16,
}

impl JournalHeader {
    /// Encoded size in bytes
    pub const SIZE: usize = 3;

    /// Create a new journal header
    ///
    /// `total_channels` counts the chapters after the first and is masked to
    /// the 4-bit TOTCHAN field.
    #[must_use]
    pub const fn new(flags: JournalFlags, total_channels: u8, checkpoint: u16) -> Self {
        Self {
            flags,
            total_channels: total_channels & 0x0f,
            checkpoint,
        }
    }

    /// Decode from the first three octets of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let [b0, b1, b2, ..] = *bytes else {
            return Err(Error::BufferTooSmall {
                needed: Self::SIZE,
                got: bytes.len(),
            });
        };
        Ok(Self {
            flags: JournalFlags::from_u8(b0),
            total_channels: b0 & 0x0f,
            checkpoint: u16::from_be_bytes([b1, b2]),
        })
    }

    /// Encode to wire bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let [hi, lo] = self.checkpoint.to_be_bytes();
        [self.flags.as_u8() | self.total_channels, hi, lo]
    }

    /// Journal flags
    #[must_use]
    pub const fn flags(&self) -> JournalFlags {
        self.flags
    }

    /// Number of channel chapters beyond the first
    #[must_use]
    pub const fn total_channels(&self) -> u8 {
        self.total_channels
    }

    /// Sequence number of the checkpoint packet the journal covers from
    #[must_use]
    pub const fn checkpoint(&self) -> u16 {
        self.checkpoint
    }
}

/// Channel chapter header
///
/// # Wire Format
///
/// ```text
///  0                   1                   2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |S| CHAN|H|         LENGTH      |P|C|M|W|N|E|T|A|
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// `LENGTH` is 11 bits and includes the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChapterHeader {
    single_loss: bool,
    channel: u8,
    enhanced: bool,
    length: u16,
    chapters: ChapterFlags,
}

impl ChapterHeader {
    /// Encoded size in bytes
    pub const SIZE: usize = 3;

    /// Largest encodable chapter length
    pub const MAX_LENGTH: u16 = 0x07ff;

    /// Create a header for a transport-framed chapter
    ///
    /// `length` counts the header itself and must fit the 11-bit field.
    pub fn new(channel: u8, length: u16, chapters: ChapterFlags) -> Result<Self> {
        if usize::from(channel) >= CHANNEL_COUNT {
            return Err(Error::InvalidChannel(channel));
        }
        if usize::from(length) < Self::SIZE || length > Self::MAX_LENGTH {
            return Err(Error::InvalidChapterLength {
                length: usize::from(length),
                offset: 0,
                available: usize::from(Self::MAX_LENGTH),
            });
        }
        Ok(Self {
            single_loss: false,
            channel,
            enhanced: false,
            length,
            chapters,
        })
    }

    /// Set the S (single packet loss) bit
    #[must_use]
    pub const fn with_single_loss(mut self, single_loss: bool) -> Self {
        self.single_loss = single_loss;
        self
    }

    /// Set the H (enhanced encoding) bit
    #[must_use]
    pub const fn with_enhanced(mut self, enhanced: bool) -> Self {
        self.enhanced = enhanced;
        self
    }

    /// Decode from the first three octets of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let [b0, b1, b2, ..] = *bytes else {
            return Err(Error::BufferTooSmall {
                needed: Self::SIZE,
                got: bytes.len(),
            });
        };
        Ok(Self {
            single_loss: b0 & 0x80 != 0,
            channel: (b0 >> 4) & 0x07,
            enhanced: b0 & 0x08 != 0,
            length: u16::from(b0 & 0x07) * 256 + u16::from(b1),
            chapters: ChapterFlags::from_u8(b2),
        })
    }

    /// Encode to wire bytes (the channel is truncated to the 3-bit field)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b0 = ((self.channel & 0x07) << 4) | ((self.length >> 8) as u8 & 0x07);
        if self.single_loss {
            b0 |= 0x80;
        }
        if self.enhanced {
            b0 |= 0x08;
        }
        [b0, (self.length & 0xff) as u8, self.chapters.as_u8()]
    }

    /// S bit
    #[must_use]
    pub const fn single_loss(&self) -> bool {
        self.single_loss
    }

    /// MIDI channel the chapter describes
    #[must_use]
    pub const fn channel(&self) -> u8 {
        self.channel
    }

    /// H bit
    #[must_use]
    pub const fn enhanced(&self) -> bool {
        self.enhanced
    }

    /// Declared chapter length including the header
    #[must_use]
    pub const fn length(&self) -> u16 {
        self.length
    }

    /// Chapter presence bits
    #[must_use]
    pub const fn chapters(&self) -> ChapterFlags {
        self.chapters
    }
}
