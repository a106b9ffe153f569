//! Recovery journal framing
//!
//! The transport hands over the journal header, the first channel chapter
//! (already framed) and whatever channel-journal bytes follow it. Chapters
//! after the first are re-framed by [`frame_trailing_chapter`].

use bytes::Bytes;
use tracing::trace;

use super::{ChapterHeader, Error, JournalHeader, Result};

/// Size of the system journal header in bytes
pub const SYSTEM_JOURNAL_HEADER_SIZE: usize = 2;

/// Channel chapter framed by its header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedChapter {
    header: ChapterHeader,
    payload: Bytes,
}

impl FramedChapter {
    /// Create from a header and the bytes following it
    #[must_use]
    pub fn new(header: ChapterHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Chapter header
    #[must_use]
    pub const fn header(&self) -> &ChapterHeader {
        &self.header
    }

    /// Chapter payload (everything after the three header octets)
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Recovery journal attached to one RTP-MIDI packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryJournal {
    header: JournalHeader,
    system: Option<Bytes>,
    first_chapter: Option<FramedChapter>,
    remaining: Bytes,
}

impl RecoveryJournal {
    /// Assemble a journal from pieces already framed by the transport
    #[must_use]
    pub fn new(
        header: JournalHeader,
        first_chapter: Option<FramedChapter>,
        remaining: impl Into<Bytes>,
    ) -> Self {
        Self {
            header,
            system: None,
            first_chapter,
            remaining: remaining.into(),
        }
    }

    /// Frame a complete journal section
    ///
    /// # Format
    ///
    /// ```text
    /// [JOURNAL HEADER (3)] [SYSTEM JOURNAL (if Y)] [CHAPTER 0] [CHAPTER 1..=TOTCHAN]
    /// ```
    ///
    /// Only the first chapter is framed here; the rest stay in
    /// [`remaining`](Self::remaining) for the decoder.
    pub fn decode(bytes: Bytes) -> Result<Self> {
        let header = JournalHeader::decode(&bytes)?;
        let mut offset = JournalHeader::SIZE;

        let system = if header.flags().system_present() {
            let system_header = bytes.get(offset..offset + SYSTEM_JOURNAL_HEADER_SIZE).ok_or(
                Error::BufferTooSmall {
                    needed: offset + SYSTEM_JOURNAL_HEADER_SIZE,
                    got: bytes.len(),
                },
            )?;
            let length =
                usize::from(system_header[0] & 0x03) << 8 | usize::from(system_header[1]);
            let available = bytes.len() - offset;
            if length < SYSTEM_JOURNAL_HEADER_SIZE || length > available {
                return Err(Error::InvalidSystemJournalLength { length, available });
            }
            let system = bytes.slice(offset..offset + length);
            offset += length;
            Some(system)
        } else {
            None
        };

        if !header.flags().channels_present() {
            return Ok(Self {
                header,
                system,
                first_chapter: None,
                remaining: Bytes::new(),
            });
        }

        let (chapter_header, end) = frame_trailing_chapter(&bytes, offset)?;
        let first_chapter = FramedChapter::new(
            chapter_header,
            bytes.slice(offset + ChapterHeader::SIZE..end),
        );
        trace!(
            channel = chapter_header.channel(),
            length = chapter_header.length(),
            "framed first channel chapter"
        );

        Ok(Self {
            header,
            system,
            first_chapter: Some(first_chapter),
            remaining: bytes.slice(end..),
        })
    }

    /// Journal header
    #[must_use]
    pub const fn header(&self) -> &JournalHeader {
        &self.header
    }

    /// Raw system journal, when framed by [`decode`](Self::decode)
    #[must_use]
    pub fn system(&self) -> Option<&[u8]> {
        self.system.as_deref()
    }

    /// First channel chapter
    #[must_use]
    pub const fn first_chapter(&self) -> Option<&FramedChapter> {
        self.first_chapter.as_ref()
    }

    /// Channel journal bytes following the first chapter
    #[must_use]
    pub fn remaining(&self) -> &[u8] {
        &self.remaining
    }
}

/// Frame the chapter whose header starts at `offset` in `journal`
///
/// Returns the decoded header and the offset one past the chapter's last
/// byte. Fails when the header itself is out of range or when the declared
/// length cannot hold the header or runs past the buffer; in either case the
/// position of any later chapter is unknown.
pub fn frame_trailing_chapter(journal: &[u8], offset: usize) -> Result<(ChapterHeader, usize)> {
    let available = journal.len().saturating_sub(offset);
    let header_bytes = journal.get(offset..).unwrap_or_default();
    let header = ChapterHeader::decode(header_bytes).map_err(|_| Error::BufferTooSmall {
        needed: offset + ChapterHeader::SIZE,
        got: journal.len(),
    })?;

    let length = usize::from(header.length());
    if length < ChapterHeader::SIZE || length > available {
        return Err(Error::InvalidChapterLength {
            length,
            offset,
            available,
        });
    }

    Ok((header, offset + length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChapterFlags, ChapterKind, JournalFlags};

    fn journal_bytes(flags: u8, checkpoint: u16, body: &[u8]) -> Bytes {
        let mut bytes = JournalHeader::new(JournalFlags::from_u8(flags), flags & 0x0f, checkpoint)
            .to_bytes()
            .to_vec();
        bytes.extend_from_slice(body);
        Bytes::from(bytes)
    }

    #[test]
    fn test_decode_frames_first_chapter_and_remainder() {
        // chapter 0: chan 1, length 5, W present; chapter 1 follows verbatim
        let body = [0x10, 0x05, 0x10, 0x00, 0x40, 0x20, 0x04, 0x08, 0x00, 0x78];
        let journal = RecoveryJournal::decode(journal_bytes(0x21, 7, &body)).unwrap();

        assert_eq!(journal.header().total_channels(), 1);
        assert_eq!(journal.header().checkpoint(), 7);
        let first = journal.first_chapter().expect("first chapter");
        assert_eq!(first.header().channel(), 1);
        assert!(first.header().chapters().has(ChapterKind::PitchWheel));
        assert_eq!(first.payload(), &[0x00, 0x40]);
        assert_eq!(journal.remaining(), &[0x20, 0x04, 0x08, 0x00, 0x78]);
        assert!(journal.system().is_none());
    }

    #[test]
    fn test_decode_skips_system_journal() {
        // Y and A set; system journal of 4 bytes
        let body = [0x00, 0x04, 0xaa, 0xbb, 0x00, 0x03, 0x00];
        let journal = RecoveryJournal::decode(journal_bytes(0x60, 1, &body)).unwrap();
        assert_eq!(journal.system(), Some(&[0x00, 0x04, 0xaa, 0xbb][..]));
        let first = journal.first_chapter().expect("first chapter");
        assert_eq!(first.header().chapters(), ChapterFlags::new());
        assert!(first.payload().is_empty());
    }

    #[test]
    fn test_decode_rejects_overlong_system_journal() {
        let body = [0x00, 0x40, 0x00];
        assert!(matches!(
            RecoveryJournal::decode(journal_bytes(0x40, 1, &body)),
            Err(Error::InvalidSystemJournalLength { length: 0x40, .. })
        ));
    }

    #[test]
    fn test_decode_without_channel_journal() {
        let journal = RecoveryJournal::decode(journal_bytes(0x00, 9, &[])).unwrap();
        assert!(journal.first_chapter().is_none());
        assert!(journal.remaining().is_empty());
    }

    #[test]
    fn test_frame_trailing_chapter_bounds() {
        let buf = [0x00, 0x03, 0x00, 0x00, 0x09, 0x00];
        assert_eq!(frame_trailing_chapter(&buf, 0).unwrap().1, 3);
        // second header declares 9 bytes but only 3 remain
        assert_eq!(
            frame_trailing_chapter(&buf, 3),
            Err(Error::InvalidChapterLength {
                length: 9,
                offset: 3,
                available: 3
            })
        );
        assert!(matches!(
            frame_trailing_chapter(&buf, 5),
            Err(Error::BufferTooSmall { needed: 8, got: 6 })
        ));
        assert!(matches!(
            frame_trailing_chapter(&buf, 40),
            Err(Error::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_frame_rejects_length_shorter_than_header() {
        let buf = [0x00, 0x02, 0x00];
        assert!(matches!(
            frame_trailing_chapter(&buf, 0),
            Err(Error::InvalidChapterLength { length: 2, .. })
        ));
    }
}
