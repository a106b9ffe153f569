//! Journal-driven recovery across every channel chapter of a packet.

use std::time::Instant;

use tracing::{debug, trace, warn};

use super::channel::PeerChannels;
use super::emitter::{MidiSink, RecoveryEmitter};
use super::metrics::Metrics;
use crate::protocol::{
    ChapterFacts, ChapterHeader, ChapterParser, Error, RecoveryAction, RecoveryJournal,
    frame_trailing_chapter,
};

/// What one journal decode pass recovered.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Channel chapters visited.
    pub chapters: usize,
    /// Chapters abandoned part-way through.
    pub aborted_chapters: usize,
    /// NoteOff actions emitted.
    pub note_offs: usize,
    /// Pitch wheel corrections emitted.
    pub pitch_corrections: usize,
    /// Framing failure that ended the channel loop early.
    pub framing_error: Option<Error>,
}

/// Decodes a packet's channel journals into recovery actions.
///
/// Borrows one peer's channel state and emitter for the duration of a
/// packet.
#[derive(Debug)]
pub struct JournalDecoder<'a> {
    channels: &'a mut PeerChannels,
    emitter: &'a mut RecoveryEmitter,
    pitch_corrections: bool,
    now: Instant,
}

impl<'a> JournalDecoder<'a> {
    /// Create a decoder over one peer's state.
    #[must_use]
    pub fn new(
        channels: &'a mut PeerChannels,
        emitter: &'a mut RecoveryEmitter,
        pitch_corrections: bool,
        now: Instant,
    ) -> Self {
        Self {
            channels,
            emitter,
            pitch_corrections,
            now,
        }
    }

    /// Walk chapters 0 through TOTCHAN and emit corrections to `sink`.
    pub fn decode<S: MidiSink + ?Sized>(
        &mut self,
        journal: &RecoveryJournal,
        sink: &mut S,
    ) -> DecodeSummary {
        let mut summary = DecodeSummary::default();
        let header = journal.header();

        if header.flags().system_present() {
            debug!(
                len = journal.system().map(<[u8]>::len),
                "system journal present - not used for recovery"
            );
        }
        if !header.flags().channels_present() {
            debug!("journal carries no channel chapters");
            return summary;
        }

        let remaining = journal.remaining();
        let mut offset = 0;
        for index in 0..=header.total_channels() {
            let (chapter, payload, start) = if index == 0 {
                let Some(first) = journal.first_chapter() else {
                    warn!("channel journal flagged without a first chapter");
                    summary.framing_error = Some(Error::MissingFirstChapter);
                    break;
                };
                (*first.header(), first.payload(), 0)
            } else {
                match frame_trailing_chapter(remaining, offset) {
                    Ok((chapter, end)) => {
                        let start = offset + ChapterHeader::SIZE;
                        offset = end;
                        (chapter, &remaining[..end], start)
                    }
                    Err(err) => {
                        warn!(index, %err, "chapter framing failed - abandoning remaining channels");
                        Metrics::record_framing_abort();
                        summary.framing_error = Some(err);
                        break;
                    }
                }
            };

            self.decode_chapter(index, &chapter, payload, start, sink, &mut summary);
        }

        Metrics::record_journal_recovery(summary.note_offs, summary.pitch_corrections);
        summary
    }

    fn decode_chapter<S: MidiSink + ?Sized>(
        &mut self,
        index: u8,
        chapter: &ChapterHeader,
        payload: &[u8],
        start: usize,
        sink: &mut S,
        summary: &mut DecodeSummary,
    ) {
        let channel = chapter.channel();
        trace!(index, channel, chapters = %chapter.chapters(), "decoding channel chapter");

        let mut facts = ChapterFacts::default();
        let result = ChapterParser::new(payload, start).parse(chapter.chapters(), &mut facts);
        summary.chapters += 1;
        Metrics::record_chapter(result.is_err());
        match result {
            Ok(next) if next < payload.len() => {
                debug!(index, channel, unused = payload.len() - next, "chapter has trailing bytes");
            }
            Ok(_) => {}
            Err(err) => {
                summary.aborted_chapters += 1;
                warn!(index, channel, %err, "chapter decode aborted - keeping recovered actions");
            }
        }

        let Some(state) = self.channels.get_mut(channel) else {
            warn!(channel, "chapter addresses an untracked channel");
            return;
        };

        if let Some(value) = facts.pitch_wheel {
            let previous = state.pitch_wheel();
            if state.set_pitch_wheel(value, self.now) {
                debug!(channel, previous, value, "pitch wheel differs from journal");
                if self.pitch_corrections {
                    self.emitter
                        .push(RecoveryAction::PitchWheelReset { channel, value }, sink);
                    summary.pitch_corrections += 1;
                }
            }
        }

        for note in facts.note_offs {
            let was_held = state.note_off(note);
            trace!(channel, note, was_held, "journal NoteOff");
            self.emitter.push(RecoveryAction::NoteOff { channel, note }, sink);
            summary.note_offs += 1;
        }

        self.emitter.drain(sink);
    }
}
