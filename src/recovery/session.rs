//! Peer registry and the per-packet recovery entry point.

use core::fmt;
use core::str::FromStr;
use std::collections::HashMap;
use std::convert::Infallible;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::channel::{ChannelState, PeerChannels};
use super::config::RecoveryConfig;
use super::decoder::{DecodeSummary, JournalDecoder};
use super::emitter::{MidiSink, RecoveryEmitter};
use super::error::RecoveryError;
use super::metrics::Metrics;
use super::sequence::{SequenceOutcome, SequenceTracker};
use super::watchdog::{StuckStateWatchdog, WatchdogSweep};
use crate::protocol::{CHANNEL_COUNT, MidiCommand, RecoveryAction, RecoveryJournal};

/// Identifier assigned to a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerId(Uuid);

impl PeerId {
    /// Allocate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PeerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything tracked for one peer.
#[derive(Debug)]
struct PeerState {
    name: String,
    sequence: SequenceTracker,
    channels: PeerChannels,
    emitter: RecoveryEmitter,
}

/// One inbound RTP-MIDI packet, already split into commands and journal.
#[derive(Debug, Clone, Default)]
pub struct InboundPacket {
    /// RTP sequence number.
    pub sequence_number: u16,
    /// Recovery journal, if the sender attached one.
    pub journal: Option<RecoveryJournal>,
    /// MIDI commands carried by the packet.
    pub commands: Vec<MidiCommand>,
}

impl InboundPacket {
    /// Packet with no commands and no journal.
    #[must_use]
    pub fn new(sequence_number: u16) -> Self {
        Self {
            sequence_number,
            ..Self::default()
        }
    }

    /// Attach a journal.
    #[must_use]
    pub fn with_journal(mut self, journal: RecoveryJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Attach live commands.
    #[must_use]
    pub fn with_commands(mut self, commands: impl IntoIterator<Item = MidiCommand>) -> Self {
        self.commands.extend(commands);
        self
    }
}

/// Result of handling one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketReport {
    /// How the packet was classified.
    pub outcome: SequenceOutcome,
    /// Journal checkpoint to acknowledge to the sender.
    pub feedback: Option<u16>,
    /// Journal recovery performed, when loss required it.
    pub recovery: Option<DecodeSummary>,
    /// Live commands forwarded to the sink.
    pub forwarded: usize,
}

/// Block of notes cleared by [`SessionRegistry::reset_notes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoteRange {
    /// Notes 0 to 42.
    Low,
    /// Notes 43 to 85.
    Mid,
    /// Notes 86 to 127.
    High,
    /// Every note.
    All,
}

impl NoteRange {
    /// Notes covered by the range.
    #[must_use]
    pub const fn notes(self) -> RangeInclusive<u8> {
        match self {
            Self::Low => 0..=42,
            Self::Mid => 43..=85,
            Self::High => 86..=127,
            Self::All => 0..=127,
        }
    }
}

impl FromStr for NoteRange {
    type Err = Infallible;

    /// Unknown names select [`NoteRange::All`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let range = match s.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "mid" => Self::Mid,
            "high" => Self::High,
            "all" => Self::All,
            other => {
                warn!(range = other, "unknown note range - resetting all notes");
                Self::All
            }
        };
        Ok(range)
    }
}

impl fmt::Display for NoteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "Low",
            Self::Mid => "Mid",
            Self::High => "High",
            Self::All => "All",
        };
        f.write_str(name)
    }
}

/// Connected peers and their recovery state.
///
/// Each peer sits behind its own mutex so packet handling for one peer never
/// waits on another. Callers that share a sink between threads must take the
/// sink lock before calling in.
#[derive(Debug)]
pub struct SessionRegistry {
    config: RecoveryConfig,
    watchdog: StuckStateWatchdog,
    peers: RwLock<HashMap<PeerId, Arc<Mutex<PeerState>>>>,
}

impl SessionRegistry {
    /// Create an empty registry after validating `config`.
    pub fn new(config: RecoveryConfig) -> Result<Self, RecoveryError> {
        config.validate().map_err(RecoveryError::Config)?;
        Ok(Self {
            watchdog: StuckStateWatchdog::new(config.note_timeout),
            config,
            peers: RwLock::new(HashMap::new()),
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Register a peer with fresh state.
    pub fn connect(&self, name: impl Into<String>) -> PeerId {
        let id = PeerId::new();
        let name = name.into();
        info!(peer = %id, %name, "peer connected");
        let state = PeerState {
            name,
            sequence: SequenceTracker::new(),
            channels: PeerChannels::new(),
            emitter: RecoveryEmitter::new(
                self.config.emit_batch_size,
                self.config.note_off_velocity,
            ),
        };
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(state)));
        Metrics::record_peer_connect();
        id
    }

    /// Forget a peer. Held notes are not released.
    pub fn disconnect(&self, peer: PeerId) -> Result<(), RecoveryError> {
        let removed = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&peer)
            .ok_or(RecoveryError::UnknownPeer(peer))?;
        let state = removed.lock().unwrap_or_else(PoisonError::into_inner);
        info!(
            %peer,
            name = %state.name,
            held = state.channels.held_note_count(),
            "peer disconnected"
        );
        Metrics::record_peer_disconnect();
        Ok(())
    }

    /// Number of connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Identifiers of connected peers.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Display name given at connect time.
    pub fn peer_name(&self, peer: PeerId) -> Result<String, RecoveryError> {
        self.with_peer(peer, |state| state.name.clone())
    }

    /// Last accepted sequence number.
    pub fn last_sequence(&self, peer: PeerId) -> Result<Option<u16>, RecoveryError> {
        self.with_peer(peer, |state| state.sequence.last())
    }

    /// Copy of one channel's state.
    pub fn channel_snapshot(
        &self,
        peer: PeerId,
        channel: u8,
    ) -> Result<ChannelState, RecoveryError> {
        self.with_peer(peer, |state| state.channels.get(channel).cloned())?
            .ok_or(RecoveryError::InvalidChannel(channel))
    }

    /// Classify a packet, recover from its journal if needed, and forward its
    /// commands to `sink`.
    #[instrument(level = "debug", skip(self, packet, now, sink), fields(seq = packet.sequence_number))]
    pub fn handle_packet<S: MidiSink + ?Sized>(
        &self,
        peer: PeerId,
        packet: &InboundPacket,
        now: Instant,
        sink: &mut S,
    ) -> Result<PacketReport, RecoveryError> {
        let entry = self.peer(peer)?;
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        let journal = packet.journal.as_ref();
        let outcome = state
            .sequence
            .classify(packet.sequence_number, journal.map(RecoveryJournal::header));
        Metrics::record_packet(outcome);

        if !outcome.is_accepted() {
            return Ok(PacketReport {
                outcome,
                feedback: None,
                recovery: None,
                forwarded: 0,
            });
        }

        let recovery = match journal {
            Some(journal) if outcome.needs_recovery() => {
                let summary = JournalDecoder::new(
                    &mut state.channels,
                    &mut state.emitter,
                    self.config.pitch_corrections,
                    now,
                )
                .decode(journal, sink);
                debug!(
                    note_offs = summary.note_offs,
                    pitch = summary.pitch_corrections,
                    aborted = summary.aborted_chapters,
                    "journal recovery complete"
                );
                Some(summary)
            }
            _ => None,
        };

        let mut forwarded = 0;
        for command in &packet.commands {
            if !command.is_valid() {
                warn!(?command, "dropping out-of-range MIDI command");
                continue;
            }
            if let Some(channel) = state.channels.get_mut(command.channel()) {
                channel.apply(command, now);
            }
            sink.send_command(command);
            forwarded += 1;
        }
        if forwarded > 0 {
            sink.flush();
            Metrics::record_live_commands(forwarded);
        }

        let feedback = match outcome {
            SequenceOutcome::InOrder
            | SequenceOutcome::SinglePacketLoss
            | SequenceOutcome::MultiPacketLoss => journal.map(|j| j.header().checkpoint()),
            SequenceOutcome::FirstPacket
            | SequenceOutcome::NoJournal
            | SequenceOutcome::OutOfOrder => None,
        };

        Ok(PacketReport {
            outcome,
            feedback,
            recovery,
            forwarded,
        })
    }

    /// Run one watchdog pass over every peer.
    pub fn tick<S: MidiSink + ?Sized>(&self, now: Instant, sink: &mut S) -> WatchdogSweep {
        let peers: Vec<_> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, state)| (*id, Arc::clone(state)))
            .collect();

        let mut sweep = WatchdogSweep::default();
        for (id, entry) in peers {
            let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
            let state = &mut *guard;
            let peer_sweep = self
                .watchdog
                .scan(&mut state.channels, now, &mut state.emitter, sink);
            if peer_sweep.total() > 0 {
                debug!(
                    peer = %id,
                    note_offs = peer_sweep.note_offs,
                    pitch_resets = peer_sweep.pitch_resets,
                    "watchdog cleared stuck state"
                );
            }
            sweep.merge(peer_sweep);
        }
        sweep
    }

    /// Send NoteOff for every note in `range` on `channel` and clear them.
    ///
    /// Returns the number of NoteOffs sent.
    pub fn reset_notes<S: MidiSink + ?Sized>(
        &self,
        peer: PeerId,
        channel: u8,
        range: NoteRange,
        sink: &mut S,
    ) -> Result<usize, RecoveryError> {
        if usize::from(channel) >= CHANNEL_COUNT {
            return Err(RecoveryError::InvalidChannel(channel));
        }
        let entry = self.peer(peer)?;
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        let mut sent = 0;
        if let Some(channel_state) = state.channels.get_mut(channel) {
            for note in range.notes() {
                channel_state.note_off(note);
                state
                    .emitter
                    .push(RecoveryAction::NoteOff { channel, note }, sink);
                sent += 1;
            }
        }
        state.emitter.drain(sink);
        info!(%peer, channel, %range, sent, "notes reset");
        Ok(sent)
    }

    fn peer(&self, peer: PeerId) -> Result<Arc<Mutex<PeerState>>, RecoveryError> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&peer)
            .cloned()
            .ok_or(RecoveryError::UnknownPeer(peer))
    }

    fn with_peer<T>(
        &self,
        peer: PeerId,
        f: impl FnOnce(&PeerState) -> T,
    ) -> Result<T, RecoveryError> {
        let entry = self.peer(peer)?;
        let state = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        ChapterFlags, ChapterHeader, ChapterKind, FramedChapter, JournalFlags, JournalHeader,
    };
    use crate::recovery::SinkEvent;
    use std::time::Duration;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(RecoveryConfig::default()).unwrap()
    }

    fn note_on(channel: u8, note: u8) -> MidiCommand {
        MidiCommand::NoteOn {
            channel,
            note,
            velocity: 100,
        }
    }

    /// Journal whose only chapter releases `note` on `channel`.
    fn release_journal(checkpoint: u16, channel: u8, note: u8) -> RecoveryJournal {
        let low = note / 8;
        let bitmap = 0x80 >> (note % 8);
        let header = ChapterHeader::new(
            channel,
            6,
            ChapterFlags::new().with(ChapterKind::NoteOnOff),
        )
        .unwrap();
        let chapter = FramedChapter::new(header, vec![0x00, (low << 4) | low, bitmap]);
        RecoveryJournal::new(
            JournalHeader::new(
                JournalFlags::new().with(JournalFlags::CHANNELS),
                0,
                checkpoint,
            ),
            Some(chapter),
            Vec::new(),
        )
    }

    #[test]
    fn first_packet_forwards_commands_without_recovery() {
        let registry = registry();
        let peer = registry.connect("keys");
        let mut sink: Vec<SinkEvent> = Vec::new();
        let now = Instant::now();

        let packet = InboundPacket::new(100)
            .with_journal(release_journal(90, 0, 60))
            .with_commands([note_on(0, 60)]);
        let report = registry.handle_packet(peer, &packet, now, &mut sink).unwrap();

        assert_eq!(report.outcome, SequenceOutcome::FirstPacket);
        assert!(report.recovery.is_none());
        assert!(report.feedback.is_none());
        assert_eq!(report.forwarded, 1);
        assert_eq!(
            sink,
            vec![SinkEvent::Command(note_on(0, 60)), SinkEvent::Flush]
        );
        let channel = registry.channel_snapshot(peer, 0).unwrap();
        assert_eq!(channel.note_on_since(60), Some(now));
    }

    #[test]
    fn loss_triggers_journal_recovery_and_feedback() {
        let registry = registry();
        let peer = registry.connect("keys");
        let mut sink: Vec<SinkEvent> = Vec::new();
        let now = Instant::now();

        registry
            .handle_packet(peer, &InboundPacket::new(1).with_commands([note_on(3, 64)]), now, &mut sink)
            .unwrap();
        // packets 2..=4 lost, one of them carried the NoteOff
        let packet = InboundPacket::new(5).with_journal(release_journal(1, 3, 64));
        let report = registry.handle_packet(peer, &packet, now, &mut sink).unwrap();

        assert_eq!(report.outcome, SequenceOutcome::MultiPacketLoss);
        assert_eq!(report.feedback, Some(1));
        assert_eq!(report.recovery.map(|r| r.note_offs), Some(1));
        assert!(sink.contains(&SinkEvent::Command(MidiCommand::NoteOff {
            channel: 3,
            note: 64,
            velocity: 64
        })));
        assert_eq!(
            registry.channel_snapshot(peer, 3).unwrap().held_notes().count(),
            0
        );
    }

    #[test]
    fn single_loss_skips_journal_decode_but_acknowledges() {
        let registry = registry();
        let peer = registry.connect("keys");
        let mut sink: Vec<SinkEvent> = Vec::new();
        let now = Instant::now();

        registry
            .handle_packet(peer, &InboundPacket::new(1).with_commands([note_on(0, 60)]), now, &mut sink)
            .unwrap();
        sink.clear();

        // packet 2 lost; sender flags it with S and still journals note 60 off
        let single = release_journal(1, 0, 60);
        let header = JournalHeader::new(
            JournalFlags::new()
                .with(JournalFlags::CHANNELS)
                .with(JournalFlags::SINGLE_LOSS),
            0,
            1,
        );
        let journal = RecoveryJournal::new(header, single.first_chapter().cloned(), Vec::new());
        let report = registry
            .handle_packet(peer, &InboundPacket::new(3).with_journal(journal), now, &mut sink)
            .unwrap();

        assert_eq!(report.outcome, SequenceOutcome::SinglePacketLoss);
        assert!(!report.outcome.needs_recovery());
        assert!(report.recovery.is_none());
        assert_eq!(report.feedback, Some(1));
        assert!(sink.is_empty());
        assert_eq!(registry.last_sequence(peer).unwrap(), Some(3));
        let held: Vec<_> = registry.channel_snapshot(peer, 0).unwrap().held_notes().collect();
        assert_eq!(held, vec![60]);
    }

    #[test]
    fn stale_packet_changes_nothing() {
        let registry = registry();
        let peer = registry.connect("pads");
        let mut sink: Vec<SinkEvent> = Vec::new();
        let now = Instant::now();

        registry
            .handle_packet(peer, &InboundPacket::new(40), now, &mut sink)
            .unwrap();
        let before = registry.channel_snapshot(peer, 9).unwrap();

        let stale = InboundPacket::new(39)
            .with_journal(release_journal(30, 9, 36))
            .with_commands([note_on(9, 36)]);
        let report = registry.handle_packet(peer, &stale, now, &mut sink).unwrap();

        assert_eq!(report.outcome, SequenceOutcome::OutOfOrder);
        assert_eq!(report.forwarded, 0);
        assert!(sink.is_empty());
        assert_eq!(registry.last_sequence(peer).unwrap(), Some(40));
        assert_eq!(registry.channel_snapshot(peer, 9).unwrap(), before);
    }

    #[test]
    fn in_order_packet_reports_checkpoint() {
        let registry = registry();
        let peer = registry.connect("drums");
        let mut sink: Vec<SinkEvent> = Vec::new();
        let now = Instant::now();

        registry
            .handle_packet(peer, &InboundPacket::new(7), now, &mut sink)
            .unwrap();
        let packet = InboundPacket::new(8).with_journal(release_journal(6, 0, 0));
        let report = registry.handle_packet(peer, &packet, now, &mut sink).unwrap();
        assert_eq!(report.outcome, SequenceOutcome::InOrder);
        assert_eq!(report.feedback, Some(6));
        assert!(report.recovery.is_none());
    }

    #[test]
    fn unknown_peer_is_an_error() {
        let registry = registry();
        let mut sink: Vec<SinkEvent> = Vec::new();
        let ghost = PeerId::new();
        let result = registry.handle_packet(ghost, &InboundPacket::new(1), Instant::now(), &mut sink);
        assert!(matches!(result, Err(RecoveryError::UnknownPeer(id)) if id == ghost));
        assert!(matches!(
            registry.disconnect(ghost),
            Err(RecoveryError::UnknownPeer(_))
        ));
    }

    #[test]
    fn disconnect_forgets_state_without_releasing() {
        let registry = registry();
        let peer = registry.connect("keys");
        let mut sink: Vec<SinkEvent> = Vec::new();
        registry
            .handle_packet(
                peer,
                &InboundPacket::new(1).with_commands([note_on(0, 1)]),
                Instant::now(),
                &mut sink,
            )
            .unwrap();
        sink.clear();

        registry.disconnect(peer).unwrap();
        assert_eq!(registry.peer_count(), 0);
        assert!(sink.is_empty());
        assert!(registry.last_sequence(peer).is_err());
    }

    #[test]
    fn tick_releases_stuck_notes_across_peers() {
        let registry = registry();
        let a = registry.connect("a");
        let b = registry.connect("b");
        let mut sink: Vec<SinkEvent> = Vec::new();
        let start = Instant::now();

        for peer in [a, b] {
            registry
                .handle_packet(
                    peer,
                    &InboundPacket::new(1).with_commands([note_on(1, 50)]),
                    start,
                    &mut sink,
                )
                .unwrap();
        }

        let sweep = registry.tick(start + Duration::from_secs(6), &mut sink);
        assert_eq!(sweep.note_offs, 2);
        let second = registry.tick(start + Duration::from_secs(6), &mut sink);
        assert_eq!(second.total(), 0);
    }

    #[test]
    fn reset_notes_covers_the_named_range() {
        let registry = registry();
        let peer = registry.connect("keys");
        let mut sink: Vec<SinkEvent> = Vec::new();
        registry
            .handle_packet(
                peer,
                &InboundPacket::new(1).with_commands([note_on(2, 90), note_on(2, 10)]),
                Instant::now(),
                &mut sink,
            )
            .unwrap();

        let sent = registry
            .reset_notes(peer, 2, "high".parse().unwrap(), &mut sink)
            .unwrap();
        assert_eq!(sent, 42);
        let channel = registry.channel_snapshot(peer, 2).unwrap();
        assert_eq!(channel.held_notes().collect::<Vec<_>>(), vec![10]);

        assert!(matches!(
            registry.reset_notes(peer, 16, NoteRange::All, &mut sink),
            Err(RecoveryError::InvalidChannel(16))
        ));
    }

    #[test]
    fn note_range_names() {
        assert_eq!("Low".parse::<NoteRange>(), Ok(NoteRange::Low));
        assert_eq!("MID".parse::<NoteRange>(), Ok(NoteRange::Mid));
        assert_eq!("bogus".parse::<NoteRange>(), Ok(NoteRange::All));
        assert_eq!(NoteRange::All.notes().count(), 128);
        assert_eq!(NoteRange::Low.notes().count(), 43);
        assert_eq!(NoteRange::Mid.notes().count(), 43);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = RecoveryConfig::default().with_note_timeout(Duration::ZERO);
        assert!(matches!(
            SessionRegistry::new(config),
            Err(RecoveryError::Config(_))
        ));
    }
}
