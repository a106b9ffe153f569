use std::sync::atomic::{AtomicU64, Ordering};

use super::SequenceOutcome;

/// Track recovery metrics without external dependencies.
pub(crate) struct Metrics;

static PACKETS: AtomicU64 = AtomicU64::new(0);
static LIVE_COMMANDS: AtomicU64 = AtomicU64::new(0);
static CHAPTERS_DECODED: AtomicU64 = AtomicU64::new(0);
static CHAPTERS_ABORTED: AtomicU64 = AtomicU64::new(0);
static FRAMING_ABORTS: AtomicU64 = AtomicU64::new(0);
static JOURNAL_NOTE_OFFS: AtomicU64 = AtomicU64::new(0);
static JOURNAL_PITCH_CORRECTIONS: AtomicU64 = AtomicU64::new(0);
static WATCHDOG_NOTE_OFFS: AtomicU64 = AtomicU64::new(0);
static WATCHDOG_PITCH_RESETS: AtomicU64 = AtomicU64::new(0);
static ACTIVE_PEERS: AtomicU64 = AtomicU64::new(0);

struct OutcomeCounters {
    first_packet: AtomicU64,
    no_journal: AtomicU64,
    out_of_order: AtomicU64,
    single_loss: AtomicU64,
    multi_loss: AtomicU64,
    in_order: AtomicU64,
}

static OUTCOME_COUNTERS: OutcomeCounters = OutcomeCounters::new();

impl OutcomeCounters {
    const fn new() -> Self {
        Self {
            first_packet: AtomicU64::new(0),
            no_journal: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
            single_loss: AtomicU64::new(0),
            multi_loss: AtomicU64::new(0),
            in_order: AtomicU64::new(0),
        }
    }

    fn increment(&self, outcome: SequenceOutcome) {
        use SequenceOutcome::*;

        match outcome {
            FirstPacket => self.first_packet.fetch_add(1, Ordering::Relaxed),
            NoJournal => self.no_journal.fetch_add(1, Ordering::Relaxed),
            OutOfOrder => self.out_of_order.fetch_add(1, Ordering::Relaxed),
            SinglePacketLoss => self.single_loss.fetch_add(1, Ordering::Relaxed),
            MultiPacketLoss => self.multi_loss.fetch_add(1, Ordering::Relaxed),
            InOrder => self.in_order.fetch_add(1, Ordering::Relaxed),
        };
    }
}

impl Metrics {
    #[inline]
    pub(crate) fn record_packet(outcome: SequenceOutcome) {
        PACKETS.fetch_add(1, Ordering::Relaxed);
        OUTCOME_COUNTERS.increment(outcome);
    }

    #[inline]
    pub(crate) fn record_live_commands(count: usize) {
        LIVE_COMMANDS.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_chapter(aborted: bool) {
        CHAPTERS_DECODED.fetch_add(1, Ordering::Relaxed);
        if aborted {
            CHAPTERS_ABORTED.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_framing_abort() {
        FRAMING_ABORTS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_journal_recovery(note_offs: usize, pitch_corrections: usize) {
        JOURNAL_NOTE_OFFS.fetch_add(note_offs as u64, Ordering::Relaxed);
        JOURNAL_PITCH_CORRECTIONS.fetch_add(pitch_corrections as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_watchdog(note_offs: usize, pitch_resets: usize) {
        WATCHDOG_NOTE_OFFS.fetch_add(note_offs as u64, Ordering::Relaxed);
        WATCHDOG_PITCH_RESETS.fetch_add(pitch_resets as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_peer_connect() {
        ACTIVE_PEERS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_peer_disconnect() {
        ACTIVE_PEERS.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn totals() -> MetricsSnapshot {
        MetricsSnapshot {
            packets: PACKETS.load(Ordering::Relaxed),
            first_packets: OUTCOME_COUNTERS.first_packet.load(Ordering::Relaxed),
            no_journal: OUTCOME_COUNTERS.no_journal.load(Ordering::Relaxed),
            out_of_order: OUTCOME_COUNTERS.out_of_order.load(Ordering::Relaxed),
            single_packet_loss: OUTCOME_COUNTERS.single_loss.load(Ordering::Relaxed),
            multi_packet_loss: OUTCOME_COUNTERS.multi_loss.load(Ordering::Relaxed),
            in_order: OUTCOME_COUNTERS.in_order.load(Ordering::Relaxed),
            live_commands: LIVE_COMMANDS.load(Ordering::Relaxed),
            chapters_decoded: CHAPTERS_DECODED.load(Ordering::Relaxed),
            chapters_aborted: CHAPTERS_ABORTED.load(Ordering::Relaxed),
            framing_aborts: FRAMING_ABORTS.load(Ordering::Relaxed),
            journal_note_offs: JOURNAL_NOTE_OFFS.load(Ordering::Relaxed),
            journal_pitch_corrections: JOURNAL_PITCH_CORRECTIONS.load(Ordering::Relaxed),
            watchdog_note_offs: WATCHDOG_NOTE_OFFS.load(Ordering::Relaxed),
            watchdog_pitch_resets: WATCHDOG_PITCH_RESETS.load(Ordering::Relaxed),
            active_peers: ACTIVE_PEERS.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide recovery counters.
#[must_use]
pub fn metrics_snapshot() -> MetricsSnapshot {
    Metrics::totals()
}

/// Lightweight snapshot of recovery counters.
#[allow(missing_docs)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets: u64,
    pub first_packets: u64,
    pub no_journal: u64,
    pub out_of_order: u64,
    pub single_packet_loss: u64,
    pub multi_packet_loss: u64,
    pub in_order: u64,
    pub live_commands: u64,
    pub chapters_decoded: u64,
    pub chapters_aborted: u64,
    pub framing_aborts: u64,
    pub journal_note_offs: u64,
    pub journal_pitch_corrections: u64,
    pub watchdog_note_offs: u64,
    pub watchdog_pitch_resets: u64,
    pub active_peers: u64,
}

impl MetricsSnapshot {
    /// Fraction of packets that arrived after a gap, in parts per thousand.
    #[must_use]
    pub fn loss_per_mille(&self) -> Option<u64> {
        if self.packets == 0 {
            return None;
        }
        Some((self.single_packet_loss + self.multi_packet_loss) * 1_000 / self.packets)
    }

    /// Corrections issued by either recovery path.
    #[must_use]
    pub const fn corrections(&self) -> u64 {
        self.journal_note_offs
            + self.journal_pitch_corrections
            + self.watchdog_note_offs
            + self.watchdog_pitch_resets
    }
}
