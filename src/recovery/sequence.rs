//! RTP sequence number tracking and packet classification.

use core::fmt;

use tracing::{debug, warn};

use crate::protocol::JournalHeader;

/// Classification of an arriving packet relative to the last accepted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceOutcome {
    /// First packet seen from the peer.
    FirstPacket,
    /// Packet carries no journal, so there is nothing to recover from.
    NoJournal,
    /// Packet is a duplicate or arrived after a newer one; rejected.
    OutOfOrder,
    /// Exactly one packet was lost and the sender flagged it (S bit).
    SinglePacketLoss,
    /// One or more packets were lost; the journal must be decoded.
    MultiPacketLoss,
    /// Packet follows the last accepted one.
    InOrder,
}

impl SequenceOutcome {
    /// Whether the packet's commands should be delivered.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        !matches!(self, Self::OutOfOrder)
    }

    /// Whether the packet's journal must be decoded.
    #[must_use]
    pub const fn needs_recovery(self) -> bool {
        matches!(self, Self::MultiPacketLoss)
    }
}

impl fmt::Display for SequenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FirstPacket => "first packet",
            Self::NoJournal => "no journal",
            Self::OutOfOrder => "out of order",
            Self::SinglePacketLoss => "single packet loss",
            Self::MultiPacketLoss => "multi packet loss",
            Self::InOrder => "in order",
        };
        write!(f, "{name}")
    }
}

/// Signed distance from `last` to `incoming` in 16-bit sequence space.
///
/// Positive when `incoming` is ahead, zero for a duplicate, negative when it
/// is behind. Distances of exactly half the space count as behind.
#[must_use]
pub const fn sequence_distance(last: u16, incoming: u16) -> i32 {
    incoming.wrapping_sub(last) as i16 as i32
}

/// Last accepted sequence number for one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    last: Option<u16>,
}

impl SequenceTracker {
    /// Create a tracker that has not seen any packet.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Last accepted sequence number.
    #[must_use]
    pub const fn last(&self) -> Option<u16> {
        self.last
    }

    /// Classify `incoming` and record it unless it is stale.
    pub fn classify(&mut self, incoming: u16, journal: Option<&JournalHeader>) -> SequenceOutcome {
        let Some(last) = self.last else {
            debug!(seq = incoming, "first packet from peer");
            self.last = Some(incoming);
            return SequenceOutcome::FirstPacket;
        };

        let distance = sequence_distance(last, incoming);
        if distance <= 0 {
            warn!(seq = incoming, last, "stale or duplicate packet - skipping");
            return SequenceOutcome::OutOfOrder;
        }

        self.last = Some(incoming);

        let Some(journal) = journal else {
            return SequenceOutcome::NoJournal;
        };

        match distance {
            1 => SequenceOutcome::InOrder,
            2 if journal.flags().single_loss() => {
                warn!(seq = incoming, last, "single packet loss identified - continuing");
                SequenceOutcome::SinglePacketLoss
            }
            _ => {
                if journal.flags().channels_present() {
                    warn!(
                        seq = incoming,
                        last,
                        lost = distance - 1,
                        "missed packets - processing journal"
                    );
                } else {
                    warn!(
                        seq = incoming,
                        last,
                        lost = distance - 1,
                        "missed packets but no channel journal present - continuing"
                    );
                }
                SequenceOutcome::MultiPacketLoss
            }
        }
    }
}
