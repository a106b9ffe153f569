//! RTP-MIDI recovery journal decoding and stuck-note protection
//!
//! This library tracks the RTP sequence numbers of each connected peer, decodes
//! the recovery journal carried by RTP-MIDI packets when loss is detected, and
//! emits corrective NoteOff and pitch wheel events to a MIDI sink. A
//! timeout-based watchdog clears notes the journal could not.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Instant;
//! use rtpmidi_recovery::{
//!     InboundPacket, MidiCommand, RecoveryConfig, RecoveryJournal, SequenceOutcome,
//!     SessionRegistry, SinkEvent,
//! };
//!
//! let registry = SessionRegistry::new(RecoveryConfig::default())?;
//! let peer = registry.connect("keyboard");
//! let mut sink: Vec<SinkEvent> = Vec::new();
//!
//! let note = MidiCommand::NoteOn { channel: 0, note: 60, velocity: 100 };
//! registry.handle_packet(peer, &InboundPacket::new(1).with_commands([note]), Instant::now(), &mut sink)?;
//!
//! // packets 2 and 3 were lost; the journal says note 60 was released
//! let journal = RecoveryJournal::decode(vec![0x20, 0x00, 0x01, 0x00, 0x06, 0x08, 0x00, 0x77, 0x08].into())?;
//! let report = registry.handle_packet(peer, &InboundPacket::new(4).with_journal(journal), Instant::now(), &mut sink)?;
//!
//! assert_eq!(report.outcome, SequenceOutcome::MultiPacketLoss);
//! assert!(registry.channel_snapshot(peer, 0)?.note_on_since(60).is_none());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Features
//!
//! - **Bounds-checked chapter parsing** - truncated or malformed chapters abort
//!   without losing what was already recovered
//! - **Wraparound-aware sequencing** - 16-bit RTP sequence numbers
//! - **Per-peer locking** - journal decode and the watchdog never race on a peer
//! - **Optional serde** - `serde` feature for configuration and identifiers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod protocol;
pub mod recovery;

pub use protocol::{
    ChapterHeader, Error, JournalFlags, JournalHeader, MidiCommand, RecoveryAction,
    RecoveryJournal, Result,
};
pub use recovery::{
    InboundPacket, MidiSink, NoteRange, PacketReport, PeerId, RecoveryConfig, RecoveryError,
    SequenceOutcome, SessionRegistry, SinkEvent, WatchdogRunner,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
