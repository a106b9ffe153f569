//! Stateful recovery engine
//!
//! Tracks sequence numbers and channel state per peer, turns recovery
//! journals into corrective MIDI events, and runs the stuck-state watchdog.

mod channel;
mod config;
mod decoder;
mod emitter;
mod error;
mod metrics;
mod sequence;
mod session;
mod watchdog;

pub use channel::{ChannelState, PeerChannels};
pub use config::{
    DEFAULT_EMIT_BATCH_SIZE, DEFAULT_NOTE_OFF_VELOCITY, DEFAULT_NOTE_TIMEOUT,
    DEFAULT_WATCHDOG_PERIOD, RecoveryConfig,
};
pub use decoder::{DecodeSummary, JournalDecoder};
pub use emitter::{MidiSink, RecoveryEmitter, SinkEvent};
pub use error::RecoveryError;
pub use metrics::{MetricsSnapshot, metrics_snapshot};
pub use sequence::{SequenceOutcome, SequenceTracker, sequence_distance};
pub use session::{InboundPacket, NoteRange, PacketReport, PeerId, SessionRegistry};
pub use watchdog::{StuckStateWatchdog, WatchdogHandle, WatchdogRunner, WatchdogSweep};
