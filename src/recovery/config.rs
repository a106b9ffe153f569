//! Tunables for journal recovery and the stuck-state watchdog.

use std::time::Duration;

use crate::protocol::{Error, Result};

/// Default interval between watchdog scans.
pub const DEFAULT_WATCHDOG_PERIOD: Duration = Duration::from_millis(500);
/// Default time a note or bent pitch wheel may stay active before it is cleared.
pub const DEFAULT_NOTE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of corrective events sent to the sink per drain.
pub const DEFAULT_EMIT_BATCH_SIZE: usize = 8;
/// Release velocity used for recovered NoteOff events.
pub const DEFAULT_NOTE_OFF_VELOCITY: u8 = 64;

/// Configurable parameters driving recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RecoveryConfig {
    /// Interval between watchdog scans.
    pub watchdog_period: Duration,
    /// Age after which a held note or bent pitch wheel is forcibly cleared.
    pub note_timeout: Duration,
    /// Number of buffered actions that triggers a mid-decode drain.
    pub emit_batch_size: usize,
    /// Send a pitch wheel correction when chapter W disagrees with local state.
    pub pitch_corrections: bool,
    /// Velocity attached to recovered NoteOff events.
    pub note_off_velocity: u8,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            watchdog_period: DEFAULT_WATCHDOG_PERIOD,
            note_timeout: DEFAULT_NOTE_TIMEOUT,
            emit_batch_size: DEFAULT_EMIT_BATCH_SIZE,
            pitch_corrections: true,
            note_off_velocity: DEFAULT_NOTE_OFF_VELOCITY,
        }
    }
}

impl RecoveryConfig {
    /// Override the watchdog scan interval.
    #[must_use]
    pub const fn with_watchdog_period(mut self, period: Duration) -> Self {
        self.watchdog_period = period;
        self
    }

    /// Override the stuck-state timeout.
    #[must_use]
    pub const fn with_note_timeout(mut self, timeout: Duration) -> Self {
        self.note_timeout = timeout;
        self
    }

    /// Override the emit batch size.
    #[must_use]
    pub const fn with_emit_batch_size(mut self, batch: usize) -> Self {
        self.emit_batch_size = batch;
        self
    }

    /// Enable or disable pitch wheel corrections from chapter W.
    #[must_use]
    pub const fn with_pitch_corrections(mut self, enabled: bool) -> Self {
        self.pitch_corrections = enabled;
        self
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.watchdog_period.is_zero() {
            return Err(Error::InvalidConfig("watchdog period must be non-zero"));
        }
        if self.note_timeout.is_zero() {
            return Err(Error::InvalidConfig("note timeout must be non-zero"));
        }
        if self.emit_batch_size == 0 {
            return Err(Error::InvalidConfig("emit batch size must be non-zero"));
        }
        if self.note_off_velocity > 0x7f {
            return Err(Error::InvalidConfig("note off velocity must be 0-127"));
        }
        Ok(())
    }
}
