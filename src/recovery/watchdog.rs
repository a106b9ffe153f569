//! Timeout-based backstop for notes and pitch wheels the journal never cleared.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::channel::PeerChannels;
use super::emitter::{MidiSink, RecoveryEmitter};
use super::error::RecoveryError;
use super::metrics::Metrics;
use super::session::SessionRegistry;
use crate::protocol::{PITCH_WHEEL_CENTER, RecoveryAction};

/// Corrections issued by one watchdog pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSweep {
    /// Notes forced off.
    pub note_offs: usize,
    /// Pitch wheels returned to centre.
    pub pitch_resets: usize,
}

impl WatchdogSweep {
    /// Total corrections.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.note_offs + self.pitch_resets
    }

    pub(crate) fn merge(&mut self, other: Self) {
        self.note_offs += other.note_offs;
        self.pitch_resets += other.pitch_resets;
    }
}

/// Clears state that has been "on" for longer than the note timeout.
#[derive(Debug, Clone, Copy)]
pub struct StuckStateWatchdog {
    note_timeout: Duration,
}

impl StuckStateWatchdog {
    /// Create a watchdog with the given timeout.
    #[must_use]
    pub const fn new(note_timeout: Duration) -> Self {
        Self { note_timeout }
    }

    /// Configured timeout.
    #[must_use]
    pub const fn note_timeout(&self) -> Duration {
        self.note_timeout
    }

    fn expired(&self, since: Instant, now: Instant) -> bool {
        now.saturating_duration_since(since) > self.note_timeout
    }

    /// Scan all sixteen channels of one peer and emit corrections to `sink`.
    pub fn scan<S: MidiSink + ?Sized>(
        &self,
        channels: &mut PeerChannels,
        now: Instant,
        emitter: &mut RecoveryEmitter,
        sink: &mut S,
    ) -> WatchdogSweep {
        let mut sweep = WatchdogSweep::default();

        for (channel, state) in channels.iter_mut() {
            if let Some(since) = state.pitch_wheel_since() {
                if self.expired(since, now) {
                    debug!(channel, value = state.pitch_wheel(), "pitch wheel held past timeout - resetting");
                    state.reset_pitch_wheel();
                    emitter.push(
                        RecoveryAction::PitchWheelReset {
                            channel,
                            value: PITCH_WHEEL_CENTER,
                        },
                        sink,
                    );
                    sweep.pitch_resets += 1;
                }
            }

            for note in 0..=127u8 {
                let Some(since) = state.note_on_since(note) else {
                    continue;
                };
                if self.expired(since, now) {
                    debug!(channel, note, "note held past timeout - sending NoteOff");
                    state.note_off(note);
                    emitter.push(RecoveryAction::NoteOff { channel, note }, sink);
                    sweep.note_offs += 1;
                }
            }
        }

        emitter.drain(sink);
        Metrics::record_watchdog(sweep.note_offs, sweep.pitch_resets);
        sweep
    }
}

/// Owns the background watchdog thread; stops it when dropped.
#[derive(Debug)]
pub struct WatchdogHandle {
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    /// Stop the watchdog and wait for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // receiver gone means the thread already exited
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("watchdog thread panicked");
            }
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// Runs [`SessionRegistry::tick`] on a dedicated thread.
#[derive(Debug)]
pub struct WatchdogRunner;

impl WatchdogRunner {
    /// Start ticking `registry` every configured watchdog period.
    ///
    /// The sink lock is taken before any peer lock on each tick.
    pub fn spawn<S>(
        registry: Arc<SessionRegistry>,
        sink: Arc<Mutex<S>>,
    ) -> Result<WatchdogHandle, RecoveryError>
    where
        S: MidiSink + Send + 'static,
    {
        let period = registry.config().watchdog_period;
        let (shutdown, stop) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("rtpmidi-watchdog".into())
            .spawn(move || {
                debug!(?period, "watchdog started");
                loop {
                    match stop.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
                            registry.tick(Instant::now(), &mut *sink);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("watchdog stopped");
            })?;

        Ok(WatchdogHandle {
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MidiCommand;
    use crate::recovery::SinkEvent;

    fn watchdog() -> StuckStateWatchdog {
        StuckStateWatchdog::new(Duration::from_secs(5))
    }

    #[test]
    fn stuck_note_is_released_once() {
        let start = Instant::now();
        let mut channels = PeerChannels::new();
        channels.get_mut(2).unwrap().note_on(60, start);
        let mut emitter = RecoveryEmitter::new(8, 64);
        let mut sink: Vec<SinkEvent> = Vec::new();

        let later = start + Duration::from_secs(6);
        let sweep = watchdog().scan(&mut channels, later, &mut emitter, &mut sink);
        assert_eq!(sweep.note_offs, 1);
        assert_eq!(
            sink,
            vec![
                SinkEvent::Command(MidiCommand::NoteOff {
                    channel: 2,
                    note: 60,
                    velocity: 64
                }),
                SinkEvent::Flush
            ]
        );
        assert!(channels.get(2).unwrap().note_on_since(60).is_none());

        let again = watchdog().scan(&mut channels, later, &mut emitter, &mut sink);
        assert_eq!(again.total(), 0);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn fresh_notes_survive() {
        let start = Instant::now();
        let mut channels = PeerChannels::new();
        channels.get_mut(0).unwrap().note_on(10, start);
        let mut emitter = RecoveryEmitter::new(8, 64);
        let mut sink: Vec<SinkEvent> = Vec::new();

        // exactly the timeout is not yet expired
        let at_timeout = start + Duration::from_secs(5);
        let sweep = watchdog().scan(&mut channels, at_timeout, &mut emitter, &mut sink);
        assert_eq!(sweep.total(), 0);
        assert!(sink.is_empty());
        assert_eq!(channels.held_note_count(), 1);
    }

    #[test]
    fn bent_pitch_wheel_returns_to_centre() {
        let start = Instant::now();
        let mut channels = PeerChannels::new();
        channels.get_mut(7).unwrap().set_pitch_wheel(0x3fff, start);
        let mut emitter = RecoveryEmitter::new(8, 64);
        let mut sink: Vec<SinkEvent> = Vec::new();

        let sweep = watchdog().scan(
            &mut channels,
            start + Duration::from_secs(10),
            &mut emitter,
            &mut sink,
        );
        assert_eq!(sweep.pitch_resets, 1);
        assert!(sink.contains(&SinkEvent::Command(MidiCommand::PitchBend {
            channel: 7,
            value: PITCH_WHEEL_CENTER
        })));
        let state = channels.get(7).unwrap();
        assert_eq!(state.pitch_wheel(), PITCH_WHEEL_CENTER);
        assert!(state.pitch_wheel_since().is_none());
    }

    #[test]
    fn clock_behind_timestamps_expires_nothing() {
        let start = Instant::now() + Duration::from_secs(60);
        let mut channels = PeerChannels::new();
        channels.get_mut(1).unwrap().note_on(1, start);
        let mut emitter = RecoveryEmitter::new(8, 64);
        let mut sink: Vec<SinkEvent> = Vec::new();

        let sweep = watchdog().scan(&mut channels, Instant::now(), &mut emitter, &mut sink);
        assert_eq!(sweep.total(), 0);
    }
}
