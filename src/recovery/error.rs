//! Errors raised by the recovery engine outside of journal parsing.

use core::fmt;
use std::io;

use super::session::PeerId;
use crate::protocol;

/// Failure reported by the session registry or the watchdog runner.
#[derive(Debug)]
pub enum RecoveryError {
    /// Operation addressed a peer that is not connected.
    UnknownPeer(PeerId),
    /// Channel number outside 0..16.
    InvalidChannel(u8),
    /// Configuration rejected by validation.
    Config(protocol::Error),
    /// Watchdog thread could not be started.
    Spawn(io::Error),
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPeer(peer) => write!(f, "unknown peer {peer}"),
            Self::InvalidChannel(channel) => write!(f, "invalid MIDI channel {channel}"),
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Spawn(err) => write!(f, "failed to start watchdog thread: {err}"),
        }
    }
}

impl std::error::Error for RecoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Spawn(err) => Some(err),
            Self::UnknownPeer(_) | Self::InvalidChannel(_) => None,
        }
    }
}

impl From<io::Error> for RecoveryError {
    fn from(err: io::Error) -> Self {
        Self::Spawn(err)
    }
}
