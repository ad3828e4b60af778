//! Child process sessions attached to a pseudo-terminal.
//!
//! The monitor talks to sessions only through the [`Session`] and
//! [`SessionSpawner`] traits, so the same loop drives the real pty
//! ([`PtySpawner`]) and scripted sessions in tests ([`mock`]).
//!
//! ```text
//!   Monitor ──spawn──► SessionSpawner ──► Session
//!      ▲                                    │
//!      └──── ReadOutcome (Data/Timeout/Eof) ┘
//! ```

pub mod mock;
mod pty;

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

pub use pty::{PtySession, PtySpawner};

/// Result of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes available on the terminal.
    Data(Vec<u8>),
    /// Nothing arrived within the bound; re-poll and re-check liveness.
    Timeout,
    /// The child closed its side of the terminal.
    Eof,
}

/// Error type for session failures.
#[derive(Debug)]
pub enum SessionError {
    /// The executable could not be launched.
    Spawn { program: String, source: io::Error },
    /// Pseudo-terminal allocation or setup failed.
    Pty(io::Error),
    /// Descriptor-level failure while the session was running.
    Io(io::Error),
}

impl SessionError {
    /// Errors that will recur on every attempt and must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Spawn { .. } | SessionError::Pty(_))
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Spawn { program, source } => {
                write!(f, "failed to launch '{}': {}", program, source)
            }
            SessionError::Pty(e) => write!(f, "pseudo-terminal error: {}", e),
            SessionError::Io(e) => write!(f, "session I/O error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Spawn { source, .. } => Some(source),
            SessionError::Pty(e) | SessionError::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e)
    }
}

/// A running child whose output is read through a terminal.
///
/// Implementations release the terminal and reap the child in
/// [`close`](Session::close) and again on drop if `close` was skipped.
pub trait Session {
    /// Waits at most `timeout` for output.
    fn read_available(&mut self, timeout: Duration) -> Result<ReadOutcome, SessionError>;

    /// Whether the child is still running.
    fn is_alive(&mut self) -> bool;

    /// Terminates the child if needed, reaps it and closes the terminal.
    /// Calling it again is a no-op returning the same status.
    fn close(&mut self) -> Result<Option<ExitStatus>, SessionError>;

    /// Child process id.
    fn pid(&self) -> u32;
}

/// Launches sessions for the monitor.
pub trait SessionSpawner {
    type Session: Session;

    fn spawn(&mut self, program: &str, args: &[String]) -> Result<Self::Session, SessionError>;
}
