use std::{error::Error, fmt};

use crate::error::Diagnostic;

/// Error from a session operation that is not tied to any source line.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    NoProgram,
    TraceDisabled,
    /// `step_back` at the oldest snapshot.
    TraceExhausted,
    InvalidWatchWidth {
        width: u8,
    },
    WatchOutOfBounds {
        address: u16,
        width: u8,
    },
    /// A command handler panicked. Session state may be partially updated.
    Panicked {
        message: String,
    },
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoProgram => "session::no_program",
            Self::TraceDisabled | Self::TraceExhausted => "session::trace",
            Self::InvalidWatchWidth { .. } | Self::WatchOutOfBounds { .. } => "session::watchpoint",
            Self::Panicked { .. } => "session::panic",
        }
    }
}

impl Error for SessionError {}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProgram => write!(f, "No program has been assembled"),
            Self::TraceDisabled => write!(f, "Trace recording is disabled"),
            Self::TraceExhausted => write!(f, "No earlier snapshot to step back to"),
            Self::InvalidWatchWidth { width } => write!(
                f,
                "Invalid watchpoint width {} (expected 1, 2 or 4 bytes)",
                width
            ),
            Self::WatchOutOfBounds { address, width } => write!(
                f,
                "Watchpoint of {} bytes at 0x{:04x} runs past the end of memory",
                width, address
            ),
            Self::Panicked { message } => write!(f, "Engine panicked: {}", message),
        }
    }
}

impl From<SessionError> for Diagnostic {
    fn from(error: SessionError) -> Self {
        Diagnostic::detached(error.code(), error.to_string())
    }
}
