//! Capture session lifecycle state machine.
//!
//! Transitions are validated and return `Result` instead of panicking.

use std::time::{Duration, Instant};

use crate::error::CamlinkError;
use crate::session::CaptureMode;

// ── CaptureSessionState ──────────────────────────────────────────

/// Lifecycle of one device's capture session.
///
/// ```text
///  Closed ──► Opening ──► Configuring ──► Streaming | Recording
///    ▲  ▲        │             │                   │
///    │  │        ▼             ▼                   ▼
///    │  └──── Closing ◄────────┴───────────────────┘
///    │
///  Failed (burst cycle aborted; reopenable)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureSessionState {
    /// No device held. Initial and terminal state.
    #[default]
    Closed,

    /// Open requested; waiting for the device's opened event.
    Opening,

    /// Device open; waiting for the session configured event.
    Configuring,

    /// Repeating capture (or a single burst capture) is active.
    Streaming { since: Instant },

    /// A clip recording is active.
    Recording { since: Instant },

    /// Teardown in progress.
    Closing,

    /// The last burst cycle failed.
    Failed,
}

impl std::fmt::Display for CaptureSessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Opening => write!(f, "Opening"),
            Self::Configuring => write!(f, "Configuring"),
            Self::Streaming { .. } => write!(f, "Streaming"),
            Self::Recording { .. } => write!(f, "Recording"),
            Self::Closing => write!(f, "Closing"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl CaptureSessionState {
    /// Capture requests are flowing.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Streaming { .. } | Self::Recording { .. })
    }

    /// No device is held.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// How long the session has been active, `None` otherwise.
    pub fn active_duration(&self) -> Option<Duration> {
        match self {
            Self::Streaming { since } | Self::Recording { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    fn invalid(&self, action: &'static str) -> CamlinkError {
        CamlinkError::InvalidTransition {
            from: *self,
            action,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Closed`, `Failed`.
    pub fn begin_open(&mut self) -> Result<(), CamlinkError> {
        match self {
            Self::Closed | Self::Failed => {
                *self = Self::Opening;
                Ok(())
            }
            _ => Err(self.invalid("open")),
        }
    }

    /// Valid from: `Opening`.
    pub fn opened(&mut self) -> Result<(), CamlinkError> {
        match self {
            Self::Opening => {
                *self = Self::Configuring;
                Ok(())
            }
            _ => Err(self.invalid("finish opening")),
        }
    }

    /// Enter `Streaming` or `Recording` depending on `mode`.
    ///
    /// Valid from: `Configuring`.
    pub fn configured(&mut self, mode: CaptureMode) -> Result<(), CamlinkError> {
        match self {
            Self::Configuring => {
                let since = Instant::now();
                *self = match mode {
                    CaptureMode::Clip => Self::Recording { since },
                    CaptureMode::Stream | CaptureMode::Photo => Self::Streaming { since },
                };
                Ok(())
            }
            _ => Err(self.invalid("start capture")),
        }
    }

    /// Valid from: `Opening`, `Configuring`, `Streaming`, `Recording`.
    pub fn begin_close(&mut self) -> Result<(), CamlinkError> {
        match self {
            Self::Opening | Self::Configuring | Self::Streaming { .. } | Self::Recording { .. } => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(self.invalid("close")),
        }
    }

    /// Valid from: `Closing`.
    pub fn finish_close(&mut self) -> Result<(), CamlinkError> {
        match self {
            Self::Closing => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(self.invalid("finish closing")),
        }
    }

    /// Force into `Failed` regardless of current state.
    pub fn mark_failed(&mut self) {
        *self = Self::Failed;
    }

    /// Force into `Closed` regardless of current state.
    pub fn force_close(&mut self) {
        *self = Self::Closed;
    }
}
