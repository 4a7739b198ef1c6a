use crate::device::Facing;
use crate::error::ErrorClass;

/// Who started the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartOrigin {
    /// An explicit start request.
    Operator,
    /// The service restarted itself after a terminal failure.
    AutoRestart,
}

impl std::fmt::Display for StartOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operator => write!(f, "operator"),
            Self::AutoRestart => write!(f, "auto-restart"),
        }
    }
}

/// Notifications for whoever owns the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A device started capturing.
    StreamStarted { facing: Facing, origin: StartOrigin },
    /// A device stream ended (shutdown, fatal error or exhaustion).
    StreamStopped { facing: Facing },
    /// Retries ran out. Sent exactly once per exhausted episode.
    TerminalFailure { facing: Facing, attempts: u32 },
    /// A non-retryable error stopped the device.
    Fatal {
        facing: Facing,
        class: ErrorClass,
        error: String,
    },
    /// A burst capture was transferred and removed locally.
    ClipDelivered {
        facing: Facing,
        filename: String,
        bytes: u64,
    },
}

impl SupervisorEvent {
    pub fn facing(&self) -> Facing {
        match self {
            Self::StreamStarted { facing, .. }
            | Self::StreamStopped { facing }
            | Self::TerminalFailure { facing, .. }
            | Self::Fatal { facing, .. }
            | Self::ClipDelivered { facing, .. } => *facing,
        }
    }
}
