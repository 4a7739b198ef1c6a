//! Domain-specific error types for the capture pipeline.
//!
//! All fallible operations return `Result<T, CamlinkError>`. Every error
//! also maps onto an [`ErrorClass`], which is what the supervisor actually
//! branches on: retry, escalate, or ignore.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::device::Facing;
use crate::session::CaptureSessionState;

/// The canonical error type for camlink.
#[derive(Debug, Error)]
pub enum CamlinkError {
    // ── Device Errors ────────────────────────────────────────────
    /// The process is not allowed to open the capture device.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    /// No capture device with the requested facing exists.
    #[error("no {0} capture device found")]
    NoDevice(Facing),

    /// The device exists but its characteristics (supported output sizes)
    /// could not be read.
    #[error("characteristics unavailable for {facing} device: {reason}")]
    Characteristics { facing: Facing, reason: String },

    /// The capture session could not be configured.
    #[error("capture session configuration failed: {0}")]
    Configuration(String),

    /// The device reported a hardware error.
    #[error("capture device error: {0}")]
    Device(String),

    /// The device went away during an established session.
    #[error("{0} device disconnected")]
    Disconnected(Facing),

    /// A capture request did not complete in time.
    #[error("capture did not complete within {0:?}")]
    CaptureTimeout(Duration),

    /// A session operation was requested from a state that does not allow it.
    #[error("invalid session transition: cannot {action} while {from}")]
    InvalidTransition {
        from: CaptureSessionState,
        action: &'static str,
    },

    // ── Lifecycle Guard ──────────────────────────────────────────
    /// The device lifecycle permit was not acquired before the deadline.
    #[error("device lifecycle guard not acquired within {0:?}")]
    GuardTimeout(Duration),

    // ── Transport Errors ─────────────────────────────────────────
    /// The configured collector address is unusable.
    #[error("invalid target address: {0}")]
    InvalidAddress(String),

    /// The TCP connect did not complete before the deadline.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The connection was already torn down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The bounded retry budget ran out.
    #[error("gave up after {attempts} connection attempts")]
    RetriesExhausted { attempts: u32 },

    // ── Wire Errors ──────────────────────────────────────────────
    /// A streaming frame exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A filename does not fit the 16-bit length prefix once encoded.
    #[error("filename too long for transfer header: {0} encoded bytes")]
    FilenameTooLong(usize),

    /// A transfer header could not be parsed.
    #[error("malformed transfer header: {0}")]
    MalformedHeader(&'static str),

    /// A sized transfer ended before its declared length.
    #[error("transfer truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    // ── Local Resources ──────────────────────────────────────────
    /// A local capture file could not be read, written or removed.
    #[error("file error at {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Decoding or encoding a frame image failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// An internal channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// The operation was abandoned because shutdown was requested.
    #[error("operation cancelled")]
    Cancelled,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── ErrorClass ───────────────────────────────────────────────────

/// How an error should be handled by whoever owns the failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Abort the affected stream and surface to the operator. Never retried.
    Fatal,
    /// Tear down and retry through the supervisor's bounded retry.
    Transient,
    /// The lifecycle permit could not be acquired; fatal for that operation.
    Contention,
    /// Log and continue.
    Ignorable,
}

impl CamlinkError {
    /// Classify this error for the supervisor.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::PermissionDenied(_)
            | Self::NoDevice(_)
            | Self::Characteristics { .. }
            | Self::Configuration(_)
            | Self::Device(_)
            | Self::InvalidTransition { .. }
            | Self::InvalidAddress(_)
            | Self::RetriesExhausted { .. }
            | Self::FrameTooLarge { .. }
            | Self::FilenameTooLong(_)
            | Self::MalformedHeader(_)
            | Self::Other(_) => ErrorClass::Fatal,

            Self::Disconnected(_)
            | Self::CaptureTimeout(_)
            | Self::ConnectTimeout { .. }
            | Self::Connection(_)
            | Self::ConnectionClosed
            | Self::Truncated { .. }
            | Self::File { .. }
            | Self::ChannelClosed => ErrorClass::Transient,

            Self::GuardTimeout(_) => ErrorClass::Contention,

            Self::Image(_) | Self::Cancelled => ErrorClass::Ignorable,
        }
    }

    /// Shorthand for `class() == ErrorClass::Transient`.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Wrap an I/O error that happened on a local file.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for CamlinkError {
    fn from(s: String) -> Self {
        CamlinkError::Other(s)
    }
}

impl From<&str> for CamlinkError {
    fn from(s: &str) -> Self {
        CamlinkError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CamlinkError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CamlinkError::ChannelClosed
    }
}
