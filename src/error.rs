use thiserror::Error;

use crate::frame::MediaKind;

/// Main error type for the DASH segmenter
#[derive(Error, Debug)]
pub enum DashError {
    /// A frame of the wrong media kind was handed to a segmenter
    #[error("Wrong frame kind: expected {expected}, got {actual}")]
    WrongFrameKind {
        expected: MediaKind,
        actual: MediaKind,
    },

    /// No segmenter is registered for the given track
    #[error("Unknown track: {0}")]
    UnknownTrack(u32),

    /// A segmenter is already registered for the given track
    #[error("Track already exists: {0}")]
    TrackExists(u32),

    /// Timing or codec configuration cannot be derived yet
    #[error("Segmenter not ready: {0}")]
    NotReady(&'static str),

    /// Segment generation was attempted before configuration succeeded
    #[error("Segmenter used before its configuration was derived")]
    NotConfigured,

    /// The encoded payload could not be parsed
    #[error("Invalid bitstream: {0}")]
    InvalidBitstream(String),

    /// Data does not fit into a fixed-capacity segment buffer
    #[error("Segment buffer overflow: {len} bytes exceeds capacity {capacity}")]
    BufferOverflow { len: usize, capacity: usize },

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A control-plane event was malformed or missing fields
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// An operation would break an orchestrator invariant
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The manifest collaborator failed
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// The dasher service task is gone
    #[error("Dasher service stopped")]
    ServiceStopped,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DashError {
    /// Errors that leave the segmenter usable on the next frame
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DashError::NotReady(_) | DashError::WrongFrameKind { .. } | DashError::Io(_)
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DashError>;
