//! # Playback Error Types
//!
//! Error types for the playback pipeline and its control API.
//!
//! Errors raised on background threads never cross the thread boundary as
//! values; they are reported through [`PlayerMessage`](crate::PlayerMessage)s
//! carrying [`PlaybackError::code`].

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// Opening the source failed after all retries.
    #[error("Failed to connect to source: {0}")]
    ConnectFailed(String),

    /// The server refused access to the source.
    #[error("Access to source forbidden: {0}")]
    Forbidden(String),

    /// Repeated read failures exhausted the reconnect budget.
    #[error("Network disconnected")]
    NetworkDisconnected,

    /// A blocking source operation timed out.
    #[error("Source operation timed out: {0}")]
    TimedOut(String),

    /// Reading from the source failed.
    #[error("Source error: {0}")]
    SourceError(String),

    /// End of stream reached.
    #[error("End of stream")]
    EndOfStream,

    // ========================================================================
    // Format/Codec Errors
    // ========================================================================
    /// No decodable audio or video stream was found.
    #[error("Unsupported or invalid media format: {0}")]
    UnsupportedFormat(String),

    /// No registered decoder can handle the stream.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    // ========================================================================
    // Decoding Errors
    // ========================================================================
    /// Decoder reported a failure.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    // ========================================================================
    // Playback Control Errors
    // ========================================================================
    /// Control call issued without a live session.
    #[error("No active playback session")]
    NoSession,

    /// Stream index does not exist or is not audio/video.
    #[error("Invalid stream index: {0}")]
    InvalidStreamIndex(usize),

    /// Argument outside its allowed range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the current player state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Every prepared source slot is occupied.
    #[error("No free prepared source slot")]
    PreparedSlotsFull,

    /// The prepared source slot is empty, playing, or otherwise unusable.
    #[error("Prepared source slot {0} unavailable")]
    PreparedSlotUnavailable(usize),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// Allocation failed.
    #[error("Out of memory")]
    OutOfMemory,

    /// A worker thread could not be started.
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Runtime bootstrap error from core-runtime.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::TimedOut(_)
                | PlaybackError::SourceError(_)
                | PlaybackError::NetworkDisconnected
        )
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::ConnectFailed(_)
                | PlaybackError::NetworkDisconnected
                | PlaybackError::TimedOut(_)
                | PlaybackError::Forbidden(_)
        )
    }

    /// Returns `true` if this error is related to media format/codec issues.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::UnsupportedFormat(_) | PlaybackError::UnsupportedCodec(_)
        )
    }

    /// Stable negative code carried by error messages.
    pub fn code(&self) -> i32 {
        match self {
            PlaybackError::OutOfMemory | PlaybackError::ThreadSpawn(_) => -2,
            PlaybackError::NoSession => -3,
            PlaybackError::InvalidStreamIndex(_) | PlaybackError::InvalidArgument(_) => -4,
            PlaybackError::InvalidState(_) => -5,
            PlaybackError::UnsupportedFormat(_) | PlaybackError::UnsupportedCodec(_) => -6,
            PlaybackError::ConnectFailed(_) => -7,
            PlaybackError::NetworkDisconnected => -8,
            PlaybackError::TimedOut(_) => -9,
            PlaybackError::PreparedSlotsFull | PlaybackError::PreparedSlotUnavailable(_) => -10,
            PlaybackError::Forbidden(_) => -403,
            PlaybackError::SourceError(_)
            | PlaybackError::EndOfStream
            | PlaybackError::DecodingError(_)
            | PlaybackError::Runtime(_)
            | PlaybackError::Internal(_) => -1,
        }
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::EndOfStream => PlaybackError::EndOfStream,
            BridgeError::TimedOut(msg) => PlaybackError::TimedOut(msg),
            BridgeError::Forbidden(msg) => PlaybackError::Forbidden(msg),
            BridgeError::Unsupported(msg) => PlaybackError::UnsupportedFormat(msg),
            BridgeError::OutOfMemory => PlaybackError::OutOfMemory,
            BridgeError::Interrupted => PlaybackError::SourceError("interrupted".to_string()),
            other => PlaybackError::SourceError(other.to_string()),
        }
    }
}

impl From<core_runtime::Error> for PlaybackError {
    fn from(err: core_runtime::Error) -> Self {
        PlaybackError::Runtime(err.to_string())
    }
}

impl From<std::io::Error> for PlaybackError {
    fn from(err: std::io::Error) -> Self {
        PlaybackError::ThreadSpawn(err.to_string())
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
