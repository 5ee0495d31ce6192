use thiserror::Error;

/// Failures reported by collaborator implementations (sources, decoders,
/// sinks).
///
/// The playback core classifies these to decide between retrying, marking a
/// stream finished, or surfacing an error message to the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("End of stream")]
    EndOfStream,

    #[error("Operation timed out: {0}")]
    TimedOut(String),

    #[error("Operation interrupted")]
    Interrupted,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Access forbidden: {0}")]
    Forbidden(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl BridgeError {
    /// `true` for failures a retry or reconnect may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::TimedOut(_) | BridgeError::Io(_) | BridgeError::InvalidData(_)
        )
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                BridgeError::TimedOut(err.to_string())
            }
            std::io::ErrorKind::Interrupted => BridgeError::Interrupted,
            std::io::ErrorKind::UnexpectedEof => BridgeError::EndOfStream,
            std::io::ErrorKind::PermissionDenied => BridgeError::Forbidden(err.to_string()),
            std::io::ErrorKind::InvalidData => BridgeError::InvalidData(err.to_string()),
            std::io::ErrorKind::OutOfMemory => BridgeError::OutOfMemory,
            _ => BridgeError::Io(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "socket");
        assert!(matches!(BridgeError::from(timeout), BridgeError::TimedOut(_)));

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(BridgeError::from(eof), BridgeError::EndOfStream);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "403");
        assert!(matches!(BridgeError::from(denied), BridgeError::Forbidden(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(BridgeError::TimedOut("read".into()).is_transient());
        assert!(BridgeError::Io("reset".into()).is_transient());
        assert!(!BridgeError::EndOfStream.is_transient());
        assert!(!BridgeError::Unsupported("codec".into()).is_transient());
    }
}
