//! Error types for pmapp-rpc.

use thiserror::Error;

use crate::protocol::{Operation, RemoteError, RemoteErrorKind, ServiceVersion};

const EPERM: i32 = 1;
const EIO: i32 = 5;
const ENOMEM: i32 = 12;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ENOSYS: i32 = 38;
const EOPNOTSUPP: i32 = 95;
const ENOTCONN: i32 = 107;
const ERESTARTSYS: i32 = 512;

/// Main error type for all power-management client operations.
#[derive(Debug, Error)]
pub enum PmappError {
    /// No negotiated version, or no connection to the peer could be opened.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A specific exchange failed or timed out.
    #[error("Transport failure on procedure {procedure}: {reason}")]
    TransportFailure { procedure: u32, reason: String },

    /// Encoding past the end of the transmit buffer.
    #[error("Buffer overflow: capacity {capacity}, used {used}, need {needed} more")]
    BufferOverflow {
        capacity: usize,
        used: usize,
        needed: usize,
    },

    /// Decoding past the end of the received payload.
    #[error("Buffer underrun: {available} bytes available, need {needed}")]
    BufferUnderrun { available: usize, needed: usize },

    /// Malformed caller input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Peer returned a non-zero status word.
    #[error("Remote rejected request: {0}")]
    Remote(#[from] RemoteError),

    /// Transaction buffer allocation failed.
    #[error("Out of memory allocating {0}-byte transaction buffer")]
    OutOfMemory(usize),

    /// Lock wait aborted by teardown. Retry.
    #[error("Interrupted while waiting for the transaction channel")]
    Interrupted,

    /// Operation has no procedure in the negotiated protocol version.
    #[error("{operation} is not available in protocol version {version}")]
    Unsupported {
        operation: Operation,
        version: ServiceVersion,
    },

    /// Regulator acquire/enable/disable failure.
    #[error("Regulator '{name}': {reason}")]
    Regulator { name: String, reason: String },

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl PmappError {
    /// Negative errno equivalent, for callers that speak kernel-style status codes.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Self::TransportUnavailable(_) => ENOTCONN,
            Self::TransportFailure { .. } => EIO,
            Self::BufferOverflow { .. } | Self::BufferUnderrun { .. } => EIO,
            Self::InvalidArgument(_) | Self::Config(_) => EINVAL,
            Self::Remote(remote) => match remote.kind {
                RemoteErrorKind::InvalidArgument => EINVAL,
                RemoteErrorKind::Io => EIO,
                RemoteErrorKind::NotImplemented => ENOSYS,
                RemoteErrorKind::PermissionDenied => EPERM,
            },
            Self::OutOfMemory(_) => ENOMEM,
            Self::Interrupted => ERESTARTSYS,
            Self::Unsupported { .. } => EOPNOTSUPP,
            Self::Regulator { .. } => ENODEV,
        };
        -code
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Interrupted | Self::TransportFailure { .. } | Self::TransportUnavailable(_)
        )
    }
}

/// Result type alias using PmappError.
pub type Result<T> = std::result::Result<T, PmappError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::translate;

    #[test]
    fn test_errno_for_remote_kinds() {
        let err: PmappError = translate(0x0001).unwrap_err().into();
        assert_eq!(err.errno(), -EINVAL);
        let err: PmappError = translate(0x0080).unwrap_err().into();
        assert_eq!(err.errno(), -EIO);
        let err: PmappError = translate(0x0100).unwrap_err().into();
        assert_eq!(err.errno(), -ENOSYS);
        let err: PmappError = translate(0x4000).unwrap_err().into();
        assert_eq!(err.errno(), -EPERM);
    }

    #[test]
    fn test_interrupted_is_restart() {
        assert_eq!(PmappError::Interrupted.errno(), -ERESTARTSYS);
        assert!(PmappError::Interrupted.is_retryable());
        assert!(!PmappError::InvalidArgument("x".into()).is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = PmappError::TransportFailure {
            procedure: 27,
            reason: "timed out".into(),
        };
        assert_eq!(
            err.to_string(),
            "Transport failure on procedure 27: timed out"
        );
    }
}
