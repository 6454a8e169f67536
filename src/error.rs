//! Error types for the device link.
//! Decode problems are not errors here; see [`crate::core::codec::DecodeAnomaly`].

use thiserror::Error;

/// Failure of a single connect attempt. Never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("device '{device}' does not advertise {required} support")]
    CapabilityMismatch { device: String, required: &'static str },

    #[error("permission denied by platform: {0}")]
    PermissionDenied(String),

    #[error("connect timed out after {0} seconds")]
    Timeout(u64),

    #[error("a link is already connecting or connected")]
    AlreadyActive,

    #[error("connect aborted by disconnect")]
    Aborted,
}

impl ConnectError {
    /// Whether a caller may reasonably invoke `connect` again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_) | Self::Aborted)
    }
}

/// Transport I/O failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IoError {
    #[error("transport operation timed out")]
    Timeout,

    #[error("remote side closed the connection")]
    Closed,

    #[error("transport is not connected")]
    NotConnected,

    #[error("i/o failure: {0}")]
    Io(String),
}

impl IoError {
    /// Transient errors count toward the consecutive-error budget; the rest end the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Io(_))
    }
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::Closed,
            std::io::ErrorKind::NotConnected => Self::NotConnected,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Errors returned by the inbound control operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("no device connected")]
    NotConnected,

    #[error("a monitoring session is already active")]
    SessionActive,

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Io(#[from] IoError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as StdIoError, ErrorKind};

    #[test]
    fn test_io_error_from_std() {
        assert_eq!(IoError::from(StdIoError::new(ErrorKind::TimedOut, "t")), IoError::Timeout);
        assert_eq!(IoError::from(StdIoError::new(ErrorKind::BrokenPipe, "p")), IoError::Closed);
        assert!(matches!(
            IoError::from(StdIoError::new(ErrorKind::Other, "boom")),
            IoError::Io(msg) if msg.contains("boom")
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(IoError::Timeout.is_transient());
        assert!(IoError::Io("x".into()).is_transient());
        assert!(!IoError::Closed.is_transient());
        assert!(!IoError::NotConnected.is_transient());
    }

    #[test]
    fn test_connect_error_display() {
        let err = ConnectError::CapabilityMismatch {
            device: "OldBTHeadset".into(),
            required: "attribute-streaming",
        };
        assert_eq!(
            err.to_string(),
            "device 'OldBTHeadset' does not advertise attribute-streaming support"
        );
        assert!(!ConnectError::AlreadyActive.is_retryable());
        assert!(ConnectError::Timeout(12).is_retryable());
    }

    #[test]
    fn test_link_error_wraps() {
        let err: LinkError = IoError::Closed.into();
        assert_eq!(err, LinkError::Io(IoError::Closed));
        let err: LinkError = ConnectError::AlreadyActive.into();
        assert_eq!(err.to_string(), "a link is already connecting or connected");
    }
}
