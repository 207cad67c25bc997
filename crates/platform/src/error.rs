//! Error types for Hawser.
//!
//! Every fallible operation in the session layer returns a [`HawserError`]
//! carrying an error class ([`ErrorKind`]), the raw status code reported at
//! the protocol-library boundary, and a human-readable message. Callers can
//! distinguish all classes without string inspection.
//!
//! [`ErrorKind::Incomplete`] is not a failure: it is the retry signal of the
//! non-blocking contract. The library never consumes it internally; it is
//! returned verbatim and the caller re-invokes the operation once the
//! underlying transport is ready.

use std::fmt;

/// Raw status codes reported at the protocol-library boundary.
///
/// Negative values are errors; [`code::EAGAIN`] is the would-block /
/// partial-progress signal and is never translated into anything else.
pub mod code {
    /// Operation completed.
    pub const OK: i32 = 0;
    /// Operation would block; retry after transport readiness.
    pub const EAGAIN: i32 = -37;
    /// Failed writing to the socket.
    pub const SOCKET_SEND: i32 = -7;
    /// Failed reading from the socket.
    pub const SOCKET_RECV: i32 = -43;
    /// Blocking transport call timed out.
    pub const SOCKET_TIMEOUT: i32 = -30;
    /// Peer closed the connection.
    pub const SOCKET_DISCONNECT: i32 = -13;
    /// Malformed or unexpected peer message.
    pub const PROTO: i32 = -14;
    /// Key exchange failed during the handshake.
    pub const KEX_FAILURE: i32 = -8;
    /// Host key could not be obtained or verified.
    pub const HOSTKEY: i32 = -10;
    /// Credential rejected by the server.
    pub const AUTH_FAILED: i32 = -18;
    /// Public key was not accepted for authentication.
    pub const PUBLICKEY_UNVERIFIED: i32 = -19;
    /// Authentication partially succeeded; further methods required.
    pub const AUTH_PARTIAL: i32 = -20;
    /// SSH agent connection or wire protocol failure.
    pub const AGENT_PROTOCOL: i32 = -42;
    /// Invalid handle, use after free, or call in the wrong state.
    pub const BAD_USE: i32 = -39;
    /// Operation on a closed channel.
    pub const CHANNEL_CLOSED: i32 = -26;
    /// Peer denied a channel request.
    pub const CHANNEL_REQUEST_DENIED: i32 = -32;
    /// Send window exhausted.
    pub const CHANNEL_WINDOW_FULL: i32 = -24;
    /// Remote forwarding request failed.
    pub const LISTEN_FAILED: i32 = -27;
    /// SFTP subsystem protocol violation.
    pub const SFTP_PROTOCOL: i32 = -31;
}

/// Error class.
///
/// The propagation policy is tied to the class: `Transport` and `Protocol`
/// errors invalidate the session, `Auth` errors are local to the attempt,
/// `Resource` errors are local to the call, and `Incomplete` is the
/// non-blocking retry signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not a failure: the operation made no (or partial) progress and must
    /// be reissued once the transport is ready.
    Incomplete,
    /// Socket/IO failure. Fatal to the session.
    Transport,
    /// Malformed or unexpected peer message. Fatal to the session.
    Protocol,
    /// Credential rejected. The session remains usable for further attempts.
    Auth,
    /// Invalid handle, use after free, or wrong-state call. Local to the call.
    Resource,
}

/// Classifies a raw boundary code into an [`ErrorKind`].
///
/// Unknown negative codes classify as `Protocol`: an unrecognized failure
/// from the peer side must invalidate the session rather than be retried.
pub fn kind_of(raw: i32) -> ErrorKind {
    match raw {
        code::EAGAIN | code::CHANNEL_WINDOW_FULL => ErrorKind::Incomplete,
        code::SOCKET_SEND | code::SOCKET_RECV | code::SOCKET_TIMEOUT | code::SOCKET_DISCONNECT => {
            ErrorKind::Transport
        }
        code::AUTH_FAILED | code::PUBLICKEY_UNVERIFIED | code::AUTH_PARTIAL
        | code::AGENT_PROTOCOL => ErrorKind::Auth,
        code::BAD_USE | code::CHANNEL_CLOSED | code::CHANNEL_REQUEST_DENIED => {
            ErrorKind::Resource
        }
        _ => ErrorKind::Protocol,
    }
}

/// Unified error type for all Hawser operations.
#[derive(Debug, Clone)]
pub struct HawserError {
    kind: ErrorKind,
    code: i32,
    message: String,
}

impl HawserError {
    /// Creates an error with an explicit class, raw code and message.
    pub fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    /// Creates an error from a raw boundary code, classifying it.
    pub fn from_code(code: i32, message: impl Into<String>) -> Self {
        Self::new(kind_of(code), code, message)
    }

    /// The would-block retry signal.
    pub fn incomplete() -> Self {
        Self::new(
            ErrorKind::Incomplete,
            code::EAGAIN,
            "operation incomplete, retry",
        )
    }

    /// A transport failure.
    pub fn transport(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, code, message)
    }

    /// A protocol violation.
    pub fn protocol(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, code, message)
    }

    /// An authentication failure.
    pub fn auth(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, code, message)
    }

    /// A misuse error: invalid handle, use after free, wrong state.
    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, code::BAD_USE, message)
    }

    /// Returns the error class.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the raw boundary status code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this is the retry signal rather than a failure.
    pub fn is_incomplete(&self) -> bool {
        self.kind == ErrorKind::Incomplete
    }

    /// Returns true if this error invalidates the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport | ErrorKind::Protocol)
    }
}

impl fmt::Display for HawserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Incomplete => write!(f, "incomplete ({}): {}", self.code, self.message),
            ErrorKind::Transport => write!(f, "transport error ({}): {}", self.code, self.message),
            ErrorKind::Protocol => write!(f, "protocol error ({}): {}", self.code, self.message),
            ErrorKind::Auth => {
                write!(f, "authentication error ({}): {}", self.code, self.message)
            }
            ErrorKind::Resource => write!(f, "resource error ({}): {}", self.code, self.message),
        }
    }
}

impl std::error::Error for HawserError {}

impl From<std::io::Error> for HawserError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock => Self::incomplete(),
            std::io::ErrorKind::TimedOut => Self::transport(code::SOCKET_TIMEOUT, err.to_string()),
            _ => Self::transport(code::SOCKET_RECV, err.to_string()),
        }
    }
}

/// Result type for Hawser operations.
pub type HawserResult<T> = Result<T, HawserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_is_not_fatal() {
        let err = HawserError::incomplete();
        assert!(err.is_incomplete());
        assert!(!err.is_fatal());
        assert_eq!(err.code(), code::EAGAIN);
    }

    #[test]
    fn test_code_classification() {
        assert_eq!(kind_of(code::EAGAIN), ErrorKind::Incomplete);
        assert_eq!(kind_of(code::SOCKET_DISCONNECT), ErrorKind::Transport);
        assert_eq!(kind_of(code::AUTH_FAILED), ErrorKind::Auth);
        assert_eq!(kind_of(code::BAD_USE), ErrorKind::Resource);
        assert_eq!(kind_of(code::PROTO), ErrorKind::Protocol);
        // Unknown negative codes are treated as protocol violations.
        assert_eq!(kind_of(-999), ErrorKind::Protocol);
    }

    #[test]
    fn test_fatal_classes() {
        assert!(HawserError::transport(code::SOCKET_RECV, "recv").is_fatal());
        assert!(HawserError::protocol(code::PROTO, "bad packet").is_fatal());
        assert!(!HawserError::auth(code::AUTH_FAILED, "rejected").is_fatal());
        assert!(!HawserError::resource("freed").is_fatal());
    }

    #[test]
    fn test_would_block_io_maps_to_incomplete() {
        let io_err = std::io::Error::new(std::io::ErrorKind::WouldBlock, "would block");
        let err: HawserError = io_err.into();
        assert!(err.is_incomplete());
    }

    #[test]
    fn test_display_carries_code() {
        let err = HawserError::auth(code::AUTH_FAILED, "password rejected");
        assert_eq!(
            err.to_string(),
            "authentication error (-18): password rejected"
        );
    }
}
