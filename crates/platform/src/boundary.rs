//! Caller-facing typed error hierarchy.
//!
//! The session layer itself reports raw [`HawserError`] values with boundary
//! codes. Higher layers (CLIs, orchestration tools, logging) consume this
//! translated hierarchy instead, so they can match on error categories
//! without knowing boundary codes.
//!
//! `Incomplete` deliberately has no representation here: it is a retry
//! signal, not a failure. A caller that converts it anyway has broken the
//! non-blocking contract, and the conversion reports that misuse as a
//! [`SshError::Resource`] value.

use crate::error::{code, ErrorKind, HawserError};
use thiserror::Error;

/// Typed errors exposed to layers above the session core.
#[derive(Debug, Error)]
pub enum SshError {
    /// The peer violated the SSH protocol, or negotiation failed.
    #[error("protocol error (code {code}): {message}")]
    Protocol {
        /// Raw boundary status code.
        code: i32,
        /// Description of the violation.
        message: String,
    },

    /// The underlying connection failed or was lost.
    #[error("connection error (code {code}): {message}")]
    Connection {
        /// Raw boundary status code.
        code: i32,
        /// Description of the failure.
        message: String,
    },

    /// The server rejected the offered credentials.
    #[error("authentication error (code {code}): {message}")]
    Authentication {
        /// Raw boundary status code.
        code: i32,
        /// Description of the rejection.
        message: String,
    },

    /// A remotely executed command terminated with a non-zero exit status.
    #[error("command exited with status {exit_code}")]
    Command {
        /// Exit status reported by the remote process.
        exit_code: i32,
        /// Captured output of the command, if the caller collected it.
        output: Vec<u8>,
    },

    /// A handle was used after being freed, or in an invalid state.
    #[error("resource error (code {code}): {message}")]
    Resource {
        /// Raw boundary status code.
        code: i32,
        /// Description of the misuse.
        message: String,
    },
}

impl SshError {
    /// Builds a [`SshError::Command`] from a remote exit status and output.
    pub fn command(exit_code: i32, output: impl Into<Vec<u8>>) -> Self {
        SshError::Command {
            exit_code,
            output: output.into(),
        }
    }
}

impl From<HawserError> for SshError {
    /// Translates a raw session-layer error into the caller-facing hierarchy.
    ///
    /// The `Incomplete` retry signal is caller misuse at this boundary and
    /// maps to a [`SshError::Resource`] describing the contract violation.
    fn from(err: HawserError) -> Self {
        let raw = err.code();
        let message = err.message().to_string();
        match err.kind() {
            ErrorKind::Incomplete => SshError::Resource {
                code: code::BAD_USE,
                message: "Incomplete is a retry signal, not an error; retry the operation"
                    .to_string(),
            },
            ErrorKind::Protocol => SshError::Protocol { code: raw, message },
            ErrorKind::Transport => SshError::Connection { code: raw, message },
            ErrorKind::Auth => SshError::Authentication { code: raw, message },
            ErrorKind::Resource => SshError::Resource { code: raw, message },
        }
    }
}
