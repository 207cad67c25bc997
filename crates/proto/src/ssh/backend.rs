//! The native protocol-library boundary.
//!
//! Every public operation in this crate corresponds to exactly one call into
//! an implementation of the [`Backend`] trait, which stands in for the
//! underlying SSH protocol engine (packet framing, key exchange, ciphers,
//! signing). The boundary speaks raw status codes: would-block is the
//! first-class [`code::EAGAIN`] value, never an exception, and the session
//! layer returns it verbatim as the Incomplete retry signal.
//!
//! Expressing the engine as a trait keeps the session state machine testable
//! with a scripted double instead of a live peer, and keeps this crate free
//! of cryptographic dependencies.
//!
//! # Partial progress
//!
//! A backend that returns [`code::EAGAIN`] must preserve its internal
//! progress (half-sent packets, pending exchanges) so that re-invoking the
//! same method resumes rather than restarts. The session layer relies on
//! this for its idempotent-on-retry contract.

use hawser_platform::{code, HawserError};
use std::path::Path;
use std::time::Duration;

/// Stream id of the primary (stdout) channel stream.
pub const STREAM_STDOUT: u32 = 0;

/// Stream id of the stderr extended-data stream.
pub const STREAM_STDERR: u32 = 1;

/// A raw failure reported by the backend.
#[derive(Debug, Clone)]
pub struct RawError {
    /// Raw boundary status code (see [`hawser_platform::code`]).
    pub code: i32,
    /// Engine-supplied message.
    pub message: String,
}

impl RawError {
    /// Creates a raw error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The would-block signal.
    pub fn eagain() -> Self {
        Self::new(code::EAGAIN, "would block")
    }
}

impl From<RawError> for HawserError {
    fn from(raw: RawError) -> Self {
        HawserError::from_code(raw.code, raw.message)
    }
}

/// Result type at the backend boundary.
pub type RawResult<T> = Result<T, RawError>;

/// Outcome of an authentication exchange that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The server accepted the credential; the session is authenticated.
    Complete,
    /// Partial success: the credential was accepted but the server requires
    /// further methods before granting access.
    Partial,
}

/// Backend-side identity of an open channel, with its negotiated limits.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    /// Backend channel id.
    pub id: u32,
    /// Initial send window granted by the peer, in bytes.
    pub send_window: u64,
    /// Initial receive window we granted the peer, in bytes.
    pub recv_window: u64,
    /// Maximum packet size negotiated for the channel.
    pub max_packet: u32,
}

/// Backend-side identity of a remote-forwarding listener.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    /// Backend listener id.
    pub id: u32,
    /// Port the server actually bound (relevant when 0 was requested).
    pub bound_port: u16,
}

/// Result of a channel read at the boundary.
#[derive(Debug, Clone)]
pub enum ReadResult {
    /// Data delivered on the requested stream. Never longer than the
    /// `max` passed to [`Backend::channel_read`].
    Data(Vec<u8>),
    /// The peer signaled end-of-stream.
    Eof,
}

/// How non-primary data streams (e.g. stderr) are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedDataMode {
    /// Keep extended streams independently readable by stream id.
    Normal,
    /// Discard extended data.
    Ignore,
    /// Merge extended data into the primary stream.
    Merge,
}

/// A channel request, one variant per RFC 4254 request type this layer
/// exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest<'a> {
    /// Execute a command ("exec").
    Exec {
        /// Command line to execute.
        command: &'a str,
    },
    /// Start the default shell ("shell").
    Shell,
    /// Start a named subsystem ("subsystem").
    Subsystem {
        /// Subsystem name, e.g. "sftp".
        name: &'a str,
    },
    /// Allocate a pseudo-terminal ("pty-req").
    Pty {
        /// Terminal type, e.g. "xterm".
        term: &'a str,
        /// Width in characters.
        width: u32,
        /// Height in characters.
        height: u32,
        /// Width in pixels (0 if unspecified).
        width_px: u32,
        /// Height in pixels (0 if unspecified).
        height_px: u32,
    },
    /// Set an environment variable ("env").
    Env {
        /// Variable name.
        name: &'a str,
        /// Variable value.
        value: &'a str,
    },
    /// Request X11 forwarding ("x11-req").
    X11 {
        /// Only allow a single X11 connection.
        single_connection: bool,
        /// X11 authentication protocol name.
        auth_protocol: &'a str,
        /// X11 authentication cookie (hex).
        auth_cookie: &'a str,
        /// X11 screen number.
        screen: u32,
    },
    /// Request agent forwarding ("auth-agent-req@openssh.com").
    AgentForward,
}

impl ChannelRequest<'_> {
    /// Returns the RFC 4254 request name.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelRequest::Exec { .. } => "exec",
            ChannelRequest::Shell => "shell",
            ChannelRequest::Subsystem { .. } => "subsystem",
            ChannelRequest::Pty { .. } => "pty-req",
            ChannelRequest::Env { .. } => "env",
            ChannelRequest::X11 { .. } => "x11-req",
            ChannelRequest::AgentForward => "auth-agent-req@openssh.com",
        }
    }
}

/// A single keyboard-interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Prompt text shown to the user.
    pub text: String,
    /// Whether the response may be echoed.
    pub echo: bool,
}

/// Responder for keyboard-interactive authentication.
///
/// Invoked by the backend for each SSH_MSG_USERAUTH_INFO_REQUEST round.
/// The responder must return one answer per prompt, in order. It must not
/// call back into the session that is performing the authentication.
pub trait KeyboardInteractive {
    /// Produces the responses for one round of prompts.
    fn respond(&mut self, name: &str, instruction: &str, prompts: &[Prompt]) -> Vec<String>;
}

/// External signer used for agent-backed public-key authentication.
///
/// Receives the exact byte sequence to sign and returns the SSH signature
/// blob, or a raw error (typically [`code::AGENT_PROTOCOL`]).
pub type Signer<'a> = dyn FnMut(&[u8]) -> RawResult<Vec<u8>> + 'a;

/// File metadata reported by the legacy SCP protocol for a received file.
#[derive(Debug, Clone, Copy)]
pub struct ScpFileInfo {
    /// Permission bits.
    pub mode: u32,
    /// File size in bytes.
    pub size: u64,
    /// Modification time (Unix seconds), 0 if the peer sent none.
    pub mtime: u64,
    /// Access time (Unix seconds), 0 if the peer sent none.
    pub atime: u64,
}

/// The underlying SSH protocol engine.
///
/// The engine owns the transport handle (the raw socket) and all protocol
/// cryptography. One engine instance serves exactly one session. All
/// methods are non-blocking when the transport is in non-blocking mode:
/// they either complete, fail, or return [`code::EAGAIN`] — they never
/// sleep or retry internally.
pub trait Backend {
    /// Configures transport blocking mode.
    fn set_blocking(&mut self, blocking: bool);

    /// Configures the timeout applied to blocking transport calls.
    /// `Duration::ZERO` disables the timeout.
    fn set_timeout(&mut self, timeout: Duration);

    /// Drives version exchange, key exchange and host-key negotiation.
    /// Resumes from internal progress when re-invoked after EAGAIN.
    fn handshake(&mut self) -> RawResult<()>;

    /// Returns the negotiated host key as `(key type, key blob)`.
    /// Only valid after the handshake has completed.
    fn host_key(&self) -> RawResult<(String, Vec<u8>)>;

    /// Queries the authentication methods the server advertises for a user.
    fn auth_methods(&mut self, username: &str) -> RawResult<Vec<String>>;

    /// Password authentication.
    fn auth_password(&mut self, username: &str, password: &str) -> RawResult<AuthOutcome>;

    /// Public-key authentication with key material read from files.
    fn auth_pubkey_file(
        &mut self,
        username: &str,
        pubkey: Option<&Path>,
        privkey: &Path,
        passphrase: Option<&str>,
    ) -> RawResult<AuthOutcome>;

    /// Public-key authentication with in-memory key material.
    fn auth_pubkey_memory(
        &mut self,
        username: &str,
        pubkey: Option<&str>,
        privkey: &str,
        passphrase: Option<&str>,
    ) -> RawResult<AuthOutcome>;

    /// Host-based authentication.
    fn auth_hostbased(
        &mut self,
        username: &str,
        pubkey: &Path,
        privkey: &Path,
        passphrase: Option<&str>,
        hostname: &str,
        local_username: &str,
    ) -> RawResult<AuthOutcome>;

    /// Keyboard-interactive authentication.
    fn auth_keyboard_interactive(
        &mut self,
        username: &str,
        responder: &mut dyn KeyboardInteractive,
    ) -> RawResult<AuthOutcome>;

    /// Public-key authentication with signing delegated to an external
    /// signer (an SSH agent).
    fn auth_publickey_with(
        &mut self,
        username: &str,
        pubkey_blob: &[u8],
        sign: &mut Signer<'_>,
    ) -> RawResult<AuthOutcome>;

    /// Sends SSH_MSG_DISCONNECT.
    fn disconnect(&mut self, description: &str) -> RawResult<()>;

    /// Releases all engine resources. Infallible; the engine must tolerate
    /// being shut down in any state.
    fn shutdown(&mut self);

    /// Opens a channel of the given type. `params` carries type-specific
    /// open data already in wire form (empty for "session").
    fn channel_open(&mut self, kind: &str, params: &[u8]) -> RawResult<ChannelHandle>;

    /// Issues a channel request and, when a reply is wanted, reports the
    /// peer's confirmation or denial.
    fn channel_request(&mut self, id: u32, request: &ChannelRequest<'_>) -> RawResult<()>;

    /// Reads up to `max` bytes from a channel stream. Returns EAGAIN when
    /// no data is buffered and the transport is not ready.
    fn channel_read(&mut self, id: u32, stream: u32, max: usize) -> RawResult<ReadResult>;

    /// Writes data to a channel stream, returning the bytes accepted.
    /// The caller never offers more than the current send window.
    fn channel_write(&mut self, id: u32, stream: u32, data: &[u8]) -> RawResult<usize>;

    /// Drains the send-window credit granted by peer SSH_MSG_CHANNEL_
    /// WINDOW_ADJUST messages since the last call. Returns 0 if none.
    fn channel_take_window_grant(&mut self, id: u32) -> u64;

    /// Grants the peer `adjustment` more bytes of receive window.
    fn channel_receive_window_adjust(&mut self, id: u32, adjustment: u64) -> RawResult<()>;

    /// Configures extended-data delivery for a channel.
    fn channel_handle_extended_data(&mut self, id: u32, mode: ExtendedDataMode) -> RawResult<()>;

    /// Sends SSH_MSG_CHANNEL_EOF for the local side.
    fn channel_send_eof(&mut self, id: u32) -> RawResult<()>;

    /// Reports whether the peer has signaled end-of-stream. Side-effect
    /// free.
    fn channel_peer_eof(&self, id: u32) -> bool;

    /// Initiates graceful channel shutdown.
    fn channel_close(&mut self, id: u32) -> RawResult<()>;

    /// Releases a channel's engine resources. Infallible.
    fn channel_free(&mut self, id: u32);

    /// Returns the last exit status reported by the peer for this channel,
    /// or 0 if none was received yet.
    fn channel_exit_status(&self, id: u32) -> i32;

    /// Starts a legacy SCP upload, returning the transfer channel.
    fn scp_send(&mut self, path: &str, mode: u32, size: u64) -> RawResult<ChannelHandle>;

    /// Starts a legacy SCP download, returning the transfer channel and the
    /// remote file's metadata.
    fn scp_recv(&mut self, path: &str) -> RawResult<(ChannelHandle, ScpFileInfo)>;

    /// Requests remote port forwarding ("tcpip-forward").
    fn listen(&mut self, host: &str, port: u16) -> RawResult<ListenerHandle>;

    /// Polls a listener for an inbound forwarded connection. `Ok(None)`
    /// means no connection is pending, which is distinct from EAGAIN
    /// (transport not ready).
    fn listener_accept(&mut self, id: u32) -> RawResult<Option<ChannelHandle>>;

    /// Cancels remote forwarding ("cancel-tcpip-forward").
    fn listener_cancel(&mut self, id: u32) -> RawResult<()>;
}
