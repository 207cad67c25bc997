//! SSH session layer over a native protocol engine.
//!
//! This module binds the SSH2 protocol (RFC 4251-4254) into a safe session
//! API: lifecycle and authentication state machines, channels with window
//! accounting, SFTP, the ssh-agent client, known-hosts checking and remote
//! port forwarding. The protocol engine itself (packets, key exchange,
//! ciphers) sits behind the [`Backend`](backend::Backend) trait.
//!
//! # Architecture
//!
//! 1. **Engine boundary** ([`backend`]) - raw status codes, EAGAIN as data
//! 2. **Session** ([`session`]) - handshake/auth state machine, factory
//! 3. **Channels** ([`channel`]) - multiplexed streams, flow control (RFC 4254)
//! 4. **Subsystems** ([`sftp`], [`agent`]) - protocols layered on channels
//! 5. **Trust** ([`known_hosts`]) - OpenSSH known_hosts checking
//!
//! # The retry contract
//!
//! Nothing in this layer blocks or retries internally. Every operation
//! either completes, fails, or returns an error whose
//! [`is_incomplete()`](hawser_platform::HawserError::is_incomplete) is
//! true, meaning: the transport was not ready, partial progress is
//! preserved, call again. Callers own the wait strategy.
//!
//! # Example
//!
//! ```rust,no_run
//! use hawser_proto::ssh::backend::Backend;
//! use hawser_proto::ssh::session::Session;
//!
//! # fn run(backend: impl Backend + 'static) -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::new(backend);
//! session.handshake()?;
//! session.userauth_password("user", "secret")?;
//!
//! let mut channel = session.channel_session()?;
//! channel.exec("uname -a")?;
//! let mut buf = [0u8; 4096];
//! let n = channel.read(&mut buf)?;
//! println!("{}", String::from_utf8_lossy(&buf[..n]));
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol

pub mod agent;
pub mod backend;
pub mod channel;
pub mod known_hosts;
pub mod listener;
pub mod observer;
pub mod session;
pub mod sftp;
pub(crate) mod wire;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export main types
pub use agent::{Agent, AgentIdentity};
pub use backend::{
    AuthOutcome, Backend, ChannelHandle, ChannelRequest, ExtendedDataMode, KeyboardInteractive,
    ListenerHandle, Prompt, RawError, RawResult, ReadResult, ScpFileInfo, Signer,
    STREAM_STDERR, STREAM_STDOUT,
};
pub use channel::{Channel, ChannelState};
pub use known_hosts::{CheckResult, KnownHostEntry, KnownHosts};
pub use listener::Listener;
pub use observer::{NoopObserver, SessionEvent, SessionObserver};
pub use session::{AuthState, Session, SessionState};
pub use sftp::{DirEntry, Sftp, SftpAttributes, SftpHandle};
