//! Hawser: an SSH2 session layer with an explicit non-blocking contract.
//!
//! This crate exposes the SSH client surface as a set of cooperating
//! handles: [`ssh::session::Session`] owns the lifecycle and
//! authentication state machines and spawns [`ssh::channel::Channel`]s,
//! [`ssh::sftp::Sftp`] roots and forwarding
//! [`ssh::listener::Listener`]s. The protocol engine (packet framing, key
//! exchange, ciphers) lives behind the [`ssh::backend::Backend`] trait.
//!
//! # The retry contract
//!
//! Every operation completes, fails, or returns the Incomplete signal
//! ([`hawser_platform::ErrorKind::Incomplete`]): the transport was not
//! ready, internal progress is preserved, and the caller re-invokes the
//! same operation when it chooses. The library never sleeps, polls or
//! retries on the caller's behalf.
//!
//! # Example
//!
//! ```rust,no_run
//! use hawser_proto::ssh::backend::Backend;
//! use hawser_proto::ssh::session::Session;
//!
//! # fn run(backend: impl Backend + 'static) -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::new(backend);
//! session.set_blocking(false)?;
//! loop {
//!     match session.handshake() {
//!         Ok(()) => break,
//!         Err(err) if err.is_incomplete() => continue, // wait for readiness
//!         Err(err) => return Err(err.into()),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ssh;
