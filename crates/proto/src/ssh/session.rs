//! SSH session state machine.
//!
//! A [`Session`] drives one connection from raw transport to authenticated
//! protocol endpoint and acts as the factory for channels, SFTP, SCP and
//! forwarding listeners. Every operation follows the non-blocking contract:
//! it completes, fails, or returns the Incomplete retry signal, and never
//! blocks or retries internally. Retried calls resume the backend's partial
//! progress rather than restarting.
//!
//! # State machine
//!
//! ```text
//! Created -> Handshaking -> Negotiated -> Authenticating -> Authenticated
//!    |            |             |               |                |
//!    +------------+-------------+---------------+----------------+--> Closed
//!                        (free() or fatal transport/protocol error)
//! ```
//!
//! Repeated calls under Incomplete never regress the state. Transport and
//! protocol errors are fatal and move the session to `Closed`;
//! authentication errors are local to the attempt.
//!
//! # Threading
//!
//! A session and everything it spawns form one single-threaded cooperative
//! unit. There is no internal locking; callbacks (keyboard-interactive
//! responders, observers, signers) must not re-enter the session that
//! invoked them.

use crate::ssh::backend::{AuthOutcome, Backend, ChannelHandle, KeyboardInteractive, Signer};
use crate::ssh::channel::Channel;
use crate::ssh::listener::Listener;
use crate::ssh::observer::{NoopObserver, SessionEvent, SessionObserver};
use crate::ssh::sftp::Sftp;
use hawser_platform::{code, HawserError, HawserResult};
use std::cell::RefCell;
use std::path::Path;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::debug;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed; no protocol traffic yet.
    Created,
    /// Version/key exchange in progress (resumable).
    Handshaking,
    /// Handshake complete; transport is secured, user not authenticated.
    Negotiated,
    /// An authentication exchange is in progress (resumable).
    Authenticating,
    /// User authenticated; channels may be opened.
    Authenticated,
    /// Freed or invalidated by a fatal error. Terminal.
    Closed,
}

/// Authentication progress, tracked separately from the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No method has been accepted.
    Unauthenticated,
    /// The server accepted a method but requires more.
    PartiallyAuthenticated,
    /// Fully authenticated.
    Authenticated,
}

/// Shared state behind a session and its descendants.
///
/// Channels, SFTP roots and listeners hold an `Rc` to this core so that
/// freeing the session transitively invalidates them.
pub(crate) struct SessionCore {
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) state: SessionState,
    pub(crate) auth_state: AuthState,
    blocking: bool,
    timeout: Duration,
    last_error: Option<HawserError>,
    pub(crate) freed: bool,
    pub(crate) observer: Rc<dyn SessionObserver>,
    channels: Vec<Weak<RefCell<crate::ssh::channel::ChannelInner>>>,
}

impl SessionCore {
    /// Fails with a Resource error if the session was freed.
    pub(crate) fn ensure_live(&self) -> HawserResult<()> {
        if self.freed {
            return Err(HawserError::resource("session used after free"));
        }
        Ok(())
    }

    /// Moves the state machine, emitting an observer event on change.
    pub(crate) fn transition(&mut self, to: SessionState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        debug!(?from, ?to, "session state changed");
        let observer = Rc::clone(&self.observer);
        observer.on_event(SessionEvent::StateChanged { from, to });
    }

    /// Records an operation outcome for `last_error()` and applies the
    /// propagation policy: fatal errors close the session, everything else
    /// leaves the state alone. Success clears the previous error so that
    /// `last_error()` only ever reflects the immediately preceding failure.
    pub(crate) fn record<T>(&mut self, result: HawserResult<T>) -> HawserResult<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Ok(value)
            }
            Err(err) => Err(self.record_failure(err)),
        }
    }

    /// Applies the propagation policy to a failure raised outside a
    /// `record` call, e.g. inside a subsystem codec.
    pub(crate) fn record_failure(&mut self, err: HawserError) -> HawserError {
        if err.is_fatal() {
            self.transition(SessionState::Closed);
        }
        self.last_error = Some(err.clone());
        err
    }

    pub(crate) fn register_channel(
        &mut self,
        inner: &Rc<RefCell<crate::ssh::channel::ChannelInner>>,
    ) {
        self.channels.push(Rc::downgrade(inner));
        self.channels.retain(|weak| weak.upgrade().is_some());
    }
}

/// An SSH session over a backend-owned transport handle.
///
/// The session does not resolve names or create sockets; the backend is
/// constructed over a caller-provided transport.
pub struct Session {
    core: Rc<RefCell<SessionCore>>,
}

impl Session {
    /// Creates a session over a protocol backend, with no observer.
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::with_observer(backend, Rc::new(NoopObserver))
    }

    /// Creates a session with an injected observer.
    pub fn with_observer(backend: impl Backend + 'static, observer: Rc<dyn SessionObserver>) -> Self {
        Self {
            core: Rc::new(RefCell::new(SessionCore {
                backend: Box::new(backend),
                state: SessionState::Created,
                auth_state: AuthState::Unauthenticated,
                blocking: true,
                timeout: Duration::ZERO,
                last_error: None,
                freed: false,
                observer,
                channels: Vec::new(),
            })),
        }
    }

    pub(crate) fn from_core(core: Rc<RefCell<SessionCore>>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Rc<RefCell<SessionCore>> {
        &self.core
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.core.borrow().state
    }

    /// Returns the current authentication state.
    pub fn auth_state(&self) -> AuthState {
        self.core.borrow().auth_state
    }

    /// Returns true once a credential has been fully accepted.
    pub fn authenticated(&self) -> bool {
        self.core.borrow().auth_state == AuthState::Authenticated
    }

    /// Returns the error recorded by the immediately preceding failing
    /// call, or `None` if the last call succeeded. Side-effect free.
    pub fn last_error(&self) -> Option<HawserError> {
        self.core.borrow().last_error.clone()
    }

    /// Sets transport blocking mode. Pure configuration.
    pub fn set_blocking(&mut self, blocking: bool) -> HawserResult<()> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        core.blocking = blocking;
        core.backend.set_blocking(blocking);
        Ok(())
    }

    /// Returns the configured blocking mode.
    pub fn is_blocking(&self) -> bool {
        self.core.borrow().blocking
    }

    /// Sets the timeout applied to blocking transport calls.
    /// `Duration::ZERO` disables it. Pure configuration.
    pub fn set_timeout(&mut self, timeout: Duration) -> HawserResult<()> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        core.timeout = timeout;
        core.backend.set_timeout(timeout);
        Ok(())
    }

    /// Returns the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.core.borrow().timeout
    }

    /// Performs version exchange, key exchange and host-key negotiation.
    ///
    /// Under a non-blocking transport this returns Incomplete until the
    /// exchange finishes; repeated calls resume the backend's internal
    /// progress. Once `Negotiated` (or beyond) this is a no-op success.
    pub fn handshake(&mut self) -> HawserResult<()> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        match core.state {
            SessionState::Created | SessionState::Handshaking => {}
            SessionState::Negotiated
            | SessionState::Authenticating
            | SessionState::Authenticated => return Ok(()),
            SessionState::Closed => {
                return core.record(Err(HawserError::resource("session is closed")));
            }
        }
        core.transition(SessionState::Handshaking);
        let result = core.backend.handshake();
        match result {
            Ok(()) => {
                core.transition(SessionState::Negotiated);
                core.record(Ok(()))
            }
            Err(raw) => core.record(Err(raw.into())),
        }
    }

    /// Returns the peer's host key as `(key type, key blob)`, for
    /// known-hosts verification. Valid once the handshake completed.
    pub fn host_key(&self) -> HawserResult<(String, Vec<u8>)> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        if matches!(core.state, SessionState::Created | SessionState::Handshaking) {
            return core.record(Err(HawserError::resource(
                "host key unavailable before handshake completion",
            )));
        }
        let result = core.backend.host_key().map_err(HawserError::from);
        core.record(result)
    }

    /// Queries the authentication methods the server advertises for `username`.
    pub fn auth_methods(&mut self, username: &str) -> HawserResult<Vec<String>> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        if matches!(core.state, SessionState::Created | SessionState::Handshaking) {
            return core.record(Err(HawserError::resource(
                "authentication query before handshake completion",
            )));
        }
        let result = core.backend.auth_methods(username).map_err(HawserError::from);
        core.record(result)
    }

    /// Password authentication.
    pub fn userauth_password(&mut self, username: &str, password: &str) -> HawserResult<()> {
        self.run_auth("password", |backend| {
            backend.auth_password(username, password)
        })
    }

    /// Public-key authentication with key material read from files.
    pub fn userauth_pubkey_file(
        &mut self,
        username: &str,
        pubkey: Option<&Path>,
        privkey: &Path,
        passphrase: Option<&str>,
    ) -> HawserResult<()> {
        self.run_auth("publickey", |backend| {
            backend.auth_pubkey_file(username, pubkey, privkey, passphrase)
        })
    }

    /// Public-key authentication with in-memory key material.
    pub fn userauth_pubkey_memory(
        &mut self,
        username: &str,
        pubkey: Option<&str>,
        privkey: &str,
        passphrase: Option<&str>,
    ) -> HawserResult<()> {
        self.run_auth("publickey", |backend| {
            backend.auth_pubkey_memory(username, pubkey, privkey, passphrase)
        })
    }

    /// Host-based authentication.
    pub fn userauth_hostbased(
        &mut self,
        username: &str,
        pubkey: &Path,
        privkey: &Path,
        passphrase: Option<&str>,
        hostname: &str,
        local_username: &str,
    ) -> HawserResult<()> {
        self.run_auth("hostbased", |backend| {
            backend.auth_hostbased(username, pubkey, privkey, passphrase, hostname, local_username)
        })
    }

    /// Keyboard-interactive authentication. The responder is invoked for
    /// each prompt round and must not re-enter this session.
    pub fn userauth_keyboard_interactive(
        &mut self,
        username: &str,
        responder: &mut dyn KeyboardInteractive,
    ) -> HawserResult<()> {
        self.run_auth("keyboard-interactive", |backend| {
            backend.auth_keyboard_interactive(username, responder)
        })
    }

    /// Public-key authentication with signing delegated to an external
    /// signer, typically an SSH agent (see [`crate::ssh::agent::Agent`]).
    pub fn userauth_publickey_with(
        &mut self,
        username: &str,
        pubkey_blob: &[u8],
        sign: &mut Signer<'_>,
    ) -> HawserResult<()> {
        self.run_auth("publickey", |backend| {
            backend.auth_publickey_with(username, pubkey_blob, sign)
        })
    }

    fn run_auth<F>(&mut self, method: &'static str, attempt: F) -> HawserResult<()>
    where
        F: FnOnce(&mut dyn Backend) -> crate::ssh::backend::RawResult<AuthOutcome>,
    {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        match core.state {
            SessionState::Authenticated => return Ok(()),
            SessionState::Negotiated | SessionState::Authenticating => {}
            SessionState::Created | SessionState::Handshaking => {
                return core.record(Err(HawserError::resource(
                    "authentication before handshake completion",
                )));
            }
            SessionState::Closed => {
                return core.record(Err(HawserError::resource("session is closed")));
            }
        }
        core.transition(SessionState::Authenticating);
        let observer = Rc::clone(&core.observer);
        observer.on_event(SessionEvent::AuthAttempt { method });
        debug!(method, "authentication attempt");

        let result = attempt(core.backend.as_mut());
        match result {
            Ok(AuthOutcome::Complete) => {
                core.auth_state = AuthState::Authenticated;
                core.transition(SessionState::Authenticated);
                observer.on_event(SessionEvent::AuthResult {
                    method,
                    success: true,
                });
                core.record(Ok(()))
            }
            Ok(AuthOutcome::Partial) => {
                core.auth_state = AuthState::PartiallyAuthenticated;
                observer.on_event(SessionEvent::AuthResult {
                    method,
                    success: false,
                });
                core.record(Err(HawserError::auth(
                    code::AUTH_PARTIAL,
                    format!("'{method}' partially accepted; further methods required"),
                )))
            }
            Err(raw) => {
                let err: HawserError = raw.into();
                if !err.is_incomplete() {
                    observer.on_event(SessionEvent::AuthResult {
                        method,
                        success: false,
                    });
                }
                core.record(Err(err))
            }
        }
    }

    fn open_handle(&mut self, kind: &str, params: &[u8]) -> HawserResult<ChannelHandle> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        if core.state != SessionState::Authenticated {
            return core.record(Err(HawserError::resource(
                "channel open requires an authenticated session",
            )));
        }
        let result = core.backend.channel_open(kind, params).map_err(HawserError::from);
        let handle = core.record(result)?;
        let observer = Rc::clone(&core.observer);
        observer.on_event(SessionEvent::ChannelOpened { id: handle.id });
        debug!(id = handle.id, kind, "channel opened");
        Ok(handle)
    }

    /// Opens a channel of an arbitrary type. `params` carries type-specific
    /// open data in wire form (empty for "session").
    ///
    /// Valid only on an authenticated session; otherwise fails with a
    /// Resource-class error (not Transport).
    pub fn open_channel(&mut self, kind: &str, params: &[u8]) -> HawserResult<Channel> {
        let handle = self.open_handle(kind, params)?;
        Ok(Channel::attach(Rc::clone(&self.core), handle))
    }

    /// Opens a "session" channel for exec/shell/subsystem use.
    pub fn channel_session(&mut self) -> HawserResult<Channel> {
        self.open_channel("session", &[])
    }

    /// Opens the SFTP subsystem root. The returned [`Sftp`] owns its
    /// dedicated channel; drive [`Sftp::handshake`] to completion before
    /// issuing file operations.
    pub fn sftp(&mut self) -> HawserResult<Sftp> {
        let core = self.core.borrow();
        core.ensure_live()?;
        if core.state != SessionState::Authenticated {
            drop(core);
            let mut core = self.core.borrow_mut();
            return core.record(Err(HawserError::resource(
                "SFTP requires an authenticated session",
            )));
        }
        drop(core);
        Ok(Sftp::new(Session::from_core(Rc::clone(&self.core))))
    }

    /// Starts a legacy SCP upload of `size` bytes to `path` with the given
    /// permission bits. The file body is streamed through the returned
    /// channel with the usual read/write retry contract.
    pub fn scp_send(&mut self, path: &str, mode: u32, size: u64) -> HawserResult<Channel> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        if core.state != SessionState::Authenticated {
            return core.record(Err(HawserError::resource(
                "SCP requires an authenticated session",
            )));
        }
        let result = core.backend.scp_send(path, mode, size).map_err(HawserError::from);
        let handle = core.record(result)?;
        drop(core);
        Ok(Channel::attach(Rc::clone(&self.core), handle))
    }

    /// Starts a legacy SCP download of `path`. Returns the transfer channel
    /// and the remote file's metadata.
    pub fn scp_recv(
        &mut self,
        path: &str,
    ) -> HawserResult<(Channel, crate::ssh::backend::ScpFileInfo)> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        if core.state != SessionState::Authenticated {
            return core.record(Err(HawserError::resource(
                "SCP requires an authenticated session",
            )));
        }
        let result = core.backend.scp_recv(path).map_err(HawserError::from);
        let (handle, info) = core.record(result)?;
        drop(core);
        Ok((Channel::attach(Rc::clone(&self.core), handle), info))
    }

    /// Requests remote port forwarding and returns the listener. The
    /// listener's lifetime is bounded by this session.
    pub fn forward_listen(&mut self, host: &str, port: u16) -> HawserResult<Listener> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        if core.state != SessionState::Authenticated {
            return core.record(Err(HawserError::resource(
                "port forwarding requires an authenticated session",
            )));
        }
        let result = core.backend.listen(host, port).map_err(HawserError::from);
        let handle = core.record(result)?;
        let observer = Rc::clone(&core.observer);
        observer.on_event(SessionEvent::ListenerBound {
            port: handle.bound_port,
        });
        debug!(host, port = handle.bound_port, "remote forward bound");
        drop(core);
        Ok(Listener::attach(Rc::clone(&self.core), handle))
    }

    /// Sends SSH_MSG_DISCONNECT and closes the session. Retryable under
    /// Incomplete.
    pub fn disconnect(&mut self, description: &str) -> HawserResult<()> {
        let mut core = self.core.borrow_mut();
        core.ensure_live()?;
        if core.state == SessionState::Closed {
            return Ok(());
        }
        let result = core.backend.disconnect(description).map_err(HawserError::from);
        match result {
            Ok(()) => {
                core.transition(SessionState::Closed);
                core.record(Ok(()))
            }
            Err(err) => core.record(Err(err)),
        }
    }

    /// Releases all session resources.
    ///
    /// Every subsequent call on this session or anything it spawned fails
    /// with a Resource-class used-after-free error. Channels freed
    /// independently beforehand are unaffected. Freeing twice is an error.
    pub fn free(&mut self) -> HawserResult<()> {
        let mut core = self.core.borrow_mut();
        if core.freed {
            return Err(HawserError::resource("session already freed"));
        }
        let live = core
            .channels
            .iter()
            .filter(|weak| weak.upgrade().is_some())
            .count();
        debug!(live_channels = live, "freeing session");
        core.backend.shutdown();
        core.freed = true;
        core.transition(SessionState::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::backend::{Prompt, RawError, STREAM_STDOUT};
    use crate::ssh::testutil::{authenticated_session, scripted_session, MockState};
    use hawser_platform::ErrorKind;
    use std::cell::RefCell;

    #[test]
    fn test_handshake_not_ready_twice_then_ready() {
        let (mut session, state) = scripted_session();
        state.borrow_mut().handshake_results.push_back(Err(RawError::eagain()));
        state.borrow_mut().handshake_results.push_back(Err(RawError::eagain()));
        state.borrow_mut().handshake_results.push_back(Ok(()));

        let first = session.handshake();
        assert!(first.unwrap_err().is_incomplete());
        assert_eq!(session.state(), SessionState::Handshaking);

        let second = session.handshake();
        assert!(second.unwrap_err().is_incomplete());
        assert_eq!(session.state(), SessionState::Handshaking);

        assert!(session.handshake().is_ok());
        assert_eq!(session.state(), SessionState::Negotiated);
    }

    #[test]
    fn test_handshake_after_success_is_noop() {
        let (mut session, _state) = scripted_session();
        assert!(session.handshake().is_ok());
        assert!(session.handshake().is_ok());
        assert_eq!(session.state(), SessionState::Negotiated);
    }

    #[test]
    fn test_handshake_kex_failure_closes_session() {
        let (mut session, state) = scripted_session();
        state
            .borrow_mut()
            .handshake_results
            .push_back(Err(RawError::new(code::KEX_FAILURE, "no common kex")));
        let err = session.handshake().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_password_auth_success() {
        let (mut session, _state) = scripted_session();
        session.handshake().unwrap();
        assert!(session.userauth_password("user", "secret").is_ok());
        assert!(session.authenticated());
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[test]
    fn test_auth_failure_keeps_session_usable() {
        let (mut session, state) = scripted_session();
        session.handshake().unwrap();
        state
            .borrow_mut()
            .auth_results
            .push_back(Err(RawError::new(code::AUTH_FAILED, "denied")));
        let err = session.userauth_password("user", "wrong").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_ne!(session.state(), SessionState::Closed);

        // A second, caller-driven attempt may succeed.
        assert!(session.userauth_password("user", "right").is_ok());
        assert!(session.authenticated());
    }

    #[test]
    fn test_auth_incomplete_retry_does_not_regress_state() {
        let (mut session, state) = scripted_session();
        session.handshake().unwrap();
        state.borrow_mut().auth_results.push_back(Err(RawError::eagain()));
        assert!(session.userauth_password("u", "p").unwrap_err().is_incomplete());
        assert_eq!(session.state(), SessionState::Authenticating);
        assert!(session.userauth_password("u", "p").is_ok());
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[test]
    fn test_partial_auth_reports_distinct_code() {
        let (mut session, state) = scripted_session();
        session.handshake().unwrap();
        state
            .borrow_mut()
            .auth_results
            .push_back(Ok(AuthOutcome::Partial));
        let err = session.userauth_password("u", "p").unwrap_err();
        assert_eq!(err.code(), code::AUTH_PARTIAL);
        assert_eq!(session.auth_state(), AuthState::PartiallyAuthenticated);
        assert!(!session.authenticated());
    }

    #[test]
    fn test_pubkey_file_auth_success() {
        let (mut session, _state) = scripted_session();
        session.handshake().unwrap();
        session
            .userauth_pubkey_file("user", Some(Path::new("/id.pub")), Path::new("/id"), None)
            .unwrap();
        assert!(session.authenticated());
    }

    #[test]
    fn test_pubkey_memory_rejection_is_auth_error() {
        let (mut session, state) = scripted_session();
        session.handshake().unwrap();
        state
            .borrow_mut()
            .auth_results
            .push_back(Err(RawError::new(code::PUBLICKEY_UNVERIFIED, "bad key")));
        let err = session
            .userauth_pubkey_memory("user", None, "private key material", None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_ne!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_hostbased_auth_success() {
        let (mut session, _state) = scripted_session();
        session.handshake().unwrap();
        session
            .userauth_hostbased(
                "user",
                Path::new("/host.pub"),
                Path::new("/host"),
                None,
                "client.example.com",
                "operator",
            )
            .unwrap();
        assert!(session.authenticated());
    }

    #[test]
    fn test_keyboard_interactive_answers_prompts() {
        struct Fixed {
            asked: usize,
        }
        impl KeyboardInteractive for Fixed {
            fn respond(&mut self, _name: &str, _instruction: &str, prompts: &[Prompt]) -> Vec<String> {
                self.asked += prompts.len();
                prompts.iter().map(|_| "secret".to_string()).collect()
            }
        }
        let (mut session, _state) = scripted_session();
        session.handshake().unwrap();
        let mut responder = Fixed { asked: 0 };
        session
            .userauth_keyboard_interactive("user", &mut responder)
            .unwrap();
        assert!(session.authenticated());
        assert_eq!(responder.asked, 1);
    }

    #[test]
    fn test_auth_before_handshake_is_resource_error() {
        let (mut session, _state) = scripted_session();
        let err = session.userauth_password("u", "p").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_open_channel_before_auth_is_resource_not_transport() {
        let (mut session, _state) = scripted_session();
        session.handshake().unwrap();
        let err = session.channel_session().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_last_error_reflects_only_preceding_call() {
        let (mut session, state) = scripted_session();
        session.handshake().unwrap();
        state
            .borrow_mut()
            .auth_results
            .push_back(Err(RawError::new(code::AUTH_FAILED, "denied")));
        let _ = session.userauth_password("u", "wrong");
        assert_eq!(session.last_error().unwrap().code(), code::AUTH_FAILED);

        session.userauth_password("u", "right").unwrap();
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_blocking_and_timeout_are_pure_config() {
        let (mut session, state) = scripted_session();
        session.set_blocking(false).unwrap();
        assert!(!session.is_blocking());
        session.set_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(session.timeout(), Duration::from_secs(5));
        // Forwarded to the transport handle, no state change.
        assert_eq!(session.state(), SessionState::Created);
        assert!(!state.borrow().blocking);
        assert_eq!(state.borrow().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_scp_send_streams_through_channel() {
        let (mut session, state) = authenticated_session();
        let mut channel = session.scp_send("/tmp/up.txt", 0o644, 5).unwrap();
        let id = channel.id();
        assert_eq!(channel.write(b"hello").unwrap(), 5);
        assert_eq!(state.borrow().written(id), b"hello");
    }

    #[test]
    fn test_scp_recv_reports_file_info() {
        let (mut session, state) = authenticated_session();
        let (mut channel, info) = session.scp_recv("/tmp/down.txt").unwrap();
        assert_eq!(info.mode, 0o644);
        let id = channel.id();
        state
            .borrow_mut()
            .push_read_data(id, STREAM_STDOUT, b"data".to_vec());
        let mut buf = [0u8; 8];
        assert_eq!(channel.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"data");
    }

    #[test]
    fn test_scp_requires_authentication() {
        let (mut session, _state) = scripted_session();
        session.handshake().unwrap();
        assert_eq!(
            session.scp_send("/f", 0o644, 1).unwrap_err().kind(),
            ErrorKind::Resource
        );
        assert_eq!(session.scp_recv("/f").unwrap_err().kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_free_invalidates_session() {
        let (mut session, _state) = scripted_session();
        session.free().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        let err = session.handshake().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        // Double free is itself a resource error.
        assert_eq!(session.free().unwrap_err().kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_transport_error_closes_session() {
        let (mut session, state) = scripted_session();
        session.handshake().unwrap();
        state
            .borrow_mut()
            .auth_results
            .push_back(Err(RawError::new(code::SOCKET_DISCONNECT, "peer gone")));
        let err = session.userauth_password("u", "p").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_host_key_available_after_handshake() {
        let (mut session, _state) = scripted_session();
        assert_eq!(session.host_key().unwrap_err().kind(), ErrorKind::Resource);
        session.handshake().unwrap();
        let (key_type, blob) = session.host_key().unwrap();
        assert_eq!(key_type, "ssh-ed25519");
        assert!(!blob.is_empty());
    }

    #[test]
    fn test_observer_sees_state_changes() {
        struct Recorder(RefCell<Vec<String>>);
        impl SessionObserver for Recorder {
            fn on_event(&self, event: SessionEvent<'_>) {
                self.0.borrow_mut().push(format!("{event:?}"));
            }
        }
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));
        let state = Rc::new(RefCell::new(MockState::default()));
        let backend = crate::ssh::testutil::MockBackend::new(Rc::clone(&state));
        let mut session = Session::with_observer(backend, Rc::clone(&recorder) as Rc<dyn SessionObserver>);
        session.handshake().unwrap();
        session.userauth_password("u", "p").unwrap();
        let events = recorder.0.borrow();
        assert!(events.iter().any(|e| e.contains("Handshaking")));
        assert!(events.iter().any(|e| e.contains("AuthAttempt")));
        assert!(events.iter().any(|e| e.contains("Authenticated")));
    }
}
