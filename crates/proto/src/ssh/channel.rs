//! SSH channel management.
//!
//! A [`Channel`] is one multiplexed logical stream within a session: command
//! execution, shell, subsystem or forwarded connection. The channel owns its
//! flow-control state:
//!
//! - the **send window** decreases as data is written and increases only
//!   when the peer grants more credit via a window-adjust message;
//! - the **receive window** decreases as data is delivered to the caller
//!   and is replenished only by an explicit
//!   [`adjust_receive_window`](Channel::adjust_receive_window) call. A
//!   caller that drains the receive buffer without replenishing throttles
//!   the peer.
//!
//! Reads and writes never block and never loop: they transfer what the
//! window and transport allow, or return the Incomplete retry signal with
//! zero bytes transferred.

use crate::ssh::backend::{ChannelHandle, ChannelRequest, ExtendedDataMode, ReadResult};
use crate::ssh::observer::SessionEvent;
use crate::ssh::session::SessionCore;
use hawser_platform::{code, ErrorKind, HawserError, HawserResult};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

pub use crate::ssh::backend::{STREAM_STDERR, STREAM_STDOUT};

/// Channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Open for data transfer and requests.
    Open,
    /// Graceful shutdown completed.
    Closed,
}

/// Shared channel state, owned by the channel itself; the session keeps
/// only a weak back-reference for cleanup tracking.
pub(crate) struct ChannelInner {
    pub(crate) id: u32,
    state: ChannelState,
    send_window: u64,
    recv_window: u64,
    max_packet: u32,
    eof_seen: bool,
    exit_status: i32,
    /// The start request (exec/shell/subsystem) that succeeded, if any.
    started: Option<&'static str>,
    /// A start request awaiting retry after Incomplete.
    pending_start: Option<&'static str>,
    ext_mode: ExtendedDataMode,
    freed: bool,
}

/// A multiplexed data channel within a session.
pub struct Channel {
    session: Rc<RefCell<SessionCore>>,
    inner: Rc<RefCell<ChannelInner>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Channel")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

fn check_usable(inner: &ChannelInner, core: &SessionCore) -> HawserResult<()> {
    if inner.freed {
        return Err(HawserError::resource("channel used after free"));
    }
    core.ensure_live()
}

impl Channel {
    pub(crate) fn attach(session: Rc<RefCell<SessionCore>>, handle: ChannelHandle) -> Self {
        let inner = Rc::new(RefCell::new(ChannelInner {
            id: handle.id,
            state: ChannelState::Open,
            send_window: handle.send_window,
            recv_window: handle.recv_window,
            max_packet: handle.max_packet,
            eof_seen: false,
            exit_status: 0,
            started: None,
            pending_start: None,
            ext_mode: ExtendedDataMode::Normal,
            freed: false,
        }));
        session.borrow_mut().register_channel(&inner);
        Self { session, inner }
    }

    /// Returns the backend channel id.
    pub fn id(&self) -> u32 {
        self.inner.borrow().id
    }

    /// Returns the channel lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.inner.borrow().state
    }

    /// Reads from the primary (stdout) stream.
    pub fn read(&mut self, buf: &mut [u8]) -> HawserResult<usize> {
        self.read_stream(STREAM_STDOUT, buf)
    }

    /// Reads from an extended-data stream, e.g. [`STREAM_STDERR`].
    ///
    /// Returns `Ok(n)` with `n > 0` for delivered data (never more than
    /// `buf.len()`), `Ok(0)` for end-of-stream, or the Incomplete signal
    /// when nothing is buffered and the transport is not ready. Delivered
    /// bytes are debited from the receive window; replenish it with
    /// [`adjust_receive_window`](Channel::adjust_receive_window).
    pub fn read_stream(&mut self, stream: u32, buf: &mut [u8]) -> HawserResult<usize> {
        let mut inner = self.inner.borrow_mut();
        let mut core = self.session.borrow_mut();
        check_usable(&inner, &core)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = core.backend.channel_read(inner.id, stream, buf.len());
        match result {
            Ok(ReadResult::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                inner.recv_window = inner.recv_window.saturating_sub(n as u64);
                core.record(Ok(n))
            }
            Ok(ReadResult::Eof) => {
                inner.eof_seen = true;
                core.record(Ok(0))
            }
            Err(raw) => core.record(Err(raw.into())),
        }
    }

    /// Writes to the primary (stdout) stream.
    pub fn write(&mut self, data: &[u8]) -> HawserResult<usize> {
        self.write_stream(STREAM_STDOUT, data)
    }

    /// Writes to a stream, returning the bytes accepted.
    ///
    /// At most `min(data.len(), send window, max packet)` bytes are offered
    /// to the transport. An exhausted send window yields the Incomplete
    /// signal with code [`code::CHANNEL_WINDOW_FULL`]; the window grows
    /// again only when the peer sends a window adjust.
    pub fn write_stream(&mut self, stream: u32, data: &[u8]) -> HawserResult<usize> {
        let mut inner = self.inner.borrow_mut();
        let mut core = self.session.borrow_mut();
        check_usable(&inner, &core)?;
        // Credit granted by the peer since the last call.
        let grant = core.backend.channel_take_window_grant(inner.id);
        inner.send_window += grant;
        if data.is_empty() {
            return Ok(0);
        }
        if inner.send_window == 0 {
            let err = HawserError::new(
                ErrorKind::Incomplete,
                code::CHANNEL_WINDOW_FULL,
                "send window exhausted; retry after a peer window adjust",
            );
            return core.record(Err(err));
        }
        let limit = (data.len() as u64)
            .min(inner.send_window)
            .min(inner.max_packet as u64) as usize;
        let result = core.backend.channel_write(inner.id, stream, &data[..limit]);
        match result {
            Ok(n) => {
                inner.send_window -= (n.min(limit)) as u64;
                core.record(Ok(n))
            }
            Err(raw) => core.record(Err(raw.into())),
        }
    }

    /// Requests execution of a command. A channel accepts exactly one of
    /// exec/shell/subsystem; a second start request is a Resource error.
    /// Retryable under Incomplete.
    pub fn exec(&mut self, command: &str) -> HawserResult<()> {
        self.start_process("exec", ChannelRequest::Exec { command })
    }

    /// Requests the user's default shell.
    pub fn shell(&mut self) -> HawserResult<()> {
        self.start_process("shell", ChannelRequest::Shell)
    }

    /// Requests a named subsystem, e.g. "sftp".
    pub fn subsystem(&mut self, name: &str) -> HawserResult<()> {
        self.start_process("subsystem", ChannelRequest::Subsystem { name })
    }

    fn start_process(
        &mut self,
        name: &'static str,
        request: ChannelRequest<'_>,
    ) -> HawserResult<()> {
        let mut inner = self.inner.borrow_mut();
        let mut core = self.session.borrow_mut();
        check_usable(&inner, &core)?;
        if let Some(done) = inner.started {
            return core.record(Err(HawserError::resource(format!(
                "channel already started '{done}'; exec, shell and subsystem are mutually exclusive"
            ))));
        }
        if let Some(pending) = inner.pending_start {
            if pending != name {
                return core.record(Err(HawserError::resource(format!(
                    "'{pending}' request still pending on this channel"
                ))));
            }
        }
        inner.pending_start = Some(name);
        let result = core.backend.channel_request(inner.id, &request);
        match result {
            Ok(()) => {
                inner.pending_start = None;
                inner.started = Some(name);
                debug!(id = inner.id, request = name, "channel process started");
                core.record(Ok(()))
            }
            Err(raw) => {
                let err: HawserError = raw.into();
                if !err.is_incomplete() {
                    inner.pending_start = None;
                }
                core.record(Err(err))
            }
        }
    }

    /// Requests a pseudo-terminal. Dimensions are (cols, rows, width px,
    /// height px); pixel sizes may be 0.
    pub fn request_pty(&mut self, term: &str, dims: (u32, u32, u32, u32)) -> HawserResult<()> {
        self.simple_request(ChannelRequest::Pty {
            term,
            width: dims.0,
            height: dims.1,
            width_px: dims.2,
            height_px: dims.3,
        })
    }

    /// Sets a remote environment variable.
    pub fn setenv(&mut self, name: &str, value: &str) -> HawserResult<()> {
        self.simple_request(ChannelRequest::Env { name, value })
    }

    /// Requests X11 forwarding for this channel.
    pub fn request_x11(
        &mut self,
        single_connection: bool,
        auth_protocol: &str,
        auth_cookie: &str,
        screen: u32,
    ) -> HawserResult<()> {
        self.simple_request(ChannelRequest::X11 {
            single_connection,
            auth_protocol,
            auth_cookie,
            screen,
        })
    }

    /// Requests agent forwarding for this channel.
    pub fn request_agent_forwarding(&mut self) -> HawserResult<()> {
        self.simple_request(ChannelRequest::AgentForward)
    }

    fn simple_request(&mut self, request: ChannelRequest<'_>) -> HawserResult<()> {
        let inner = self.inner.borrow();
        let mut core = self.session.borrow_mut();
        check_usable(&inner, &core)?;
        let result = core
            .backend
            .channel_request(inner.id, &request)
            .map_err(HawserError::from);
        core.record(result)
    }

    /// Configures how extended-data streams (e.g. stderr) are delivered.
    pub fn handle_extended_data(&mut self, mode: ExtendedDataMode) -> HawserResult<()> {
        let mut inner = self.inner.borrow_mut();
        let mut core = self.session.borrow_mut();
        check_usable(&inner, &core)?;
        let result = core
            .backend
            .channel_handle_extended_data(inner.id, mode)
            .map_err(HawserError::from);
        core.record(result)?;
        inner.ext_mode = mode;
        Ok(())
    }

    /// Returns the configured extended-data mode.
    pub fn extended_data_mode(&self) -> ExtendedDataMode {
        self.inner.borrow().ext_mode
    }

    /// Remaining receive-window credit.
    pub fn window_read(&self) -> u64 {
        self.inner.borrow().recv_window
    }

    /// Remaining send-window credit, after draining any pending peer grant.
    pub fn window_write(&mut self) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let mut core = self.session.borrow_mut();
        if inner.freed || core.freed {
            return inner.send_window;
        }
        let grant = core.backend.channel_take_window_grant(inner.id);
        inner.send_window += grant;
        inner.send_window
    }

    /// Grants the peer `adjustment` more bytes of send credit, replenishing
    /// the receive window drained by reads. Returns the new window.
    pub fn adjust_receive_window(&mut self, adjustment: u64) -> HawserResult<u64> {
        let mut inner = self.inner.borrow_mut();
        let mut core = self.session.borrow_mut();
        check_usable(&inner, &core)?;
        let result = core
            .backend
            .channel_receive_window_adjust(inner.id, adjustment)
            .map_err(HawserError::from);
        core.record(result)?;
        inner.recv_window += adjustment;
        Ok(inner.recv_window)
    }

    /// Reports whether the peer has signaled end-of-stream. Read-only: never
    /// advances the transport, never fails.
    pub fn eof(&self) -> bool {
        let inner = self.inner.borrow();
        if inner.eof_seen {
            return true;
        }
        if inner.freed {
            return false;
        }
        let core = self.session.borrow();
        if core.freed {
            return false;
        }
        core.backend.channel_peer_eof(inner.id)
    }

    /// Signals end-of-stream for the local side.
    pub fn send_eof(&mut self) -> HawserResult<()> {
        let inner = self.inner.borrow();
        let mut core = self.session.borrow_mut();
        check_usable(&inner, &core)?;
        let result = core
            .backend
            .channel_send_eof(inner.id)
            .map_err(HawserError::from);
        core.record(result)
    }

    /// Initiates graceful shutdown. Retryable under Incomplete; once it
    /// succeeds the channel is [`ChannelState::Closed`] and the exit status
    /// is cached.
    pub fn close(&mut self) -> HawserResult<()> {
        let mut inner = self.inner.borrow_mut();
        let mut core = self.session.borrow_mut();
        check_usable(&inner, &core)?;
        if inner.state == ChannelState::Closed {
            return Ok(());
        }
        let result = core.backend.channel_close(inner.id);
        match result {
            Ok(()) => {
                inner.state = ChannelState::Closed;
                inner.exit_status = core.backend.channel_exit_status(inner.id);
                let observer = Rc::clone(&core.observer);
                observer.on_event(SessionEvent::ChannelClosed { id: inner.id });
                debug!(id = inner.id, "channel closed");
                core.record(Ok(()))
            }
            Err(raw) => core.record(Err(raw.into())),
        }
    }

    /// Returns the last exit status reported by the peer.
    ///
    /// Before the remote process has terminated this is the last known
    /// value (0 if none was ever received), not an error. Check
    /// [`eof`](Channel::eof) and the close state first when the distinction
    /// matters.
    pub fn exit_status(&mut self) -> HawserResult<i32> {
        let mut inner = self.inner.borrow_mut();
        let core = self.session.borrow();
        check_usable(&inner, &core)?;
        inner.exit_status = core.backend.channel_exit_status(inner.id);
        Ok(inner.exit_status)
    }

    /// Releases the channel handle. The channel is unusable afterwards;
    /// freeing twice is a Resource error. A channel freed before its
    /// session is unaffected by the later session free.
    pub fn free(&mut self) -> HawserResult<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.freed {
            return Err(HawserError::resource("channel already freed"));
        }
        let mut core = self.session.borrow_mut();
        if !core.freed {
            core.backend.channel_free(inner.id);
        }
        inner.freed = true;
        Ok(())
    }
}
