//! Remote port-forwarding listener.
//!
//! Obtained from [`Session::forward_listen`](crate::ssh::session::Session::forward_listen);
//! the server listens on the requested address and surfaces inbound TCP
//! connections as channels through [`Listener::accept`].

use crate::ssh::channel::Channel;
use crate::ssh::session::SessionCore;
use hawser_platform::{HawserError, HawserResult};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// A server-side listener bound by a remote-forward request.
pub struct Listener {
    session: Rc<RefCell<SessionCore>>,
    id: u32,
    bound_port: u16,
    cancelled: bool,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("bound_port", &self.bound_port)
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}

impl Listener {
    pub(crate) fn attach(
        session: Rc<RefCell<SessionCore>>,
        handle: crate::ssh::backend::ListenerHandle,
    ) -> Self {
        Self {
            session,
            id: handle.id,
            bound_port: handle.bound_port,
            cancelled: false,
        }
    }

    /// The port the server actually bound. Differs from the request when
    /// port 0 asked the server to pick one.
    pub fn bound_port(&self) -> u16 {
        self.bound_port
    }

    /// Takes the next queued inbound connection, if any.
    ///
    /// `Ok(Some(channel))` delivers a connection, `Ok(None)` means none is
    /// queued right now, and the Incomplete signal means the transport
    /// needs to be pumped before the answer is known.
    pub fn accept(&mut self) -> HawserResult<Option<Channel>> {
        self.ensure_usable()?;
        let mut core = self.session.borrow_mut();
        let result = core
            .backend
            .listener_accept(self.id)
            .map_err(HawserError::from);
        let handle = core.record(result)?;
        drop(core);
        match handle {
            Some(handle) => {
                debug!(listener = self.id, channel = handle.id, "forwarded connection accepted");
                Ok(Some(Channel::attach(Rc::clone(&self.session), handle)))
            }
            None => Ok(None),
        }
    }

    /// Asks the server to stop listening. Retryable under Incomplete; once
    /// it succeeds the listener is unusable.
    pub fn cancel(&mut self) -> HawserResult<()> {
        self.ensure_usable()?;
        let mut core = self.session.borrow_mut();
        let result = core
            .backend
            .listener_cancel(self.id)
            .map_err(HawserError::from);
        core.record(result)?;
        drop(core);
        self.cancelled = true;
        debug!(listener = self.id, "remote forward cancelled");
        Ok(())
    }

    fn ensure_usable(&self) -> HawserResult<()> {
        if self.cancelled {
            return Err(HawserError::resource("listener already cancelled"));
        }
        self.session.borrow().ensure_live()
    }
}
