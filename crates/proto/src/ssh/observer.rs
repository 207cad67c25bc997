//! Injected session observer.
//!
//! The session layer carries no global telemetry state. Callers that want
//! visibility into protocol progress inject a [`SessionObserver`] at
//! construction; the default is [`NoopObserver`]. Observers must be cheap
//! and must not call back into the session they observe.

use crate::ssh::session::SessionState;

/// A protocol-level event emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent<'a> {
    /// The session state machine transitioned.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// An authentication method was attempted.
    AuthAttempt {
        /// Method name, e.g. "password".
        method: &'a str,
    },
    /// An authentication attempt concluded.
    AuthResult {
        /// Method name.
        method: &'a str,
        /// Whether the session is now authenticated.
        success: bool,
    },
    /// A channel was opened.
    ChannelOpened {
        /// Backend channel id.
        id: u32,
    },
    /// A channel completed graceful shutdown.
    ChannelClosed {
        /// Backend channel id.
        id: u32,
    },
    /// A remote forwarding listener was bound.
    ListenerBound {
        /// Effective bound port.
        port: u16,
    },
}

/// Receives protocol events from one session and its channels.
pub trait SessionObserver {
    /// Called for every emitted event.
    fn on_event(&self, event: SessionEvent<'_>);
}

/// Observer that discards all events. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_event(&self, _event: SessionEvent<'_>) {}
}
