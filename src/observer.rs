//! Session lifecycle observation.
//!
//! Sessions report what happened to them through an injected observer
//! instead of logging directly, so tests can assert on emitted events. The
//! default [`TracingObserver`] forwards everything to `tracing`.

use std::sync::Arc;

/// Something that happened to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// The handshake completed and the connection is open.
    Open,
    /// A subscribe message was written to the socket.
    Sent {
        /// 1-based sequence number of the send within the session.
        seq: u64,
    },
    /// The connection is gone, cleanly or otherwise.
    Closed {
        /// Close code from the peer's close frame, if one was received.
        code: Option<u16>,
    },
    /// A handshake or transport error. Observational only.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// Receiver for session lifecycle events.
///
/// Events for a given session are delivered sequentially from that
/// session's own task; implementations only need thread safety across
/// sessions.
pub trait SessionObserver: Send + Sync {
    /// Called once per event, tagged with the emitting session's id.
    fn on_event(&self, session: u64, event: &SessionEvent);
}

/// Default observer: structured logs via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, session: u64, event: &SessionEvent) {
        match event {
            SessionEvent::Open => tracing::info!(session, "connected"),
            SessionEvent::Sent { seq } => tracing::debug!(session, seq, "subscribe sent"),
            SessionEvent::Closed { code } => tracing::info!(session, ?code, "closed"),
            SessionEvent::Error { message } => tracing::warn!(session, %message, "error"),
        }
    }
}

impl<T: SessionObserver + ?Sized> SessionObserver for Arc<T> {
    fn on_event(&self, session: u64, event: &SessionEvent) {
        (**self).on_event(session, event);
    }
}
