//! Session state machine.

/// Lifecycle state of one session.
///
/// `Failed` is absorbing and reachable only from `Connecting`; a session
/// that opened always ends in `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum SessionState {
    /// Handshake in progress.
    #[default]
    Connecting,
    /// Connection open; the send timer may fire.
    Open,
    /// Close initiated, waiting for the peer's close.
    Closing,
    /// Connection fully torn down after a successful open.
    Closed,
    /// Handshake never completed.
    Failed,
}

impl SessionState {
    /// Check if sending is allowed in this state.
    ///
    /// Returns `true` only for `Open`.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, SessionState::Open)
    }

    /// Check if the session has finished, successfully or not.
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Open => write!(f, "Open"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
            SessionState::Failed => write!(f, "Failed"),
        }
    }
}
