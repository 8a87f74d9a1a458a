//! Session lifecycle shared by both peers.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// A session handle only exists once its channel is open, so there is no
/// "unopened" value: opening the channel yields `Handshaking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, waiting for the initialize exchange.
    Handshaking,
    /// Initialize completed; discovery and invocation are allowed.
    Ready,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Whether a request for `method` may be sent or served in this state.
    pub fn permits(self, method: &str) -> bool {
        use crate::protocol::methods::INITIALIZE;
        match self {
            SessionState::Handshaking => method == INITIALIZE,
            SessionState::Ready => method != INITIALIZE,
            SessionState::Closed => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
