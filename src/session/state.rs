/// Lifecycle of a chat session.
///
/// `Idle → Connecting → Joined → Closed`, with `Connecting → Error` and
/// `Joined → Error` on transport failure. `Closed` and `Error` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    Idle,
    Connecting,
    Joined,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }

    pub fn can_send(self) -> bool {
        self == SessionState::Joined
    }

    /// Whether the machine may move from `self` to `next`
    pub fn allows(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Joined)
                | (Connecting, Error)
                | (Connecting, Closed)
                | (Joined, Closed)
                | (Joined, Error)
        )
    }

    /// Move to `next` if allowed, otherwise stay put. Returns the new state.
    pub fn advance(&mut self, next: SessionState) -> SessionState {
        if self.allows(next) {
            log::debug!("Session state {} -> {}", self, next);
            *self = next;
        } else if *self != next {
            log::debug!("Ignoring session transition {} -> {}", self, next);
        }
        *self
    }
}
