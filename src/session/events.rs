use crate::error::ChatError;
use crate::timeline::EventId;

/// Notifications produced by [`super::ChatSession::next_event`]
#[derive(Debug)]
pub enum SessionEvent {
    /// A chat event was appended to the timeline
    Message(EventId),
    /// Server status line that is not a chat message
    Notice(String),
    /// The connection ended normally. Terminal.
    Closed { reason: Option<String> },
    /// The session failed. Terminal; the timeline stays readable.
    Error(ChatError),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Closed { .. } | SessionEvent::Error(_))
    }
}
