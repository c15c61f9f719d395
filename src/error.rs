use chat_protocol::ProtocolError;
use thiserror::Error;

use crate::audio_capture::CaptureError;
use crate::config::ConfigError;
use crate::identity::IdentityError;
use crate::session::SessionState;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("No display name available, pick a username first")]
    IdentityMissing,

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connecting to {url} timed out after {timeout_ms}ms")]
    ConnectTimeout { url: String, timeout_ms: u128 },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session is {state}, sends are only accepted while joined")]
    NotJoined { state: SessionState },

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Server rejected join: {0}")]
    JoinRejected(String),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
