pub mod audio_capture;
pub mod audio_resource;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod mock_server;
pub mod session;
pub mod timeline;
pub mod transport;

pub use chat_protocol;
pub use error::{ChatError, Result};
