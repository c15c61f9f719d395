//! # Chat Protocol
//!
//! Wire format spoken between ChatterSphere clients and the room server.
//!
//! Every request is a single WebSocket text frame with colon-delimited fields.
//! The server answers chat traffic with `sender: content` text frames, relays
//! voice messages as raw binary frames and replies to `LIST_CHATROOMS` with a
//! JSON array of rooms.
//!
//! This crate provides:
//! - Client frames (`JOIN`, `MSG`, `VOICE`, `LIST_CHATROOMS`, `CREATE`)
//! - Server frame decoding (chat lines, notices, voice blobs)
//! - Room list (de)serialization
//! - Base64 voice payload handling
//!
//! ## Example Usage
//!
//! ```rust
//! use chat_protocol::{ClientFrame, RoomCode, ServerFrame};
//!
//! let room_code = RoomCode::new("AB12").unwrap();
//! let join = ClientFrame::Join {
//!     room_code,
//!     display_name: "alice".to_string(),
//! };
//! assert_eq!(join.encode(), "JOIN:AB12:alice");
//!
//! // Only the first colon separates the sender from the content
//! let frame = ServerFrame::from_text("bob: see you at 10:30").unwrap();
//! assert_eq!(
//!     frame,
//!     ServerFrame::Chat {
//!         sender: "bob".to_string(),
//!         content: "see you at 10:30".to_string(),
//!     }
//! );
//! ```

pub mod protocol;
pub mod rooms;
pub mod voice;

// Re-export commonly used types
pub use protocol::{
    ClientFrame, ProtocolError, RoomCode, ServerFrame, INVALID_ROOM_NOTICE, NOT_IN_ROOM_NOTICE,
    VOICE_SENDER_LABEL,
};
pub use rooms::{encode_room_list, parse_room_list, RoomDescriptor};
pub use voice::{strip_data_uri, VoicePayload};
