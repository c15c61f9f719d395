use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::voice::VoicePayload;

/// Sender label attached to binary frames, which carry no sender on the wire
pub const VOICE_SENDER_LABEL: &str = "Voice Message";

/// Notice the server sends when a JOIN names a room that does not exist
pub const INVALID_ROOM_NOTICE: &str = "Invalid room code";

/// Notice the server sends when MSG/VOICE arrive from a connection that never joined
pub const NOT_IN_ROOM_NOTICE: &str = "User not found in room";

const JOIN_COMMAND: &str = "JOIN";
const TEXT_COMMAND: &str = "MSG";
const VOICE_COMMAND: &str = "VOICE";
const LIST_ROOMS_COMMAND: &str = "LIST_CHATROOMS";
const CREATE_COMMAND: &str = "CREATE";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty frame")]
    EmptyFrame,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing field '{field}' in {command} frame")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },

    #[error("Invalid room code: {0:?}")]
    InvalidRoomCode(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Invalid room list: {0}")]
    InvalidRoomList(String),
}

/// Server-issued identifier of a chat room.
///
/// Opaque to the client, but it must be non-empty and free of `:` since it is
/// embedded as a field of colon-delimited frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    pub fn new(code: impl Into<String>) -> Result<Self, ProtocolError> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.is_empty() || trimmed.contains(':') {
            return Err(ProtocolError::InvalidRoomCode(code));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

/// Frames sent from a client to the room server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `JOIN:<room>:<display name>`
    Join {
        room_code: RoomCode,
        display_name: String,
    },
    /// `MSG:<room>:<body>`
    Text { room_code: RoomCode, body: String },
    /// `VOICE:<room>:<base64 audio>`
    Voice {
        room_code: RoomCode,
        payload: VoicePayload,
    },
    /// `LIST_CHATROOMS`
    ListRooms,
    /// `CREATE`
    Create,
}

impl ClientFrame {
    pub fn command(&self) -> &'static str {
        match self {
            ClientFrame::Join { .. } => JOIN_COMMAND,
            ClientFrame::Text { .. } => TEXT_COMMAND,
            ClientFrame::Voice { .. } => VOICE_COMMAND,
            ClientFrame::ListRooms => LIST_ROOMS_COMMAND,
            ClientFrame::Create => CREATE_COMMAND,
        }
    }

    /// Serialize the frame to its textual wire form
    pub fn encode(&self) -> String {
        match self {
            ClientFrame::Join {
                room_code,
                display_name,
            } => format!("{JOIN_COMMAND}:{room_code}:{display_name}"),
            ClientFrame::Text { room_code, body } => format!("{TEXT_COMMAND}:{room_code}:{body}"),
            ClientFrame::Voice { room_code, payload } => {
                format!("{VOICE_COMMAND}:{room_code}:{}", payload.as_base64())
            }
            ClientFrame::ListRooms => LIST_ROOMS_COMMAND.to_string(),
            ClientFrame::Create => CREATE_COMMAND.to_string(),
        }
    }

    /// Parse a textual client frame.
    ///
    /// Only the first two colons are field separators; everything after the
    /// room code belongs to the last field, colons included.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        if frame.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        match frame {
            LIST_ROOMS_COMMAND => return Ok(ClientFrame::ListRooms),
            CREATE_COMMAND => return Ok(ClientFrame::Create),
            _ => {}
        }

        let (command, rest) = frame
            .split_once(':')
            .ok_or_else(|| ProtocolError::UnknownCommand(frame.to_string()))?;

        let (command, last_field) = match command {
            JOIN_COMMAND => (JOIN_COMMAND, "display_name"),
            TEXT_COMMAND => (TEXT_COMMAND, "body"),
            VOICE_COMMAND => (VOICE_COMMAND, "payload"),
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };

        let (room, remainder) = rest.split_once(':').ok_or(ProtocolError::MissingField {
            command,
            field: last_field,
        })?;
        let room_code = RoomCode::new(room)?;

        match command {
            JOIN_COMMAND => {
                if remainder.trim().is_empty() {
                    return Err(ProtocolError::MissingField {
                        command,
                        field: last_field,
                    });
                }
                Ok(ClientFrame::Join {
                    room_code,
                    display_name: remainder.to_string(),
                })
            }
            TEXT_COMMAND => Ok(ClientFrame::Text {
                room_code,
                body: remainder.to_string(),
            }),
            _ => Ok(ClientFrame::Voice {
                room_code,
                payload: VoicePayload::from_encoded(remainder)?,
            }),
        }
    }
}

/// Frames sent from the room server to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// A chat line, `sender: content` on the wire
    Chat { sender: String, content: String },
    /// A colon-free status line such as [`INVALID_ROOM_NOTICE`]
    Notice(String),
    /// A voice message relayed as a raw binary frame
    Voice(Vec<u8>),
}

impl ServerFrame {
    /// Decode a textual server frame.
    ///
    /// The first colon separates sender and content. The server writes one
    /// space after it, which is dropped here. Text without any colon is a
    /// server notice.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        if text.trim().is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        match text.split_once(':') {
            Some((sender, content)) => {
                if sender.trim().is_empty() {
                    return Err(ProtocolError::MissingField {
                        command: "chat",
                        field: "sender",
                    });
                }
                let content = content.strip_prefix(' ').unwrap_or(content);
                Ok(ServerFrame::Chat {
                    sender: sender.to_string(),
                    content: content.to_string(),
                })
            }
            None => Ok(ServerFrame::Notice(text.trim().to_string())),
        }
    }

    pub fn from_binary(data: impl Into<Vec<u8>>) -> Self {
        ServerFrame::Voice(data.into())
    }

    /// Sender label shown for this frame
    pub fn sender(&self) -> Option<&str> {
        match self {
            ServerFrame::Chat { sender, .. } => Some(sender),
            ServerFrame::Voice(_) => Some(VOICE_SENDER_LABEL),
            ServerFrame::Notice(_) => None,
        }
    }

    /// Textual wire form, `None` for binary voice frames
    pub fn encode_text(&self) -> Option<String> {
        match self {
            ServerFrame::Chat { sender, content } => Some(format!("{sender}: {content}")),
            ServerFrame::Notice(notice) => Some(notice.clone()),
            ServerFrame::Voice(_) => None,
        }
    }

    /// True when the server refused a JOIN
    pub fn is_join_rejection(&self) -> bool {
        matches!(self, ServerFrame::Notice(notice) if notice == INVALID_ROOM_NOTICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(code: &str) -> RoomCode {
        RoomCode::new(code).unwrap()
    }

    #[test]
    fn test_encode_client_frames() {
        let join = ClientFrame::Join {
            room_code: room("AB12"),
            display_name: "alice".to_string(),
        };
        assert_eq!(join.encode(), "JOIN:AB12:alice");

        let text = ClientFrame::Text {
            room_code: room("AB12"),
            body: "hi".to_string(),
        };
        assert_eq!(text.encode(), "MSG:AB12:hi");

        let voice = ClientFrame::Voice {
            room_code: room("AB12"),
            payload: VoicePayload::from_bytes(b"RIFF"),
        };
        assert_eq!(voice.encode(), "VOICE:AB12:UklGRg==");

        assert_eq!(ClientFrame::ListRooms.encode(), "LIST_CHATROOMS");
        assert_eq!(ClientFrame::Create.encode(), "CREATE");
    }

    #[test]
    fn test_decode_text_keeps_colons_in_body() {
        let frame = ClientFrame::decode("MSG:1234:meet at 10:30: bring snacks").unwrap();
        assert_eq!(
            frame,
            ClientFrame::Text {
                room_code: room("1234"),
                body: "meet at 10:30: bring snacks".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_round_trip_for_colon_heavy_body() {
        let original = ClientFrame::Text {
            room_code: room("9876"),
            body: ":::".to_string(),
        };
        assert_eq!(ClientFrame::decode(&original.encode()).unwrap(), original);
    }

    #[test]
    fn test_decode_join_and_voice() {
        assert_eq!(
            ClientFrame::decode("JOIN:AB12:alice").unwrap(),
            ClientFrame::Join {
                room_code: room("AB12"),
                display_name: "alice".to_string(),
            }
        );

        match ClientFrame::decode("VOICE:AB12:UklGRg==").unwrap() {
            ClientFrame::Voice { room_code, payload } => {
                assert_eq!(room_code.as_str(), "AB12");
                assert_eq!(payload.decode().unwrap(), b"RIFF");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert_eq!(ClientFrame::decode(""), Err(ProtocolError::EmptyFrame));
        assert!(matches!(
            ClientFrame::decode("HELLO:1234:x"),
            Err(ProtocolError::UnknownCommand(cmd)) if cmd == "HELLO"
        ));
        assert!(matches!(
            ClientFrame::decode("JOIN:1234"),
            Err(ProtocolError::MissingField { field: "display_name", .. })
        ));
        assert!(matches!(
            ClientFrame::decode("JOIN:1234:   "),
            Err(ProtocolError::MissingField { .. })
        ));
        assert!(matches!(
            ClientFrame::decode("MSG::hi"),
            Err(ProtocolError::InvalidRoomCode(_))
        ));
        assert!(matches!(
            ClientFrame::decode("VOICE:1234:not base64!"),
            Err(ProtocolError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_room_code_validation() {
        assert_eq!(room(" 1234 ").as_str(), "1234");
        assert!(RoomCode::new("").is_err());
        assert!(RoomCode::new("   ").is_err());
        assert!(RoomCode::new("12:34").is_err());
        assert_eq!("AB12".parse::<RoomCode>().unwrap(), room("AB12"));
    }

    #[test]
    fn test_server_text_splits_on_first_colon() {
        assert_eq!(
            ServerFrame::from_text("bob:hello").unwrap(),
            ServerFrame::Chat {
                sender: "bob".to_string(),
                content: "hello".to_string(),
            }
        );
        // The server writes "sender: content"
        assert_eq!(
            ServerFrame::from_text("bob: ratio 3:1").unwrap(),
            ServerFrame::Chat {
                sender: "bob".to_string(),
                content: "ratio 3:1".to_string(),
            }
        );
        assert_eq!(
            ServerFrame::from_text("bob:").unwrap(),
            ServerFrame::Chat {
                sender: "bob".to_string(),
                content: String::new(),
            }
        );
    }

    #[test]
    fn test_server_notices() {
        let frame = ServerFrame::from_text(INVALID_ROOM_NOTICE).unwrap();
        assert!(frame.is_join_rejection());
        assert_eq!(frame.sender(), None);

        let frame = ServerFrame::from_text(NOT_IN_ROOM_NOTICE).unwrap();
        assert_eq!(frame, ServerFrame::Notice(NOT_IN_ROOM_NOTICE.to_string()));
        assert!(!frame.is_join_rejection());
    }

    #[test]
    fn test_server_frame_rejects_empty_and_senderless() {
        assert_eq!(ServerFrame::from_text("  "), Err(ProtocolError::EmptyFrame));
        assert!(matches!(
            ServerFrame::from_text(":hello"),
            Err(ProtocolError::MissingField { field: "sender", .. })
        ));
    }

    #[test]
    fn test_binary_frames_use_voice_label() {
        let frame = ServerFrame::from_binary(vec![0u8, 1, 2]);
        assert_eq!(frame.sender(), Some(VOICE_SENDER_LABEL));
        assert_eq!(frame.encode_text(), None);
    }

    #[test]
    fn test_server_chat_encoding_matches_server_format() {
        let frame = ServerFrame::Chat {
            sender: "carol".to_string(),
            content: "a:b".to_string(),
        };
        let wire = frame.encode_text().unwrap();
        assert_eq!(wire, "carol: a:b");
        assert_eq!(ServerFrame::from_text(&wire).unwrap(), frame);
    }
}
