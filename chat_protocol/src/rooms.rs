use serde::{Deserialize, Serialize};

use crate::protocol::{ProtocolError, RoomCode};

/// One entry of the server's room listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDescriptor {
    pub room_code: RoomCode,
    /// Not every server build reports it; missing means 0
    #[serde(default, alias = "participants", alias = "user_count")]
    pub participant_count: u32,
}

impl RoomDescriptor {
    pub fn new(room_code: RoomCode, participant_count: u32) -> Self {
        Self {
            room_code,
            participant_count,
        }
    }
}

/// Parse a `LIST_CHATROOMS` reply. Anything other than a JSON array of room
/// objects is rejected as a whole.
pub fn parse_room_list(frame: &str) -> Result<Vec<RoomDescriptor>, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(frame).map_err(|e| ProtocolError::InvalidRoomList(e.to_string()))?;

    if !value.is_array() {
        return Err(ProtocolError::InvalidRoomList(
            "expected a JSON array".to_string(),
        ));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidRoomList(e.to_string()))
}

pub fn encode_room_list(rooms: &[RoomDescriptor]) -> Result<String, ProtocolError> {
    serde_json::to_string(rooms).map_err(|e| ProtocolError::InvalidRoomList(e.to_string()))
}
