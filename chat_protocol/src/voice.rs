use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::protocol::ProtocolError;

/// Base64 body of an outbound `VOICE` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePayload {
    base64: String,
}

impl VoicePayload {
    /// Encode raw audio bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            base64: STANDARD.encode(bytes),
        }
    }

    /// Accept an already encoded payload, with or without a
    /// `data:<mime>;base64,` header. The body must be valid base64.
    pub fn from_encoded(encoded: &str) -> Result<Self, ProtocolError> {
        let body = strip_data_uri(encoded.trim()).trim();
        if body.is_empty() {
            return Err(ProtocolError::InvalidBase64("empty payload".to_string()));
        }
        STANDARD
            .decode(body)
            .map_err(|e| ProtocolError::InvalidBase64(e.to_string()))?;
        Ok(Self {
            base64: body.to_string(),
        })
    }

    pub fn as_base64(&self) -> &str {
        &self.base64
    }

    /// Decode back to raw audio bytes
    pub fn decode(&self) -> Result<Vec<u8>, ProtocolError> {
        STANDARD
            .decode(&self.base64)
            .map_err(|e| ProtocolError::InvalidBase64(e.to_string()))
    }

    /// Length of the base64 body in bytes
    pub fn len(&self) -> usize {
        self.base64.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base64.is_empty()
    }
}

/// Remove a `data:` URI header, returning the part after the first comma.
/// Input without the header is returned unchanged.
pub fn strip_data_uri(encoded: &str) -> &str {
    match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, body)| body),
        None => encoded,
    }
}
