//! Text transport encoding for binary payloads

use base64::Engine;

use crate::error::CodecError;

/// Encode arbitrary bytes as standard base64
pub fn encode_text(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode standard base64 back into bytes
pub fn decode_text(text: &str) -> Result<Vec<u8>, CodecError> {
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| CodecError::InvalidTransportText(e.to_string()))
}
