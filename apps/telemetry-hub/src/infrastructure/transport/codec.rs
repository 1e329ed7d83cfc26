//! Stream Codec
//!
//! JSON encoding and decoding for the sensor stream frames. The endpoint
//! sends one frame per WebSocket text message.

use super::messages::{ClientFrame, ServerFrame};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Empty text message.
    #[error("empty frame")]
    Empty,

    /// Message is not a JSON object.
    #[error("invalid frame: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the sensor stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode an outbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] when serialization fails.
    pub fn encode(&self, frame: &ClientFrame) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }

    /// Decode one inbound text message into a [`ServerFrame`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Empty`] for blank messages,
    /// [`CodecError::InvalidFormat`] when the message is not a JSON object,
    /// and [`CodecError::Json`] when parsing fails.
    pub fn decode(&self, text: &str) -> Result<ServerFrame, CodecError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CodecError::Empty);
        }
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                &trimmed[..trimmed.len().min(50)]
            )));
        }
        Ok(serde_json::from_str(trimmed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ValuesRequest;
    use crate::domain::resolution::Resolution;

    #[test]
    fn encodes_client_frames() {
        let codec = JsonCodec::new();
        let json = codec.encode(&ClientFrame::GetMetadata).unwrap();
        assert_eq!(json, r#"{"type":"getMetadata"}"#);
    }

    #[test]
    fn decodes_update_frame() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(r#"{"type":"update","resolution":"minute","values":{}}"#)
            .unwrap();
        assert!(matches!(frame, ServerFrame::Update(_)));
    }

    #[test]
    fn rejects_empty_messages() {
        let codec = JsonCodec::new();
        assert!(matches!(codec.decode("   "), Err(CodecError::Empty)));
    }

    #[test]
    fn rejects_non_object_messages() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("[1,2,3]"),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_unknown_frame_types() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(r#"{"type":"bogus"}"#),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn round_trips_through_text() {
        let codec = JsonCodec::new();
        let frame = ClientFrame::GetValues(ValuesRequest::single(
            "d1",
            "s1",
            Resolution::Hour,
            0,
            10,
        ));
        let json = codec.encode(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "getValues");
        assert_eq!(value["resolution"], "hour");
    }
}
