//! Stream Codec Module
//!
//! JSON encoding and decoding for Bitstamp WebSocket frames. Each text
//! frame carries exactly one envelope object.

use crate::domain::envelope::Envelope;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame decoded but carried an empty `event` tag.
    #[error("frame has an empty event tag")]
    MissingEvent,
}

/// JSON codec for Bitstamp envelopes.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame into an [`Envelope`].
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object with an `event`
    /// string, or if that string is empty.
    pub fn decode(&self, text: &str) -> Result<Envelope, CodecError> {
        let envelope: Envelope = serde_json::from_str(text.trim())?;
        if envelope.event.is_empty() {
            return Err(CodecError::MissingEvent);
        }
        Ok(envelope)
    }

    /// Encode an envelope into a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<String, CodecError> {
        Ok(serde_json::to_string(envelope)?)
    }
}
