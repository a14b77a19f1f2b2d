//! Feed Codec
//!
//! JSON encoding and decoding for the Noren tick feed. Inbound text decodes
//! to a [`FeedFrame`]; outbound requests encode to the text frames the
//! server expects.

use crate::domain::subscription::{SubscriptionMode, SubscriptionToken};

use super::auth::Credentials;
use super::messages::{FeedFrame, HEARTBEAT_FRAME, SubscriptionAction, SubscriptionRequest};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was not a JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the tick feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NorenCodec;

impl NorenCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    ///
    /// Frames with an unrecognised `t` decode to [`FeedFrame::Unknown`];
    /// only structurally broken frames are errors.
    pub fn decode(&self, text: &str) -> Result<FeedFrame, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Encode the identify frame.
    pub fn encode_connect(&self, credentials: &Credentials) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&credentials.connect_request())?)
    }

    /// Encode a subscribe or unsubscribe frame for one mode.
    pub fn encode_subscription(
        &self,
        action: SubscriptionAction,
        mode: SubscriptionMode,
        tokens: &[SubscriptionToken],
    ) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&SubscriptionRequest::new(
            action, mode, tokens,
        ))?)
    }

    /// The heartbeat frame.
    #[must_use]
    pub const fn heartbeat(&self) -> &'static str {
        HEARTBEAT_FRAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_non_objects() {
        let codec = NorenCodec::new();
        assert!(matches!(
            codec.decode("[1,2]"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(codec.decode("not json"), Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn decode_reports_broken_json() {
        let codec = NorenCodec::new();
        assert!(matches!(codec.decode("{\"t\":"), Err(CodecError::Json(_))));
    }

    #[test]
    fn decode_frame_without_type_is_an_error() {
        let codec = NorenCodec::new();
        assert!(codec.decode(r#"{"e":"NSE","tk":"22"}"#).is_err());
    }

    #[test]
    fn decode_tick_with_surrounding_whitespace() {
        let codec = NorenCodec::new();
        let frame = codec.decode("  {\"t\":\"tf\",\"e\":\"NSE\",\"tk\":\"22\"}\n").unwrap();
        assert!(matches!(frame, FeedFrame::TouchlineUpdate(_)));
    }

    #[test]
    fn encode_connect_uses_credentials() {
        let codec = NorenCodec::new();
        let text = codec
            .encode_connect(&Credentials::for_user("FT1", "abc"))
            .unwrap();
        assert!(text.contains(r#""susertoken":"abc""#));
        assert!(text.starts_with(r#"{"t":"c""#));
    }

    #[test]
    fn heartbeat_frame_is_fixed() {
        assert_eq!(NorenCodec::new().heartbeat(), r#"{"k":"","t":"h"}"#);
    }
}
