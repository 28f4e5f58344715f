//! API Models
//!
//! This module defines the REST request and response bodies, and their
//! OpenAPI documentation with `utoipa`.

use serde::{Deserialize, Serialize};
use tutor_core::normalizer::{ReplyEnvelope, ReplyKind};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct NormalizeReplyPayload {
    /// Raw language-model output.
    #[schema(example = "```yaml\ntype: text\nresponse: \"Hello\"\n```")]
    pub text: String,
}

/// A reply in the same shape the WebSocket relay sends, without audio.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct NormalizedReply {
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "text")]
    pub kind: ReplyKind,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "take_photo")]
    pub action: Option<String>,
    /// Chalkboard content.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "5x + 4 = 12")]
    pub write: Option<String>,
}

impl From<ReplyEnvelope> for NormalizedReply {
    fn from(envelope: ReplyEnvelope) -> Self {
        Self {
            kind: envelope.kind,
            response: envelope.text.unwrap_or_default(),
            action: envelope.action,
            write: envelope.write,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
