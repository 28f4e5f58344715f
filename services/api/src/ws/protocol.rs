//! Defines the WebSocket frame protocol between the client app and the relay.

use serde::{Deserialize, Serialize};
use tutor_core::normalizer::{ReplyEnvelope, ReplyKind};

/// The message sent to clients when a frame cannot be processed. Internal
/// causes are logged, never forwarded.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

/// Sent for `message`/`photo` frames before a session is bound, when the
/// relay is configured to reject them.
pub const UNBOUND_ERROR_MESSAGE: &str = "No active session. Send a session frame first.";

pub const SPEECH_DISABLED_MESSAGE: &str = "Speech synthesis is not configured.";

/// Frames sent from the client to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Binds the connection to a conversation, creating it on first use.
    #[serde(rename = "session")]
    Session {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// A text turn from the child.
    #[serde(rename = "message")]
    Message { text: String },
    /// A photo, usually a `data:` URI.
    #[serde(rename = "photo")]
    Photo { data: String },
    /// Asks for audio of arbitrary text, outside any conversation.
    #[serde(rename = "generate-audio")]
    GenerateAudio {
        text: String,
        #[serde(rename = "voiceName", default)]
        voice_name: Option<String>,
        #[serde(default)]
        speed: Option<f32>,
    },
}

const CLIENT_FRAME_TYPES: &[&str] = &["session", "message", "photo", "generate-audio"];

/// Outcome of decoding one inbound text frame.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Frame(ClientFrame),
    /// Well-formed JSON whose `type` is not part of the protocol.
    Unknown(Option<String>),
    /// Not JSON, or a known `type` with missing or invalid fields.
    Malformed(String),
}

pub fn decode_client_frame(text: &str) -> Inbound {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Inbound::Malformed(e.to_string()),
    };

    let frame_type = value.get("type").and_then(|t| t.as_str()).map(str::to_string);
    match frame_type.as_deref() {
        Some(t) if CLIENT_FRAME_TYPES.contains(&t) => match serde_json::from_value(value) {
            Ok(frame) => Inbound::Frame(frame),
            Err(e) => Inbound::Malformed(e.to_string()),
        },
        _ => Inbound::Unknown(frame_type),
    }
}

/// Frames sent from the server to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Text {
        response: String,
        /// Chalkboard content.
        #[serde(skip_serializing_if = "Option::is_none")]
        write: Option<String>,
        /// Base64 encoded MP3 of the response, when speech is enabled.
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
    },
    Action {
        response: String,
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        write: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
    },
    /// Reply to a `generate-audio` frame.
    Audio { audio: String },
    Error { message: String },
}

impl ServerFrame {
    /// Serializable form of a normalized reply.
    pub fn reply(envelope: ReplyEnvelope, audio: Option<String>) -> Self {
        let text = envelope.text.unwrap_or_default();
        let write = envelope.write;
        match (envelope.kind, envelope.action) {
            (ReplyKind::Action, Some(action)) => ServerFrame::Action {
                response: text,
                action,
                write,
                audio,
            },
            (ReplyKind::Error, _) => ServerFrame::Error { message: text },
            _ => ServerFrame::Text {
                response: text,
                write,
                audio,
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn generic_error() -> Self {
        Self::error(GENERIC_ERROR_MESSAGE)
    }
}
