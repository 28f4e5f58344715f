//! Reply Normalization
//!
//! Language-model output is asked to be a small YAML document, but what comes
//! back ranges from clean YAML to fenced blocks, `---` delimited documents,
//! YAML with prose around it, or plain sentences. `normalize` turns any of it
//! into a [`ReplyEnvelope`] in three tiers:
//!
//! 1. extract the structured block (a ```` ```yaml ```` fence or a `---` pair),
//! 2. decode it as a YAML mapping,
//! 3. fall back to a line scanner that looks for `type:`, `text:`, `action:`
//!    and `write:`.
//!
//! It never fails. The worst case is a `text` envelope holding the trimmed input.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

/// Keys accepted for the human-readable part of a reply.
const TEXT_KEYS: &[&str] = &["text", "response", "speak"];

/// The kind of an outbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    Text,
    Action,
    Error,
}

impl ReplyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyKind::Text => "text",
            ReplyKind::Action => "action",
            ReplyKind::Error => "error",
        }
    }
}

/// A normalized reply, ready to be sent to a client.
///
/// Construct through [`ReplyEnvelope::text`], [`ReplyEnvelope::action`] or
/// [`ReplyEnvelope::error`]: an `action` is only ever present on
/// [`ReplyKind::Action`] envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub kind: ReplyKind,
    pub text: Option<String>,
    pub action: Option<String>,
    /// What to show on the chalkboard.
    pub write: Option<String>,
}

impl ReplyEnvelope {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Text,
            text: Some(text.into()),
            action: None,
            write: None,
        }
    }

    pub fn action(action: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Action,
            text: Some(text.into()),
            action: Some(action.into()),
            write: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Error,
            text: Some(message.into()),
            action: None,
            write: None,
        }
    }

    pub fn with_write(mut self, write: impl Into<String>) -> Self {
        self.write = Some(write.into());
        self
    }

    /// Builds an envelope from loosely-typed fields.
    ///
    /// An action directive always yields an `action` envelope. A `type: action`
    /// reply without an `action` field uses its text as the directive, which is
    /// the `response: take_photo` form the tutor prompt teaches. Returns `None`
    /// when text, action and write are all absent.
    fn from_parts(
        kind: &str,
        text: Option<String>,
        action: Option<String>,
        write: Option<String>,
    ) -> Option<Self> {
        let text = non_empty(text);
        let action = non_empty(action);
        let write = non_empty(write);

        if kind.trim().eq_ignore_ascii_case("action") || action.is_some() {
            if let Some(action) = action.or_else(|| text.clone()) {
                let text = text.unwrap_or_else(|| action.clone());
                return Some(Self {
                    write,
                    ..Self::action(action, text)
                });
            }
        }

        match (text, write) {
            (None, None) => None,
            (text, write) => Some(Self {
                kind: ReplyKind::Text,
                text,
                action: None,
                write,
            }),
        }
    }
}

/// How strictly the structured decode tier treats a missing `type` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeMode {
    /// A document without `type` is not a reply; fall through to the line scanner.
    /// Used by the WebSocket completion path.
    #[default]
    Strict,
    /// A document without `type` is a `text` reply. Used by the REST
    /// normalization endpoint.
    Lenient,
}

/// Result of the structured decode tier.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decoded {
    Success {
        kind: String,
        text: Option<String>,
        action: Option<String>,
        write: Option<String>,
    },
    Failure,
}

/// Turns raw model output into a [`ReplyEnvelope`]. Never fails.
///
/// Blank input yields a `text` envelope whose text is empty. Callers that
/// forward envelopes to clients reject blank input before normalizing.
pub fn normalize(raw: &str, mode: DecodeMode) -> ReplyEnvelope {
    let candidate = extract_structured_block(raw);

    match decode(&candidate, mode) {
        Decoded::Success {
            kind,
            text,
            action,
            write,
        } => {
            if let Some(envelope) = ReplyEnvelope::from_parts(&kind, text, action, write) {
                return envelope;
            }
            debug!("Structured reply carried no text or action, scanning lines");
        }
        Decoded::Failure => debug!(?mode, "Structured decode failed, scanning lines"),
    }

    scan_lines(&candidate).unwrap_or_else(|| ReplyEnvelope::text(candidate))
}

/// Returns the structured part of `raw`.
///
/// The interior of a ```` ```yaml ```` fence wins. Otherwise a `---` delimited
/// block is taken when the text starts with `---` or when the block holds a
/// `type:` line. Anything else is returned trimmed and unchanged.
pub fn extract_structured_block(raw: &str) -> String {
    let trimmed = raw.trim();
    let lines: Vec<&str> = trimmed.lines().collect();

    if let Some(block) = fenced_yaml_block(&lines) {
        return block;
    }
    if let Some(block) = dashed_block(&lines) {
        return block;
    }
    trimmed.to_string()
}

fn fenced_yaml_block(lines: &[&str]) -> Option<String> {
    let start = lines.iter().position(|line| {
        let marker = line.trim().to_ascii_lowercase();
        marker == "```yaml" || marker == "```yml"
    })?;
    let mut block = Vec::new();
    for line in &lines[start + 1..] {
        let line = line.trim_end();
        if line.trim_start().starts_with("```") {
            break;
        }
        // Closing fence glued to the last content line.
        if let Some(content) = line.strip_suffix("```") {
            block.push(content);
            break;
        }
        block.push(line);
    }
    Some(block.join("\n").trim().to_string())
}

fn dashed_block(lines: &[&str]) -> Option<String> {
    let start = lines.iter().position(|line| line.trim() == "---")?;
    let body = &lines[start + 1..];
    let end = body
        .iter()
        .position(|line| line.trim() == "---")
        .unwrap_or(body.len());
    let block = &body[..end];

    let holds_reply = block.iter().any(|line| key_value(line.trim(), &["type"]).is_some());
    if start == 0 || holds_reply {
        Some(block.join("\n").trim().to_string())
    } else {
        None
    }
}

fn decode(candidate: &str, mode: DecodeMode) -> Decoded {
    let map = match serde_yaml::from_str::<Value>(candidate) {
        Ok(Value::Mapping(map)) => map,
        Ok(_) => return Decoded::Failure,
        Err(e) => {
            debug!(error = %e, "Reply is not valid YAML");
            return Decoded::Failure;
        }
    };

    let field = |key: &str| {
        map.iter()
            .find(|(k, _)| k.as_str().is_some_and(|k| k.eq_ignore_ascii_case(key)))
            .and_then(|(_, v)| value_to_string(v))
    };

    let kind = match (field("type"), mode) {
        (Some(kind), _) => kind,
        (None, DecodeMode::Lenient) => ReplyKind::Text.as_str().to_string(),
        (None, DecodeMode::Strict) => return Decoded::Failure,
    };

    Decoded::Success {
        kind,
        text: TEXT_KEYS.iter().find_map(|key| field(key)),
        action: field("action"),
        write: field("write"),
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_to_string).collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        Value::Tagged(tagged) => value_to_string(&tagged.value),
        Value::Null | Value::Mapping(_) => None,
    }
}

/// Line scanner used when the candidate does not decode as a reply.
fn scan_lines(candidate: &str) -> Option<ReplyEnvelope> {
    let mut kind: Option<String> = None;
    let mut text_lines: Vec<&str> = Vec::new();
    let mut action: Option<String> = None;
    let mut write: Option<String> = None;
    let mut capturing = false;

    for line in candidate.lines().map(str::trim) {
        if let Some(value) = key_value(line, &["type"]) {
            kind = Some(value.to_string());
            capturing = false;
        } else if let Some(value) = key_value(line, &["action"]) {
            action = Some(value.to_string());
            capturing = false;
        } else if let Some(value) = key_value(line, &["write"]) {
            write = Some(value.to_string());
            capturing = false;
        } else if let Some(value) = key_value(line, TEXT_KEYS) {
            if !value.is_empty() {
                text_lines.push(value);
            }
            capturing = true;
        } else if capturing && !line.is_empty() {
            text_lines.push(line);
        }
    }

    let text = (!text_lines.is_empty()).then(|| text_lines.join(" ").replace("```", ""));
    let kind = kind.unwrap_or_else(|| ReplyKind::Text.as_str().to_string());
    ReplyEnvelope::from_parts(&kind, text, action, write)
}

/// If `line` starts with one of `keys` followed by `:` (case-insensitive),
/// returns the trimmed remainder.
fn key_value<'a>(line: &'a str, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        let prefix = line.get(..key.len())?;
        let rest = line.get(key.len()..)?;
        if prefix.eq_ignore_ascii_case(key) {
            rest.strip_prefix(':').map(str::trim)
        } else {
            None
        }
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
