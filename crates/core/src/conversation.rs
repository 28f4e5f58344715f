//! Conversation Store
//!
//! Holds the ordered turn history of every tutoring session in the process.
//! The store is the only mutator of conversation state: callers hold a
//! session identifier and go through `create_or_get`, `append` and `snapshot`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// The author of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One segment of a multi-part user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// A reference to an image, usually a `data:` URI uploaded by the client.
    ImageUrl { url: String },
}

/// The body of a turn: either plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: TurnContent::Text(text.into()),
        }
    }

    /// A user turn carrying a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Parts(vec![ContentPart::Text { text: text.into() }]),
        }
    }

    /// A user turn carrying an image followed by an instruction for the model.
    pub fn user_photo(image_url: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Parts(vec![
                ContentPart::ImageUrl {
                    url: image_url.into(),
                },
                ContentPart::Text {
                    text: instruction.into(),
                },
            ]),
        }
    }

    /// An assistant turn; the content is the verbatim model output.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Text(text.into()),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),
}

/// Bounds on how many conversations the store keeps alive.
///
/// The default policy is unbounded: sessions live for the lifetime of the
/// process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Sessions with no activity for longer than this are dropped.
    pub idle_ttl: Option<Duration>,
    /// Upper bound on live sessions; the least recently active one is evicted
    /// to make room for a new session.
    pub max_sessions: Option<usize>,
}

/// Handle returned by [`ConversationStore::create_or_get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRef {
    pub session_id: String,
    /// `true` when this call allocated the conversation.
    pub created: bool,
}

#[derive(Debug)]
struct Conversation {
    turns: Vec<Turn>,
    last_activity: Instant,
}

/// Process-wide mapping from session identifier to turn history.
pub struct ConversationStore {
    system_prompt: String,
    policy: EvictionPolicy,
    sessions: Mutex<HashMap<String, Conversation>>,
}

impl ConversationStore {
    /// Creates an empty store whose conversations are seeded with `system_prompt`.
    pub fn new(system_prompt: impl Into<String>, policy: EvictionPolicy) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            policy,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the conversation for `session_id`, allocating it (seeded with the
    /// system turn) if it has never been seen.
    pub async fn create_or_get(&self, session_id: &str) -> ConversationRef {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();

        if let Some(conversation) = sessions.get_mut(session_id) {
            conversation.last_activity = now;
            return ConversationRef {
                session_id: session_id.to_string(),
                created: false,
            };
        }

        self.prune_idle(&mut sessions, now);
        if let Some(max) = self.policy.max_sessions {
            while sessions.len() >= max.max(1) {
                let Some(oldest) = sessions
                    .iter()
                    .min_by_key(|(_, c)| c.last_activity)
                    .map(|(id, _)| id.clone())
                else {
                    break;
                };
                sessions.remove(&oldest);
                info!(session_id = %oldest, "Evicted least recently active session");
            }
        }

        sessions.insert(
            session_id.to_string(),
            Conversation {
                turns: vec![Turn::system(self.system_prompt.clone())],
                last_activity: now,
            },
        );
        info!(%session_id, live_sessions = sessions.len(), "Created conversation");

        ConversationRef {
            session_id: session_id.to_string(),
            created: true,
        }
    }

    /// Appends `turn` to the end of the conversation.
    pub async fn append(&self, session_id: &str, turn: Turn) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        let conversation = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
        debug!(%session_id, role = ?turn.role, "Appending turn");
        conversation.turns.push(turn);
        conversation.last_activity = Instant::now();
        Ok(())
    }

    /// Returns the full history in insertion order.
    pub async fn snapshot(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let conversation = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
        conversation.last_activity = Instant::now();
        Ok(conversation.turns.clone())
    }

    /// Drops every session idle for longer than the policy's TTL and returns
    /// how many were removed.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.prune_idle(&mut sessions, Instant::now())
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    fn prune_idle(&self, sessions: &mut HashMap<String, Conversation>, now: Instant) -> usize {
        let Some(ttl) = self.policy.idle_ttl else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, c| now.duration_since(c.last_activity) <= ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, "Evicted idle sessions");
        }
        evicted
    }
}
