//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the conversation
//! store and the service clients shared by every connection.

use crate::config::UnboundFramePolicy;
use std::sync::Arc;
use tutor_core::{
    conversation::ConversationStore, llm_client::CompletionGateway, speech::SpeechSynthesizer,
};

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConversationStore>,
    pub gateway: Arc<dyn CompletionGateway>,
    /// `None` when speech synthesis is disabled.
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    pub unbound_frame_policy: UnboundFramePolicy,
}
