//! Contains the turn-completion protocol run for every `message` and `photo` frame.

use crate::{state::AppState, ws::protocol::ServerFrame};
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tutor_core::{
    conversation::{StoreError, Turn},
    llm_client::GatewayError,
    normalizer::{DecodeMode, normalize},
    speech::{SpeechError, SpeechSynthesizer, spoken_text},
};

/// Speed used for reply audio.
const REPLY_SPEECH_SPEED: f32 = 1.0;

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Handles a single user turn.
///
/// This involves:
/// 1.  Appending the user turn to the conversation.
/// 2.  Sending the whole history to the completion gateway.
/// 3.  Normalizing the raw output into a reply.
/// 4.  Appending the raw output, verbatim, as the assistant turn.
/// 5.  Optionally, attaching synthesized audio of the reply text.
///
/// If the gateway fails the user turn stays in the history and no assistant
/// turn is added.
pub async fn run_turn(
    state: &AppState,
    session_id: &str,
    user_turn: Turn,
) -> Result<ServerFrame, TurnError> {
    state.store.append(session_id, user_turn).await?;
    let history = state.store.snapshot(session_id).await?;

    let raw = state.gateway.complete(&history).await?;
    debug!(raw = %raw, "Raw model output");

    let envelope = normalize(&raw, DecodeMode::Strict);
    state.store.append(session_id, Turn::assistant(raw)).await?;

    let audio = match (&state.speech, envelope.text.as_deref()) {
        (Some(speech), Some(text)) => reply_audio(speech, text).await,
        _ => None,
    };

    info!(kind = envelope.kind.as_str(), action = ?envelope.action, "Reply ready");
    Ok(ServerFrame::reply(envelope, audio))
}

async fn reply_audio(speech: &Arc<dyn SpeechSynthesizer>, text: &str) -> Option<String> {
    match synthesize_base64(speech, text, REPLY_SPEECH_SPEED, None).await {
        Ok(audio) => audio,
        Err(e) => {
            warn!(error = %e, "Speech synthesis failed, sending reply without audio");
            None
        }
    }
}

/// Synthesizes `text` and returns it base64 encoded, or `None` when nothing
/// is left to speak after cleanup.
pub(crate) async fn synthesize_base64(
    speech: &Arc<dyn SpeechSynthesizer>,
    text: &str,
    speed: f32,
    voice: Option<&str>,
) -> Result<Option<String>, SpeechError> {
    let spoken = spoken_text(text);
    if spoken.is_empty() {
        return Ok(None);
    }
    let audio = speech.synthesize(&spoken, speed, voice).await?;
    Ok(Some(base64::engine::general_purpose::STANDARD.encode(audio)))
}
