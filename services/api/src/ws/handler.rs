//! Per-connection protocol state machine.
//!
//! A connection starts unbound. A `session` frame binds it to a conversation
//! (creating the conversation on first use); `message` and `photo` frames then
//! run the turn-completion protocol against the bound conversation. Every
//! inbound frame produces at most one outbound frame.

use super::{
    cycle::{TurnError, run_turn, synthesize_base64},
    protocol::{
        ClientFrame, Inbound, SPEECH_DISABLED_MESSAGE, ServerFrame, UNBOUND_ERROR_MESSAGE,
        decode_client_frame,
    },
};
use crate::{config::UnboundFramePolicy, state::AppState};
use std::sync::Arc;
use tracing::{error, info, warn};
use tutor_core::{
    conversation::{StoreError, Turn},
    prompt::PHOTO_INSTRUCTION,
};

const DEFAULT_SPEECH_SPEED: f32 = 1.0;

pub struct SessionProtocolHandler {
    state: Arc<AppState>,
    /// `None` while unbound.
    session_id: Option<String>,
}

impl SessionProtocolHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            session_id: None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Decodes and processes one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) -> Option<ServerFrame> {
        match decode_client_frame(text) {
            Inbound::Frame(frame) => self.handle_frame(frame).await,
            Inbound::Unknown(frame_type) => {
                warn!(?frame_type, "Ignoring frame with unknown type");
                None
            }
            Inbound::Malformed(reason) => {
                warn!(%reason, "Received malformed frame");
                Some(ServerFrame::generic_error())
            }
        }
    }

    pub async fn handle_frame(&mut self, frame: ClientFrame) -> Option<ServerFrame> {
        match frame {
            ClientFrame::Session { session_id } => {
                let conversation = self.state.store.create_or_get(&session_id).await;
                tracing::Span::current().record("session_id", session_id.as_str());
                info!(%session_id, created = conversation.created, "Connection bound to session");
                self.session_id = Some(session_id);
                None
            }
            ClientFrame::Message { text } => self.complete_turn(Turn::user_text(text)).await,
            ClientFrame::Photo { data } => {
                self.complete_turn(Turn::user_photo(data, PHOTO_INSTRUCTION))
                    .await
            }
            ClientFrame::GenerateAudio {
                text,
                voice_name,
                speed,
            } => Some(
                self.generate_audio(&text, voice_name.as_deref(), speed)
                    .await,
            ),
        }
    }

    async fn complete_turn(&self, turn: Turn) -> Option<ServerFrame> {
        let Some(session_id) = self.session_id.as_deref() else {
            return match self.state.unbound_frame_policy {
                UnboundFramePolicy::Ignore => {
                    warn!("Dropping frame received before a session was bound");
                    None
                }
                UnboundFramePolicy::Reject => {
                    warn!("Rejecting frame received before a session was bound");
                    Some(ServerFrame::error(UNBOUND_ERROR_MESSAGE))
                }
            };
        };

        let result = match run_turn(&self.state, session_id, turn.clone()).await {
            // The store evicted the bound conversation. Start it over and retry once.
            Err(TurnError::Store(StoreError::UnknownSession(_))) => {
                warn!(%session_id, "Bound session was evicted, recreating it");
                self.state.store.create_or_get(session_id).await;
                run_turn(&self.state, session_id, turn).await
            }
            other => other,
        };

        match result {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(error = ?e, %session_id, "Turn failed");
                Some(ServerFrame::generic_error())
            }
        }
    }

    async fn generate_audio(
        &self,
        text: &str,
        voice: Option<&str>,
        speed: Option<f32>,
    ) -> ServerFrame {
        let Some(speech) = &self.state.speech else {
            warn!("Audio requested but speech synthesis is disabled");
            return ServerFrame::error(SPEECH_DISABLED_MESSAGE);
        };

        match synthesize_base64(speech, text, speed.unwrap_or(DEFAULT_SPEECH_SPEED), voice).await {
            Ok(Some(audio)) => ServerFrame::Audio { audio },
            Ok(None) => ServerFrame::generic_error(),
            Err(e) => {
                error!(error = ?e, "Speech synthesis failed");
                ServerFrame::generic_error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::GENERIC_ERROR_MESSAGE;
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::Mutex;
    use tutor_core::{
        conversation::{ContentPart, ConversationStore, EvictionPolicy, Role, TurnContent},
        llm_client::{CompletionGateway, GatewayError},
        speech::{SpeechError, SpeechSynthesizer},
    };

    mock! {
        pub Gateway {}

        #[async_trait]
        impl CompletionGateway for Gateway {
            async fn complete(&self, history: &[Turn]) -> Result<String, GatewayError>;
        }
    }

    struct FakeSpeech {
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSpeech {
        async fn synthesize(
            &self,
            _text: &str,
            _speed: f32,
            _voice: Option<&str>,
        ) -> Result<Vec<u8>, SpeechError> {
            if self.fail {
                Err(SpeechError::MissingAudio)
            } else {
                Ok(vec![1, 2, 3])
            }
        }
    }

    const PROMPT: &str = "You are a tutor.";

    fn app_state(
        gateway: MockGateway,
        speech: Option<Arc<dyn SpeechSynthesizer>>,
        policy: UnboundFramePolicy,
    ) -> Arc<AppState> {
        app_state_with_eviction(gateway, speech, policy, EvictionPolicy::default())
    }

    fn app_state_with_eviction(
        gateway: MockGateway,
        speech: Option<Arc<dyn SpeechSynthesizer>>,
        policy: UnboundFramePolicy,
        eviction: EvictionPolicy,
    ) -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(ConversationStore::new(PROMPT, eviction)),
            gateway: Arc::new(gateway),
            speech,
            unbound_frame_policy: policy,
        })
    }

    fn replying(raw: &'static str) -> MockGateway {
        let mut gateway = MockGateway::new();
        gateway
            .expect_complete()
            .returning(move |_| Ok(raw.to_string()));
        gateway
    }

    #[tokio::test]
    async fn test_session_frame_is_idempotent() {
        let state = app_state(MockGateway::new(), None, UnboundFramePolicy::Ignore);
        let mut handler = SessionProtocolHandler::new(state.clone());

        let frame = r#"{"type":"session","sessionId":"s1"}"#;
        assert_eq!(handler.handle_text(frame).await, None);
        assert_eq!(handler.handle_text(frame).await, None);

        assert_eq!(handler.session_id(), Some("s1"));
        assert_eq!(state.store.snapshot("s1").await.unwrap(), vec![Turn::system(PROMPT)]);
    }

    #[tokio::test]
    async fn test_message_produces_reply_and_records_raw_output() {
        let raw = "```yaml\ntype: text\nresponse: \"Hello\"\n```";
        let state = app_state(replying(raw), None, UnboundFramePolicy::Ignore);
        let mut handler = SessionProtocolHandler::new(state.clone());

        handler.handle_text(r#"{"type":"session","sessionId":"s1"}"#).await;
        let reply = handler
            .handle_text(r#"{"type":"message","text":"hi"}"#)
            .await;

        assert_eq!(
            reply,
            Some(ServerFrame::Text {
                response: "Hello".to_string(),
                write: None,
                audio: None
            })
        );
        let history = state.store.snapshot("s1").await.unwrap();
        assert_eq!(
            history,
            vec![Turn::system(PROMPT), Turn::user_text("hi"), Turn::assistant(raw)]
        );
    }

    #[tokio::test]
    async fn test_photo_appends_image_then_instruction() {
        let raw = "type: action\nresponse: Nice picture, now read it aloud\naction: record";
        let state = app_state(replying(raw), None, UnboundFramePolicy::Ignore);
        let mut handler = SessionProtocolHandler::new(state.clone());

        handler.handle_text(r#"{"type":"session","sessionId":"s1"}"#).await;
        let reply = handler
            .handle_text(r#"{"type":"photo","data":"data:image/jpeg;base64,/9j/"}"#)
            .await;

        assert_eq!(
            reply,
            Some(ServerFrame::Action {
                response: "Nice picture, now read it aloud".to_string(),
                action: "record".to_string(),
                write: None,
                audio: None
            })
        );
        let history = state.store.snapshot("s1").await.unwrap();
        assert_eq!(history[1].role, Role::User);
        assert_eq!(
            history[1].content,
            TurnContent::Parts(vec![
                ContentPart::ImageUrl {
                    url: "data:image/jpeg;base64,/9j/".to_string()
                },
                ContentPart::Text {
                    text: PHOTO_INSTRUCTION.to_string()
                },
            ])
        );
    }

    #[tokio::test]
    async fn test_evicted_session_is_recreated_on_next_turn() {
        let state = app_state_with_eviction(
            replying("type: text\nresponse: welcome back"),
            None,
            UnboundFramePolicy::Ignore,
            EvictionPolicy {
                idle_ttl: None,
                max_sessions: Some(1),
            },
        );
        let mut first = SessionProtocolHandler::new(state.clone());
        let mut second = SessionProtocolHandler::new(state.clone());

        first.handle_text(r#"{"type":"session","sessionId":"a"}"#).await;
        second.handle_text(r#"{"type":"session","sessionId":"b"}"#).await;
        assert!(state.store.snapshot("a").await.is_err());

        for _ in 0..2 {
            let reply = first
                .handle_text(r#"{"type":"message","text":"still there?"}"#)
                .await;
            assert_eq!(
                reply,
                Some(ServerFrame::Text {
                    response: "welcome back".to_string(),
                    write: None,
                    audio: None
                })
            );
        }

        let history = state.store.snapshot("a").await.unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0], Turn::system(PROMPT));
        assert_eq!(history[1], Turn::user_text("still there?"));
        assert_eq!(first.session_id(), Some("a"));
    }

    #[tokio::test]
    async fn test_unbound_message_is_ignored() {
        let mut gateway = MockGateway::new();
        gateway.expect_complete().never();
        let state = app_state(gateway, None, UnboundFramePolicy::Ignore);
        let mut handler = SessionProtocolHandler::new(state.clone());

        let reply = handler
            .handle_text(r#"{"type":"message","text":"hi"}"#)
            .await;
        assert_eq!(reply, None);
        assert!(state.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unbound_message_is_rejected_when_configured() {
        let mut gateway = MockGateway::new();
        gateway.expect_complete().never();
        let state = app_state(gateway, None, UnboundFramePolicy::Reject);
        let mut handler = SessionProtocolHandler::new(state);

        let reply = handler
            .handle_text(r#"{"type":"photo","data":"data:,"}"#)
            .await;
        assert_eq!(reply, Some(ServerFrame::error(UNBOUND_ERROR_MESSAGE)));
    }

    #[tokio::test]
    async fn test_malformed_frame_yields_generic_error_without_state_change() {
        let state = app_state(MockGateway::new(), None, UnboundFramePolicy::Ignore);
        let mut handler = SessionProtocolHandler::new(state.clone());

        handler.handle_text(r#"{"type":"session","sessionId":"s1"}"#).await;
        let reply = handler.handle_text("{not json").await;

        assert_eq!(
            reply,
            Some(ServerFrame::Error {
                message: GENERIC_ERROR_MESSAGE.to_string()
            })
        );
        assert_eq!(state.store.snapshot("s1").await.unwrap().len(), 1);
        assert_eq!(handler.session_id(), Some("s1"));
    }

    #[tokio::test]
    async fn test_unknown_frame_type_is_dropped() {
        let state = app_state(MockGateway::new(), None, UnboundFramePolicy::Ignore);
        let mut handler = SessionProtocolHandler::new(state);

        assert_eq!(handler.handle_text(r#"{"type":"wave"}"#).await, None);
    }

    #[tokio::test]
    async fn test_gateway_failure_keeps_user_turn_only() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_complete()
            .times(1)
            .returning(|_| Err(GatewayError::EmptyResponse));
        let state = app_state(gateway, None, UnboundFramePolicy::Ignore);
        let mut handler = SessionProtocolHandler::new(state.clone());

        handler.handle_text(r#"{"type":"session","sessionId":"s1"}"#).await;
        let reply = handler
            .handle_text(r#"{"type":"message","text":"hi"}"#)
            .await;

        assert_eq!(reply, Some(ServerFrame::generic_error()));
        let history = state.store.snapshot("s1").await.unwrap();
        assert_eq!(history, vec![Turn::system(PROMPT), Turn::user_text("hi")]);
    }

    #[tokio::test]
    async fn test_replies_follow_frame_order_with_growing_history() {
        let seen: Arc<Mutex<Vec<Vec<Turn>>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let mut gateway = MockGateway::new();
        gateway.expect_complete().times(3).returning(move |history| {
            let mut seen = recorder.lock().unwrap();
            seen.push(history.to_vec());
            Ok(format!("type: text\nresponse: reply {}", seen.len()))
        });
        let state = app_state(gateway, None, UnboundFramePolicy::Ignore);
        let mut handler = SessionProtocolHandler::new(state);

        handler.handle_text(r#"{"type":"session","sessionId":"s1"}"#).await;
        let mut replies = Vec::new();
        for text in ["one", "two", "three"] {
            let frame = serde_json::json!({"type": "message", "text": text}).to_string();
            replies.push(handler.handle_text(&frame).await);
        }

        let responses: Vec<String> = replies
            .into_iter()
            .map(|reply| match reply {
                Some(ServerFrame::Text { response, .. }) => response,
                other => panic!("unexpected reply: {:?}", other),
            })
            .collect();
        assert_eq!(responses, vec!["reply 1", "reply 2", "reply 3"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[1].len(), 4);
        assert_eq!(seen[2].len(), 6);
        assert_eq!(seen[1][2], Turn::assistant("type: text\nresponse: reply 1"));
        assert_eq!(seen[2][4], Turn::assistant("type: text\nresponse: reply 2"));
    }

    #[tokio::test]
    async fn test_rebinding_keeps_conversations_separate() {
        let state = app_state(
            replying("type: text\nresponse: ok"),
            None,
            UnboundFramePolicy::Ignore,
        );
        let mut handler = SessionProtocolHandler::new(state.clone());

        handler.handle_text(r#"{"type":"session","sessionId":"a"}"#).await;
        handler.handle_text(r#"{"type":"message","text":"to a"}"#).await;
        handler.handle_text(r#"{"type":"session","sessionId":"b"}"#).await;
        handler.handle_text(r#"{"type":"message","text":"to b"}"#).await;
        handler.handle_text(r#"{"type":"session","sessionId":"a"}"#).await;

        let a = state.store.snapshot("a").await.unwrap();
        let b = state.store.snapshot("b").await.unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 3);
        assert_eq!(a[1], Turn::user_text("to a"));
        assert_eq!(b[1], Turn::user_text("to b"));
    }

    #[tokio::test]
    async fn test_reply_carries_audio_when_speech_enabled() {
        let state = app_state(
            replying("type: text\nresponse: Great job today!"),
            Some(Arc::new(FakeSpeech { fail: false })),
            UnboundFramePolicy::Ignore,
        );
        let mut handler = SessionProtocolHandler::new(state);

        handler.handle_text(r#"{"type":"session","sessionId":"s1"}"#).await;
        let reply = handler
            .handle_text(r#"{"type":"message","text":"done"}"#)
            .await;

        assert_eq!(
            reply,
            Some(ServerFrame::Text {
                response: "Great job today!".to_string(),
                write: None,
                audio: Some("AQID".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_speech_failure_still_sends_reply() {
        let state = app_state(
            replying("Great job today!"),
            Some(Arc::new(FakeSpeech { fail: true })),
            UnboundFramePolicy::Ignore,
        );
        let mut handler = SessionProtocolHandler::new(state);

        handler.handle_text(r#"{"type":"session","sessionId":"s1"}"#).await;
        let reply = handler
            .handle_text(r#"{"type":"message","text":"done"}"#)
            .await;

        assert_eq!(
            reply,
            Some(ServerFrame::Text {
                response: "Great job today!".to_string(),
                write: None,
                audio: None
            })
        );
    }

    #[tokio::test]
    async fn test_generate_audio() {
        let state = app_state(
            MockGateway::new(),
            Some(Arc::new(FakeSpeech { fail: false })),
            UnboundFramePolicy::Ignore,
        );
        let mut handler = SessionProtocolHandler::new(state);

        let reply = handler
            .handle_text(r#"{"type":"generate-audio","text":"Hello","speed":0.9}"#)
            .await;
        assert_eq!(
            reply,
            Some(ServerFrame::Audio {
                audio: "AQID".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_generate_audio_without_speech() {
        let state = app_state(MockGateway::new(), None, UnboundFramePolicy::Ignore);
        let mut handler = SessionProtocolHandler::new(state);

        let reply = handler
            .handle_text(r#"{"type":"generate-audio","text":"Hello"}"#)
            .await;
        assert_eq!(reply, Some(ServerFrame::error(SPEECH_DISABLED_MESSAGE)));
    }
}
