use crate::conversation::{ContentPart, Role, Turn, TurnContent};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, ImageUrlArgs,
    },
};
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Completion request failed: {0}")]
    Request(#[from] OpenAIError),
    #[error("Completion response had no choices")]
    NoChoices,
    #[error("Completion response had no text content")]
    EmptyResponse,
}

/// A remote completion service.
///
/// Calls are stateless: every call receives the whole conversation, system
/// turn first, and returns the assistant's raw text.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn complete(&self, history: &[Turn]) -> Result<String, GatewayError>;
}

/// An implementation of `CompletionGateway` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "gpt-4o").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl CompletionGateway for OpenAICompatibleClient {
    async fn complete(&self, history: &[Turn]) -> Result<String, GatewayError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(to_chat_messages(history)?)
            .build()?;

        debug!(model = %self.model, turns = history.len(), "Requesting completion");
        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;
        let choice = response.choices.first().ok_or(GatewayError::NoChoices)?;

        match &choice.message.content {
            Some(content) if !content.trim().is_empty() => Ok(content.clone()),
            _ => Err(GatewayError::EmptyResponse),
        }
    }
}

/// Maps conversation turns onto chat-completion request messages.
pub fn to_chat_messages(history: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
    history
        .iter()
        .map(|turn| {
            Ok(match turn.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(flatten_text(&turn.content))
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(flatten_text(&turn.content))
                    .build()?
                    .into(),
                Role::User => match &turn.content {
                    TurnContent::Text(text) => ChatCompletionRequestUserMessageArgs::default()
                        .content(text.clone())
                        .build()?
                        .into(),
                    TurnContent::Parts(parts) => ChatCompletionRequestUserMessageArgs::default()
                        .content(
                            parts
                                .iter()
                                .map(to_user_part)
                                .collect::<Result<Vec<_>, OpenAIError>>()?,
                        )
                        .build()?
                        .into(),
                },
            })
        })
        .collect()
}

fn to_user_part(
    part: &ContentPart,
) -> Result<ChatCompletionRequestUserMessageContentPart, OpenAIError> {
    Ok(match part {
        ContentPart::Text { text } => ChatCompletionRequestUserMessageContentPart::Text(
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(text.clone())
                .build()?,
        ),
        ContentPart::ImageUrl { url } => ChatCompletionRequestUserMessageContentPart::ImageUrl(
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(ImageUrlArgs::default().url(url.clone()).build()?)
                .build()?,
        ),
    })
}

/// System and assistant messages are text only; image parts are dropped.
fn flatten_text(content: &TurnContent) -> String {
    match content {
        TurnContent::Text(text) => text.clone(),
        TurnContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
