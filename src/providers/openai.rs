use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse,
    },
};
use async_trait::async_trait;
use futures::StreamExt;

use super::{ChatProvider, DeltaStream, GenerationRequest};
use crate::error::ProviderError;
use crate::models::{Message, ProviderName, Role};

/// Poll-style adapter for OpenAI-compatible streaming chat completions.
/// Serves both OpenAI and Fireworks, which differ only in base URL and key.
pub struct OpenAiProvider {
    name: ProviderName,
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    pub fn new(name: ProviderName, api_key: &str, base_url: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key.to_string())
            .with_api_base(base_url.to_string());
        Self {
            name,
            client: Client::with_config(config),
        }
    }

    fn build_messages(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system_prompt.clone())
                .build()?
                .into(),
        );
        for message in &request.messages {
            messages.push(to_openai_message(message)?);
        }
        Ok(messages)
    }
}

fn to_openai_message(message: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let content = message.content.clone();
    Ok(match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()?
            .into(),
    })
}

/// The text fragment carried by one streamed chunk, if any
fn chunk_text(chunk: CreateChatCompletionStreamResponse) -> Option<String> {
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty())
}

/// HTTP status of a rejected event-stream request, as reported in the stream error text
fn stream_status(message: &str) -> Option<u16> {
    message
        .strip_prefix("Invalid status code: ")?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

fn classify_error(provider: ProviderName, error: OpenAIError) -> ProviderError {
    match error {
        OpenAIError::Reqwest(e) => match e.status() {
            Some(status) => ProviderError::from_status(provider, status.as_u16(), e.to_string()),
            None => ProviderError::Transport {
                provider,
                message: e.to_string(),
            },
        },
        OpenAIError::ApiError(api) => {
            let kind = format!(
                "{} {}",
                api.r#type.as_deref().unwrap_or_default(),
                api.code.as_deref().unwrap_or_default()
            );
            if kind.contains("invalid_api_key") || kind.contains("auth") {
                ProviderError::Auth {
                    provider,
                    message: api.message,
                }
            } else if kind.contains("rate_limit") || kind.contains("insufficient_quota") {
                ProviderError::RateLimited {
                    provider,
                    message: api.message,
                }
            } else {
                ProviderError::Api {
                    provider,
                    status: None,
                    message: api.message,
                }
            }
        }
        OpenAIError::JSONDeserialize(e) => ProviderError::Malformed {
            provider,
            message: e.to_string(),
        },
        OpenAIError::StreamError(message) => match stream_status(&message) {
            Some(status) => ProviderError::from_status(provider, status, message),
            None => ProviderError::Transport { provider, message },
        },
        other => ProviderError::Api {
            provider,
            status: None,
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    async fn stream(&self, request: GenerationRequest) -> Result<DeltaStream, ProviderError> {
        let provider = self.name;
        tracing::info!(
            provider = %provider,
            model = %request.model,
            temperature = request.temperature,
            messages = request.messages.len(),
            "Streaming chat completion"
        );

        let messages = self
            .build_messages(&request)
            .map_err(|e| classify_error(provider, e))?;
        let completion = CreateChatCompletionRequestArgs::default()
            .model(request.model.clone())
            .messages(messages)
            .temperature(request.temperature)
            .stream(true)
            .build()
            .map_err(|e| classify_error(provider, e))?;

        let chunks = self
            .client
            .chat()
            .create_stream(completion)
            .await
            .map_err(|e| classify_error(provider, e))?;

        let mut deltas = chunks
            .filter_map(move |item| async move {
                match item {
                    Ok(chunk) => chunk_text(chunk).map(Ok),
                    Err(e) => Some(Err(classify_error(provider, e))),
                }
            })
            .boxed();

        // A rejected request only shows up as the first stream item
        match deltas.next().await {
            Some(Err(e)) => Err(e),
            Some(Ok(first)) => Ok(futures::stream::iter([Ok(first)]).chain(deltas).boxed()),
            None => Ok(futures::stream::empty().boxed()),
        }
    }
}
