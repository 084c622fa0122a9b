use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ChatProvider, DeltaStream, GenerationRequest};
use crate::config::AnthropicConfig;
use crate::error::ProviderError;
use crate::models::{Message, ProviderName, Role};
use crate::streaming::LineBuffer;

const PROVIDER: ProviderName = ProviderName::Anthropic;

/// Events pushed to a message-stream subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum MessageStreamEvent {
    TextDelta(String),
    End,
    Error(ProviderError),
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<MessageParam<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct MessageParam<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    ContentBlockDelta { delta: BlockDelta },
    MessageStop,
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// Event-callback adapter for the Anthropic Messages API
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    endpoint: String,
    version: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(cfg: &AnthropicConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: cfg.api_key.clone(),
            endpoint: format!("{}/messages", cfg.base_url.trim_end_matches('/')),
            version: cfg.version.clone(),
            max_tokens: cfg.max_tokens,
        }
    }

    /// Send the request and check the status; the body is the SSE stream
    async fn open(&self, request: &GenerationRequest) -> Result<reqwest::Response, ProviderError> {
        let body = MessagesRequest {
            model: &request.model,
            system: &request.system_prompt,
            messages: to_anthropic_messages(&request.messages),
            max_tokens: self.max_tokens,
            temperature: request.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|env| env.error.message)
                .unwrap_or(text);
            return Err(ProviderError::from_status(PROVIDER, status.as_u16(), message));
        }
        Ok(response)
    }
}

/// Anthropic accepts only user/assistant turns and the first must be the user's
fn to_anthropic_messages(messages: &[Message]) -> Vec<MessageParam<'_>> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .skip_while(|m| m.role != Role::User)
        .map(|m| MessageParam {
            role: if m.role == Role::User { "user" } else { "assistant" },
            content: &m.content,
        })
        .collect()
}

fn error_event(error: ErrorBody) -> ProviderError {
    match error.kind.as_str() {
        "authentication_error" | "permission_error" => ProviderError::Auth {
            provider: PROVIDER,
            message: error.message,
        },
        "rate_limit_error" => ProviderError::RateLimited {
            provider: PROVIDER,
            message: error.message,
        },
        "overloaded_error" => ProviderError::Api {
            provider: PROVIDER,
            status: Some(529),
            message: error.message,
        },
        _ => ProviderError::Api {
            provider: PROVIDER,
            status: None,
            message: format!("{}: {}", error.kind, error.message),
        },
    }
}

/// Interpret one SSE line. Only `data:` lines carry events.
fn parse_sse_line(line: &[u8]) -> Option<MessageStreamEvent> {
    let data = line.strip_prefix(b"data:")?.trim_ascii_start();
    match serde_json::from_slice::<SseEvent>(data) {
        Ok(SseEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        }) => Some(MessageStreamEvent::TextDelta(text)),
        Ok(SseEvent::MessageStop) => Some(MessageStreamEvent::End),
        Ok(SseEvent::Error { error }) => Some(MessageStreamEvent::Error(error_event(error))),
        Ok(_) => None,
        Err(e) => Some(MessageStreamEvent::Error(ProviderError::Malformed {
            provider: PROVIDER,
            message: format!(
                "unparseable event {:?}: {e}",
                String::from_utf8_lossy(data)
            ),
        })),
    }
}

/// Read an SSE byte stream and push each event to `on_event` until the
/// message ends, an error occurs, or the subscriber breaks.
/// A stream that closes without `message_stop` is reported as malformed.
pub async fn subscribe<S, E, F>(bytes: S, mut on_event: F)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
    F: FnMut(MessageStreamEvent) -> ControlFlow<()>,
{
    let mut bytes = bytes;
    let mut lines = LineBuffer::default();

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = on_event(MessageStreamEvent::Error(ProviderError::Transport {
                    provider: PROVIDER,
                    message: e.to_string(),
                }));
                return;
            }
        };
        for line in lines.push(&chunk) {
            let Some(event) = parse_sse_line(&line) else {
                continue;
            };
            let terminal = matches!(
                event,
                MessageStreamEvent::End | MessageStreamEvent::Error(_)
            );
            if on_event(event).is_break() || terminal {
                return;
            }
        }
    }

    let _ = on_event(MessageStreamEvent::Error(ProviderError::Malformed {
        provider: PROVIDER,
        message: "stream closed before message_stop".to_string(),
    }));
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> ProviderName {
        PROVIDER
    }

    async fn stream(&self, request: GenerationRequest) -> Result<DeltaStream, ProviderError> {
        tracing::info!(
            provider = %PROVIDER,
            model = %request.model,
            temperature = request.temperature,
            messages = request.messages.len(),
            "Streaming Anthropic message"
        );
        let response = self.open(&request).await?;

        // Events are pushed from a reader task into a channel the caller polls
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(subscribe(response.bytes_stream().boxed(), move |event| {
            let sent = match event {
                MessageStreamEvent::TextDelta(text) => tx.send(Ok(text)),
                MessageStreamEvent::Error(e) => tx.send(Err(e)),
                MessageStreamEvent::End => {
                    tracing::debug!("Anthropic message stream ended");
                    Ok(())
                }
            };
            if sent.is_err() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }));

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
