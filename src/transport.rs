use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::{ChatError, Result};
use crate::models::{CompletionRequest, CompletionResponse};
use crate::retry::RetryPolicy;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Non-streaming chat completion, used for classification and HyDE
#[async_trait]
pub trait Transport: Send + Sync {
    async fn chat(&self, req: &CompletionRequest) -> Result<CompletionResponse>;
}

/// Transport for any OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiTransport {
    client: Client,
    api_key: String,
    endpoint: String,
    retry: RetryPolicy,
}

impl OpenAiTransport {
    pub fn new(api_key: String, base_url: &str, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            retry,
        })
    }

    async fn send_once(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChatError::Upstream {
                service: "chat completions",
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| {
            ChatError::Internal(format!("Failed to parse chat completion response: {e}"))
        })
    }
}

#[async_trait]
impl Transport for OpenAiTransport {
    async fn chat(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        tracing::debug!(model = %req.model, messages = req.messages.len(), "chat completion");
        self.retry
            .run("chat completion", || self.send_once(req))
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Choice, ChoiceMessage};
    use std::sync::Mutex;

    /// Replays canned responses and records every request it receives
    pub(crate) struct MockTransport {
        responses: Mutex<Vec<Result<CompletionResponse>>>,
        pub(crate) requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockTransport {
        pub(crate) fn new(mut responses: Vec<Result<CompletionResponse>>) -> Self {
            responses.reverse();
            MockTransport {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn replying(content: &str) -> Self {
            Self::new(vec![Ok(completion(content))])
        }
    }

    pub(crate) fn completion(content: &str) -> CompletionResponse {
        CompletionResponse {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some(content.to_string()),
                    refusal: None,
                },
            }],
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn chat(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
            self.requests
                .lock()
                .expect("Mock transport mutex should not be poisoned")
                .push(req.clone());
            let mut responses = self
                .responses
                .lock()
                .expect("Mock transport mutex should not be poisoned");
            responses
                .pop()
                .unwrap_or_else(|| Err(ChatError::Internal("No more mock responses".to_string())))
        }
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let transport =
            OpenAiTransport::new("key".into(), "https://api.openai.com/v1/", RetryPolicy::none())
                .expect("client builds");
        assert_eq!(
            transport.endpoint,
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_openai_transport_chat() {
        // Only exercised against the real API when a key is present
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            let transport =
                OpenAiTransport::new(api_key, "https://api.openai.com/v1", RetryPolicy::none())
                    .expect("client builds");
            let req = CompletionRequest {
                model: "gpt-4o-mini".to_string(),
                messages: vec![crate::models::ChatMessage {
                    role: "user".to_string(),
                    content: "What is the capital of France?".to_string(),
                }],
                temperature: 0.0,
                max_tokens: Some(20),
                response_format: None,
            };
            let res = transport.chat(&req).await;
            assert!(res.is_ok());
        }
    }
}
