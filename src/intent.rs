use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::config::ModelProfile;
use crate::error::{ChatError, Result};
use crate::models::{
    ChatMessage, CompletionRequest, Conversation, Intention, IntentionPayload, Message,
};
use crate::prompts::Prompts;
use crate::transport::Transport;

/// Labels a conversation. Never fails: anything unexpected becomes `Random`.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, conversation: &Conversation) -> Intention;
}

pub struct ModelIntentClassifier {
    tx: Arc<dyn Transport>,
    profile: ModelProfile,
    prompts: Prompts,
    history_len: usize,
}

impl ModelIntentClassifier {
    pub fn new(
        tx: Arc<dyn Transport>,
        profile: ModelProfile,
        prompts: Prompts,
        history_len: usize,
    ) -> Self {
        Self {
            tx,
            profile,
            prompts,
            history_len,
        }
    }

    fn request(&self, recent: &[Message]) -> CompletionRequest {
        let mut messages = vec![ChatMessage {
            role: "system".to_string(),
            content: self.prompts.intention(),
        }];
        messages.extend(recent.iter().map(ChatMessage::from));

        CompletionRequest {
            model: self.profile.model.clone(),
            messages,
            temperature: self.profile.temperature,
            max_tokens: Some(50),
            response_format: Some(intention_schema()),
        }
    }

    async fn try_classify(&self, conversation: &Conversation) -> Result<Intention> {
        let request = self.request(conversation.recent(self.history_len));
        let response = self.tx.chat(&request).await?;

        let content = response.first_content().ok_or_else(|| {
            ChatError::Classification("model returned no content for intention".to_string())
        })?;
        let payload: IntentionPayload = serde_json::from_str(content).map_err(|e| {
            ChatError::Classification(format!(
                "Failed to deserialize intention JSON: {e}. Raw: {content}"
            ))
        })?;
        Ok(payload.kind)
    }
}

#[async_trait]
impl IntentClassifier for ModelIntentClassifier {
    async fn classify(&self, conversation: &Conversation) -> Intention {
        match self.try_classify(conversation).await {
            Ok(intention) => {
                tracing::info!(intention = intention.as_str(), "Classified conversation");
                intention
            }
            Err(e) => {
                tracing::warn!("Intent classification failed, defaulting to random: {}", e);
                Intention::Random
            }
        }
    }
}

/// Strict JSON-schema response format for `{"type": <intention>}`
fn intention_schema() -> serde_json::Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "intention",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["question", "hostile_message", "random"]
                    }
                },
                "required": ["type"],
                "additionalProperties": false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::transport::tests::{MockTransport, completion};

    fn classifier(tx: Arc<MockTransport>, history_len: usize) -> ModelIntentClassifier {
        ModelIntentClassifier::new(
            tx,
            ModelProfile {
                model: "test-model".to_string(),
                temperature: 0.0,
            },
            Prompts::new(IdentityConfig::default()),
            history_len,
        )
    }

    fn question() -> Conversation {
        Conversation::new(vec![Message::user("What's the capital of France?")])
    }

    #[tokio::test]
    async fn test_classifies_structured_output() {
        let tx = Arc::new(MockTransport::replying(r#"{"type":"question"}"#));
        let intention = classifier(tx.clone(), 8).classify(&question()).await;
        assert_eq!(intention, Intention::Question);

        let requests = tx.requests.lock().expect("requests recorded");
        let request = &requests[0];
        assert_eq!(request.model, "test-model");
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(
            request.response_format.as_ref().expect("schema set")["json_schema"]["name"],
            "intention"
        );
    }

    #[tokio::test]
    async fn test_history_window_truncates() {
        let tx = Arc::new(MockTransport::replying(r#"{"type":"random"}"#));
        let conversation = Conversation::new(
            (0..12).map(|i| Message::user(format!("message {i}"))).collect(),
        );
        classifier(tx.clone(), 8).classify(&conversation).await;

        let requests = tx.requests.lock().expect("requests recorded");
        // system prompt + 8 most recent
        assert_eq!(requests[0].messages.len(), 9);
        assert_eq!(requests[0].messages[1].content, "message 4");
        assert_eq!(requests[0].messages[8].content, "message 11");
    }

    #[tokio::test]
    async fn test_unparseable_output_falls_back_to_random() {
        for raw in ["not json", r#"{"type":"greeting"}"#, r#"{"kind":"question"}"#] {
            let tx = Arc::new(MockTransport::replying(raw));
            assert_eq!(
                classifier(tx, 8).classify(&question()).await,
                Intention::Random,
                "raw output {raw:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back_to_random() {
        let tx = Arc::new(MockTransport::new(vec![Err(ChatError::Upstream {
            service: "chat completions",
            status: 500,
            body: "boom".into(),
        })]));
        assert_eq!(
            classifier(tx, 8).classify(&question()).await,
            Intention::Random
        );
    }

    #[tokio::test]
    async fn test_empty_choices_falls_back_to_random() {
        let mut response = completion("");
        response.choices.clear();
        let tx = Arc::new(MockTransport::new(vec![Ok(response)]));
        assert_eq!(
            classifier(tx, 8).classify(&question()).await,
            Intention::Random
        );
    }
}
