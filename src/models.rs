use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Chronologically ordered messages. Messages are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// The last `window` messages, oldest first
    pub fn recent(&self, window: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    pub fn word_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum()
    }
}

/// Body of `POST /chat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub chat: Conversation,
}

/// Passage returned by the vector index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub pre_context: String,
    pub post_context: String,
    pub source_url: String,
    pub source_description: String,
    pub order: i64,
}

/// Chunks sharing one `source_url`, sorted by `order`
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub source_url: String,
    pub source_description: String,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source_url: String,
    pub source_description: String,
}

/// Shown in place of an empty source description
pub const UNSPECIFIED_SOURCE: &str = "Unspecified source";

impl Citation {
    pub fn label(&self) -> &str {
        if self.source_description.trim().is_empty() {
            UNSPECIFIED_SOURCE
        } else {
            &self.source_description
        }
    }
}

impl From<&Source> for Citation {
    fn from(source: &Source) -> Self {
        Self {
            source_url: source.source_url.clone(),
            source_description: source.source_description.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intention {
    Question,
    HostileMessage,
    Random,
}

impl Intention {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intention::Question => "question",
            Intention::HostileMessage => "hostile_message",
            Intention::Random => "random",
        }
    }
}

/// Structured output the classifier model is asked to produce
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentionPayload {
    #[serde(rename = "type")]
    pub kind: Intention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Fireworks,
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderName::OpenAi => write!(f, "openai"),
            ProviderName::Anthropic => write!(f, "anthropic"),
            ProviderName::Fireworks => write!(f, "fireworks"),
        }
    }
}

// OpenAI-compatible chat message format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

// OpenAI-compatible completion request format
#[derive(Debug, Serialize, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

// OpenAI-compatible completion response format
#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
}

impl CompletionResponse {
    /// Content of the first choice, if the model produced any
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_ignores_display_fields() {
        let body = r#"{"chat":{"messages":[
            {"role":"assistant","content":"Hello","citations":[]},
            {"role":"user","content":"What's the capital of France?"}
        ]}}"#;
        let request: ChatRequest = serde_json::from_str(body).expect("valid chat body");
        assert_eq!(request.chat.len(), 2);
        assert_eq!(request.chat.messages[1].role, Role::User);
    }

    #[test]
    fn test_recent_window_keeps_latest_messages() {
        let conversation = Conversation::new(
            (0..10).map(|i| Message::user(format!("m{i}"))).collect(),
        );
        let recent = conversation.recent(8);
        assert_eq!(recent.len(), 8);
        assert_eq!(recent[0].content, "m2");
        assert_eq!(recent[7].content, "m9");
        assert_eq!(conversation.recent(50).len(), 10);
    }

    #[test]
    fn test_intention_payload_wire_format() {
        let payload: IntentionPayload =
            serde_json::from_str(r#"{"type":"hostile_message"}"#).expect("valid payload");
        assert_eq!(payload.kind, Intention::HostileMessage);
        assert!(serde_json::from_str::<IntentionPayload>(r#"{"type":"greeting"}"#).is_err());
    }

    #[test]
    fn test_provider_names_round_trip() {
        let name: ProviderName = serde_json::from_str(r#""openai""#).expect("known provider");
        assert_eq!(name, ProviderName::OpenAi);
        assert_eq!(ProviderName::Anthropic.to_string(), "anthropic");
    }

    #[test]
    fn test_empty_citation_description_gets_a_label() {
        let mut citation = Citation {
            source_url: "wiki.org".into(),
            source_description: "  ".into(),
        };
        assert_eq!(citation.label(), UNSPECIFIED_SOURCE);
        citation.source_description = "Wiki".into();
        assert_eq!(citation.label(), "Wiki");
    }
}
