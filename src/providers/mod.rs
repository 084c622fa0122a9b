//! Chat-completion backends behind one streaming contract.
//!
//! Every backend turns a [`GenerationRequest`] into a [`DeltaStream`]: a
//! sequence of text fragments that ends when the model is finished, or yields
//! a [`ProviderError`] if the backend fails at any point. Backends differ in
//! how they deliver fragments (polled chunk iterators for OpenAI-compatible
//! APIs, pushed events for Anthropic) and the adapters hide that difference.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::models::{Message, ProviderName};

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Text fragments in arrival order
pub type DeltaStream = BoxStream<'static, Result<String, ProviderError>>;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    /// Conversation without the system prompt; adapters place it as their API expects
    pub messages: Vec<Message>,
    pub temperature: f32,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Start generating. Errors before the first fragment are returned
    /// directly; later failures arrive as stream items.
    async fn stream(&self, request: GenerationRequest) -> Result<DeltaStream, ProviderError>;
}

/// Configured backends keyed by name
#[derive(Clone, Default)]
pub struct Providers {
    providers: HashMap<ProviderName, Arc<dyn ChatProvider>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.providers.insert(provider.name(), provider);
        self
    }

    pub fn get(&self, name: ProviderName) -> Option<Arc<dyn ChatProvider>> {
        self.providers.get(&name).cloned()
    }
}
