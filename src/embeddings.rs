use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
};
use async_trait::async_trait;
use tracing::info;

use crate::error::{ChatError, Result};

#[cfg(test)]
use mockall::automock;

/// Turns text into a fixed-length vector
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, base_url: &str, model: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key.to_string())
            .with_api_base(base_url.to_string());
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        info!(
            model = %self.model,
            chars = text.len(),
            "Generating OpenAI embedding"
        );

        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(EmbeddingInput::String(text.to_string()))
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Internal("No embeddings returned".to_string()))?
            .embedding;

        if embedding.is_empty() {
            return Err(ChatError::Internal("Embedding vector is empty".to_string()));
        }
        Ok(embedding)
    }
}
