use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ModelProfile;
use crate::embeddings::Embedder;
use crate::error::{ChatError, Result};
use crate::models::{ChatMessage, Citation, CompletionRequest, Conversation};
use crate::pinecone_service::VectorIndex;
use crate::prompts::Prompts;
use crate::sources::{citations_from_sources, context_from_sources, sources_from_chunks};
use crate::transport::Transport;

#[cfg(test)]
use mockall::automock;

/// Cited context assembled for one question
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    /// Excerpt blocks, empty when the index had no matches
    pub context: String,
    pub citations: Vec<Citation>,
    pub source_count: usize,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.source_count == 0
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Any failure is reported as `ChatError::Retrieval`
    async fn retrieve(&self, conversation: &Conversation) -> Result<RetrievedContext>;
}

/// Hypothetical-document retrieval: write a plausible answer, embed it and
/// look up the passages nearest to it
pub struct HydeRetriever {
    tx: Arc<dyn Transport>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    profile: ModelProfile,
    prompts: Prompts,
    top_k: u32,
    history_len: usize,
}

impl HydeRetriever {
    pub fn new(
        tx: Arc<dyn Transport>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        profile: ModelProfile,
        prompts: Prompts,
        top_k: u32,
        history_len: usize,
    ) -> Self {
        Self {
            tx,
            embedder,
            index,
            profile,
            prompts,
            top_k,
            history_len,
        }
    }

    async fn hypothetical_passage(&self, conversation: &Conversation) -> Result<String> {
        let request = CompletionRequest {
            model: self.profile.model.clone(),
            messages: vec![ChatMessage {
                role: "system".to_string(),
                content: self
                    .prompts
                    .hyde(conversation.recent(self.history_len)),
            }],
            temperature: self.profile.temperature,
            max_tokens: None,
            response_format: None,
        };
        let response = self.tx.chat(&request).await?;
        response
            .first_content()
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| ChatError::Retrieval("HyDE model returned no text".to_string()))
    }

    async fn try_retrieve(&self, conversation: &Conversation) -> Result<RetrievedContext> {
        let started = Instant::now();
        let passage = self.hypothetical_passage(conversation).await?;
        let vector = self.embedder.embed(&passage).await?;
        let chunks = self.index.query(vector, self.top_k).await?;
        let matches = chunks.len();

        let sources = sources_from_chunks(chunks);
        let retrieved = RetrievedContext {
            context: context_from_sources(&sources),
            citations: citations_from_sources(&sources),
            source_count: sources.len(),
        };
        tracing::info!(
            matches,
            sources = retrieved.source_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Retrieved context"
        );
        Ok(retrieved)
    }
}

#[async_trait]
impl ContextRetriever for HydeRetriever {
    async fn retrieve(&self, conversation: &Conversation) -> Result<RetrievedContext> {
        self.try_retrieve(conversation).await.map_err(|e| match e {
            ChatError::Retrieval(_) => e,
            other => ChatError::Retrieval(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::embeddings::MockEmbedder;
    use crate::models::{Chunk, Message};
    use crate::pinecone_service::MockVectorIndex;
    use crate::transport::tests::MockTransport;

    fn conversation() -> Conversation {
        Conversation::new(vec![Message::user("What's the capital of France?")])
    }

    fn retriever(
        tx: MockTransport,
        embedder: MockEmbedder,
        index: MockVectorIndex,
    ) -> HydeRetriever {
        HydeRetriever::new(
            Arc::new(tx),
            Arc::new(embedder),
            Arc::new(index),
            ModelProfile {
                model: "gpt-4o-mini".into(),
                temperature: 0.7,
            },
            Prompts::new(IdentityConfig::default()),
            7,
            8,
        )
    }

    #[tokio::test]
    async fn test_hypothetical_passage_is_embedded_and_queried() {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .withf(|text| text == "Paris is the capital of France.")
            .times(1)
            .returning(|_| Ok(vec![0.1, 0.2]));
        let mut index = MockVectorIndex::new();
        index
            .expect_query()
            .withf(|vector, top_k| vector == &vec![0.1, 0.2] && *top_k == 7)
            .times(1)
            .returning(|_, _| {
                Ok(vec![Chunk {
                    text: "Paris is the capital".into(),
                    source_url: "wiki.org".into(),
                    source_description: "Wiki".into(),
                    ..Default::default()
                }])
            });

        let retrieved = retriever(
            MockTransport::replying("Paris is the capital of France."),
            embedder,
            index,
        )
        .retrieve(&conversation())
        .await
        .expect("retrieval succeeds");

        assert_eq!(retrieved.source_count, 1);
        assert_eq!(retrieved.citations[0].source_url, "wiki.org");
        assert!(retrieved.context.contains("Paris is the capital [1]"));
    }

    #[tokio::test]
    async fn test_no_matches_is_empty_context() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.5]));
        let mut index = MockVectorIndex::new();
        index.expect_query().returning(|_, _| Ok(Vec::new()));

        let retrieved = retriever(MockTransport::replying("guess"), embedder, index)
            .retrieve(&conversation())
            .await
            .expect("zero matches is not an error");
        assert!(retrieved.is_empty());
        assert_eq!(retrieved.context, "");
        assert!(retrieved.citations.is_empty());
    }

    #[tokio::test]
    async fn test_hyde_failure_is_a_retrieval_error() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().times(0);
        let mut index = MockVectorIndex::new();
        index.expect_query().times(0);

        let tx = MockTransport::new(vec![Err(ChatError::Upstream {
            service: "chat completions",
            status: 500,
            body: "boom".into(),
        })]);
        let err = retriever(tx, embedder, index)
            .retrieve(&conversation())
            .await
            .expect_err("HyDE failure propagates");
        assert!(matches!(err, ChatError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_a_retrieval_error() {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .times(1)
            .returning(|_| Err(ChatError::Internal("embedding model unavailable".into())));
        let mut index = MockVectorIndex::new();
        index.expect_query().times(0);

        let err = retriever(MockTransport::replying("guess"), embedder, index)
            .retrieve(&conversation())
            .await
            .expect_err("embedding failure propagates");
        assert!(matches!(err, ChatError::Retrieval(_)));
        assert!(err.to_string().contains("embedding model unavailable"));
    }

    #[tokio::test]
    async fn test_index_failure_is_a_retrieval_error() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.5]));
        let mut index = MockVectorIndex::new();
        index.expect_query().returning(|_, _| {
            Err(ChatError::Upstream {
                service: "pinecone query",
                status: 503,
                body: "unavailable".into(),
            })
        });

        let err = retriever(MockTransport::replying("guess"), embedder, index)
            .retrieve(&conversation())
            .await
            .expect_err("index failure propagates");
        assert!(err.to_string().contains("pinecone query"));
    }

    #[tokio::test]
    async fn test_hyde_prompt_uses_recent_history_only() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.5]));
        let mut index = MockVectorIndex::new();
        index.expect_query().returning(|_, _| Ok(Vec::new()));

        let tx = Arc::new(MockTransport::replying("guess"));
        let retriever = HydeRetriever::new(
            tx.clone(),
            Arc::new(embedder),
            Arc::new(index),
            ModelProfile {
                model: "gpt-4o-mini".into(),
                temperature: 0.7,
            },
            Prompts::new(IdentityConfig::default()),
            7,
            2,
        );
        let conversation = Conversation::new(vec![
            Message::user("oldest question"),
            Message::assistant("old answer"),
            Message::user("latest question"),
        ]);
        retriever
            .retrieve(&conversation)
            .await
            .expect("retrieval succeeds");

        let requests = tx.requests.lock().expect("mutex");
        let prompt = &requests[0].messages[0].content;
        assert!(prompt.contains("latest question"));
        assert!(!prompt.contains("oldest question"));
    }
}
