use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::composer::ResponseComposer;
use crate::config::{ChatConfig, Config};
use crate::embeddings::OpenAiEmbedder;
use crate::error::{ChatError, Result};
use crate::intent::{IntentClassifier, ModelIntentClassifier};
use crate::models::{Conversation, Intention, ProviderName};
use crate::pinecone_service::PineconeService;
use crate::prompts::Prompts;
use crate::providers::{AnthropicProvider, OpenAiProvider, Providers};
use crate::retrieval::{ContextRetriever, HydeRetriever};
use crate::retry::RetryPolicy;
use crate::streaming::{FrameSink, IndicatorIcon};
use crate::transport::{OpenAiTransport, Transport};

/// Main service: classify, retrieve, compose and stream one answer per request
pub struct ChatService {
    classifier: Arc<dyn IntentClassifier>,
    retriever: Arc<dyn ContextRetriever>,
    composer: ResponseComposer,
    chat: ChatConfig,
}

impl ChatService {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        retriever: Arc<dyn ContextRetriever>,
        composer: ResponseComposer,
        chat: ChatConfig,
    ) -> Self {
        Self {
            classifier,
            retriever,
            composer,
            chat,
        }
    }

    /// Wire the production backends. Resolves the Pinecone index host, so an
    /// unreachable or misnamed index fails here rather than on first request.
    pub async fn from_config(cfg: &Config) -> Result<Self> {
        tracing::info!("ChatService::from_config() - Starting initialization");
        let retry = RetryPolicy::from_config(cfg);
        let prompts = Prompts::new(cfg.identity.clone());

        let transport: Arc<dyn Transport> = Arc::new(OpenAiTransport::new(
            cfg.openai.api_key.clone(),
            &cfg.openai.base_url,
            retry.clone(),
        )?);

        let classifier = ModelIntentClassifier::new(
            Arc::clone(&transport),
            cfg.models.intention.clone(),
            prompts.clone(),
            cfg.chat.history_context_length,
        );

        let index = PineconeService::connect(&cfg.pinecone, retry).await?;
        tracing::info!("ChatService::from_config() - Pinecone index connected");
        let embedder = OpenAiEmbedder::new(
            &cfg.openai.api_key,
            &cfg.openai.base_url,
            cfg.openai.embedding_model.clone(),
        );
        let retriever = HydeRetriever::new(
            transport,
            Arc::new(embedder),
            Arc::new(index),
            cfg.models.hyde.clone(),
            prompts.clone(),
            cfg.pinecone.top_k,
            cfg.chat.history_context_length,
        );

        let mut providers = Providers::new().with(Arc::new(OpenAiProvider::new(
            ProviderName::OpenAi,
            &cfg.openai.api_key,
            &cfg.openai.base_url,
        )));
        if !cfg.anthropic.api_key.is_empty() {
            providers = providers.with(Arc::new(AnthropicProvider::new(&cfg.anthropic)));
        }
        if !cfg.fireworks.api_key.is_empty() {
            providers = providers.with(Arc::new(OpenAiProvider::new(
                ProviderName::Fireworks,
                &cfg.fireworks.api_key,
                &cfg.fireworks.base_url,
            )));
        }
        let composer = ResponseComposer::new(providers, prompts, cfg.models.clone())?;
        tracing::info!("ChatService::from_config() - Providers registered");

        Ok(Self::new(
            Arc::new(classifier),
            Arc::new(retriever),
            composer,
            cfg.chat.clone(),
        ))
    }

    /// Run the pipeline for one conversation, writing every frame to `sink`.
    /// Failures end the stream with a single `error` frame.
    pub async fn respond(&self, conversation: Conversation, mut sink: FrameSink) {
        let span = tracing::info_span!(
            "chat",
            request_id = %Uuid::new_v4(),
            messages = conversation.len()
        );
        async move {
            if let Err(e) = self.run(&conversation, &mut sink).await {
                self.fail(e, &mut sink).await;
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, conversation: &Conversation, sink: &mut FrameSink) -> Result<()> {
        sink.indicate("Understanding your message", IndicatorIcon::Understanding)
            .await?;
        let intention = self.classifier.classify(conversation).await;

        let context = if intention == Intention::Question {
            sink.indicate("Searching…", IndicatorIcon::Searching).await?;
            let context = self.retriever.retrieve(conversation).await?;
            sink.indicate(reading_status(context.source_count), IndicatorIcon::Documents)
                .await?;
            Some(context)
        } else {
            None
        };

        sink.indicate("Coming up with an answer", IndicatorIcon::Thinking)
            .await?;
        let plan = self
            .composer
            .compose(intention, conversation, context.as_ref())?;
        tracing::info!(
            intention = intention.as_str(),
            provider = %plan.provider.name(),
            model = %plan.request.model,
            citations = plan.citations.len(),
            "Generating answer"
        );
        self.composer.stream_answer(plan, sink).await?;
        Ok(())
    }

    async fn fail(&self, error: ChatError, sink: &mut FrameSink) {
        if let ChatError::StreamClosed = error {
            tracing::warn!("Client disconnected, abandoning response");
            return;
        }
        tracing::error!(error = %error, "Chat request failed");
        let status = error.user_message(
            &self.chat.retrieval_error_message,
            &self.chat.default_response_message,
        );
        if let Err(e) = sink.error(status).await {
            tracing::warn!("Could not deliver error frame: {}", e);
        }
    }
}

fn reading_status(sources: usize) -> String {
    match sources {
        1 => "Reading 1 source".to_string(),
        n => format!("Reading {n} sources"),
    }
}
