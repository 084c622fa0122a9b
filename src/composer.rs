use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{ModelsConfig, ResponseProfile};
use crate::error::{ChatError, Result};
use crate::models::{Citation, Conversation, Intention};
use crate::prompts::Prompts;
use crate::providers::{ChatProvider, GenerationRequest, Providers};
use crate::retrieval::RetrievedContext;
use crate::streaming::{FrameSink, TextAccumulator};

/// Everything needed to generate one answer
pub struct ResponsePlan {
    pub provider: Arc<dyn ChatProvider>,
    pub request: GenerationRequest,
    /// Attached to every message frame of the answer
    pub citations: Vec<Citation>,
}

/// Chooses prompt and backend per intention and streams the answer into a sink
pub struct ResponseComposer {
    providers: Providers,
    prompts: Prompts,
    models: ModelsConfig,
}

impl ResponseComposer {
    /// Fails if any intention is routed to a provider that is not registered
    pub fn new(providers: Providers, prompts: Prompts, models: ModelsConfig) -> Result<Self> {
        for intention in [Intention::Question, Intention::HostileMessage, Intention::Random] {
            let profile = models.response_profile(intention);
            if providers.get(profile.provider).is_none() {
                return Err(ChatError::Config(format!(
                    "{} responses use {}, which is not configured",
                    intention.as_str(),
                    profile.provider
                )));
            }
        }
        Ok(Self {
            providers,
            prompts,
            models,
        })
    }

    pub fn profile(&self, intention: Intention) -> &ResponseProfile {
        self.models.response_profile(intention)
    }

    pub fn system_prompt(&self, intention: Intention, context: Option<&RetrievedContext>) -> String {
        match intention {
            Intention::Question => self
                .prompts
                .question(context.map(|c| c.context.as_str())),
            Intention::HostileMessage => self.prompts.hostile(),
            Intention::Random => self.prompts.random(),
        }
    }

    pub fn compose(
        &self,
        intention: Intention,
        conversation: &Conversation,
        context: Option<&RetrievedContext>,
    ) -> Result<ResponsePlan> {
        let profile = self.profile(intention);
        let provider = self.providers.get(profile.provider).ok_or_else(|| {
            ChatError::Config(format!("provider {} is not configured", profile.provider))
        })?;

        Ok(ResponsePlan {
            provider,
            request: GenerationRequest {
                model: profile.model.clone(),
                system_prompt: self.system_prompt(intention, context),
                messages: conversation.messages.clone(),
                temperature: profile.temperature,
            },
            citations: context.map(|c| c.citations.clone()).unwrap_or_default(),
        })
    }

    /// Stream the plan's deltas as cumulative message frames, then `done`.
    /// Returns the final text. On error no terminal frame has been written.
    pub async fn stream_answer(&self, plan: ResponsePlan, sink: &mut FrameSink) -> Result<String> {
        let started = Instant::now();
        let provider = plan.provider.name();
        let model = plan.request.model.clone();

        let mut deltas = plan.provider.stream(plan.request).await?;
        let mut text = TextAccumulator::default();
        let mut frames = 0usize;
        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            if delta.is_empty() {
                continue;
            }
            sink.message(text.push(&delta), &plan.citations).await?;
            frames += 1;
        }

        let final_message = text.into_inner();
        sink.done(final_message.clone()).await?;
        tracing::info!(
            provider = %provider,
            model = %model,
            frames,
            chars = final_message.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Answer streamed"
        );
        Ok(final_message)
    }
}
