use thiserror::Error;

use crate::models::ProviderName;
use crate::streaming::StreamState;

/// Crate-wide error type for the chat pipeline
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{service} returned HTTP {status}: {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Response stream closed by the client")]
    StreamClosed,

    #[error("Invalid stream transition from {from:?} on {frame} frame")]
    InvalidTransition {
        from: StreamState,
        frame: &'static str,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("OpenAI error: {0}")]
    OpenAi(#[from] async_openai::error::OpenAIError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Transport hiccups, rate limits and upstream 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ChatError::Upstream { status, .. } => *status == 429 || *status >= 500,
            ChatError::Provider(p) => p.is_retryable(),
            _ => false,
        }
    }

    /// Status text shown to the user in the terminal `error` frame.
    pub fn user_message<'a>(&self, retrieval_message: &'a str, generation_message: &'a str) -> &'a str {
        match self {
            ChatError::Retrieval(_) => retrieval_message,
            _ => generation_message,
        }
    }
}

/// Failure reported by a chat-completion backend, before or during streaming
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("{provider} rejected the credentials: {message}")]
    Auth {
        provider: ProviderName,
        message: String,
    },

    #[error("{provider} rate limit exceeded: {message}")]
    RateLimited {
        provider: ProviderName,
        message: String,
    },

    #[error("{provider} API error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Api {
        provider: ProviderName,
        status: Option<u16>,
        message: String,
    },

    #[error("{provider} sent a malformed response: {message}")]
    Malformed {
        provider: ProviderName,
        message: String,
    },

    #[error("{provider} transport failure: {message}")]
    Transport {
        provider: ProviderName,
        message: String,
    },
}

impl ProviderError {
    /// Classify a non-success HTTP status returned by a provider
    pub fn from_status(provider: ProviderName, status: u16, message: String) -> Self {
        match status {
            401 | 403 => ProviderError::Auth { provider, message },
            429 => ProviderError::RateLimited { provider, message },
            _ => ProviderError::Api {
                provider,
                status: Some(status),
                message,
            },
        }
    }

    pub fn provider(&self) -> ProviderName {
        match self {
            ProviderError::Auth { provider, .. }
            | ProviderError::RateLimited { provider, .. }
            | ProviderError::Api { provider, .. }
            | ProviderError::Malformed { provider, .. }
            | ProviderError::Transport { provider, .. } => *provider,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::Transport { .. } => true,
            ProviderError::Api { status, .. } => status.is_some_and(|s| s >= 500),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
