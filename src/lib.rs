pub mod client;
pub mod composer;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod intent;
pub mod models;
pub mod pinecone_service;
pub mod prompts;
pub mod providers;
pub mod retrieval;
pub mod retry;
pub mod server;
pub mod service;
pub mod sources;
pub mod streaming;
pub mod transport;

pub use config::Config;
pub use error::{ChatError, ProviderError, Result};
pub use service::ChatService;
