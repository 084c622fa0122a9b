use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::PineconeConfig;
use crate::error::{ChatError, Result};
use crate::models::Chunk;
use crate::retry::RetryPolicy;

#[cfg(test)]
use mockall::automock;

const PINECONE_API_VERSION: &str = "2024-07";

/// Nearest-neighbour lookup over embedded passages
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top `top_k` matches by similarity, each mapped to a `Chunk`
    async fn query(&self, vector: Vec<f32>, top_k: u32) -> Result<Vec<Chunk>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: u32,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
}

#[derive(Clone)]
pub struct PineconeService {
    client: Client,
    api_key: String,
    query_url: String,
    namespace: Option<String>,
    retry: RetryPolicy,
}

impl PineconeService {
    /// Connect to the configured index, resolving its data-plane host through
    /// the control plane when it is not configured. Fails if the index cannot
    /// be found, so a misconfigured service never starts.
    pub async fn connect(cfg: &PineconeConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to create Pinecone client: {e}")))?;

        let host = match cfg.index_host.as_deref() {
            Some(host) => host.to_string(),
            None => {
                let host = retry
                    .run("pinecone describe index", || {
                        describe_index(&client, cfg)
                    })
                    .await
                    .map_err(|e| {
                        ChatError::Config(format!(
                            "Failed to resolve Pinecone index {:?}: {e}. Double check the index name and API key.",
                            cfg.index_name
                        ))
                    })?;
                info!("Resolved Pinecone index {} to host {}", cfg.index_name, host);
                host
            }
        };

        Ok(Self {
            client,
            api_key: cfg.api_key.clone(),
            query_url: query_url(&host),
            namespace: cfg.namespace.clone(),
            retry,
        })
    }

    async fn query_once(&self, vector: &[f32], top_k: u32) -> Result<QueryResponse> {
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            namespace: self.namespace.as_deref(),
        };
        let response = self
            .client
            .post(&self.query_url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream {
                service: "pinecone query",
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl VectorIndex for PineconeService {
    async fn query(&self, vector: Vec<f32>, top_k: u32) -> Result<Vec<Chunk>> {
        info!(
            "Querying Pinecone with {} dimensions for top {} chunks",
            vector.len(),
            top_k
        );
        let response = self
            .retry
            .run("pinecone query", || self.query_once(&vector, top_k))
            .await?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| {
                tracing::debug!(id = %m.id, score = m.score, "pinecone match");
                match_to_chunk(m.metadata.unwrap_or_default())
            })
            .collect())
    }
}

async fn describe_index(client: &Client, cfg: &PineconeConfig) -> Result<String> {
    let url = format!(
        "{}/indexes/{}",
        cfg.control_plane_url.trim_end_matches('/'),
        cfg.index_name
    );
    let response = client
        .get(&url)
        .header("Api-Key", &cfg.api_key)
        .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ChatError::Upstream {
            service: "pinecone describe index",
            status: status.as_u16(),
            body,
        });
    }
    let description: IndexDescription = response.json().await?;
    Ok(description.host)
}

fn query_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}/query")
    } else {
        format!("https://{host}/query")
    }
}

/// Map match metadata to a chunk; absent or mistyped fields fall back to empty / zero
fn match_to_chunk(metadata: Map<String, Value>) -> Chunk {
    let text = |key: &str| -> String {
        match metadata.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => {
                warn!("Pinecone metadata field {} is not a string: {}", key, other);
                String::new()
            }
        }
    };

    Chunk {
        text: text("text"),
        pre_context: text("pre_context"),
        post_context: text("post_context"),
        source_url: text("source_url"),
        source_description: text("source_description"),
        order: metadata
            .get("order")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object metadata")
    }

    #[test]
    fn test_full_metadata_maps_to_chunk() {
        let chunk = match_to_chunk(metadata(json!({
            "text": "Paris is the capital",
            "pre_context": "France.",
            "post_context": "of France.",
            "source_url": "wiki.org",
            "source_description": "Wikipedia",
            "order": 3.0
        })));
        assert_eq!(chunk.text, "Paris is the capital");
        assert_eq!(chunk.source_url, "wiki.org");
        assert_eq!(chunk.order, 3);
    }

    #[test]
    fn test_missing_metadata_defaults() {
        let chunk = match_to_chunk(metadata(json!({ "text": "lonely", "order": null })));
        assert_eq!(chunk.text, "lonely");
        assert_eq!(chunk.pre_context, "");
        assert_eq!(chunk.source_url, "");
        assert_eq!(chunk.order, 0);

        assert_eq!(match_to_chunk(Map::new()), Chunk::default());
    }

    #[test]
    fn test_query_response_tolerates_missing_fields() {
        let response: QueryResponse = serde_json::from_str(
            r#"{"matches":[{"id":"a","score":0.9},{"id":"b","metadata":{"text":"t"}}],"namespace":""}"#,
        )
        .expect("response parses");
        assert_eq!(response.matches.len(), 2);
        assert!(response.matches[0].metadata.is_none());

        let empty: QueryResponse = serde_json::from_str("{}").expect("empty response parses");
        assert!(empty.matches.is_empty());
    }

    #[test]
    fn test_query_request_uses_camel_case() {
        let body = serde_json::to_value(QueryRequest {
            vector: &[0.1, 0.2],
            top_k: 7,
            include_metadata: true,
            include_values: false,
            namespace: None,
        })
        .expect("serializes");
        assert_eq!(body["topK"], 7);
        assert_eq!(body["includeMetadata"], true);
        assert!(body.get("namespace").is_none());
    }

    #[test]
    fn test_query_url_adds_scheme() {
        assert_eq!(
            query_url("my-ai-abc.svc.pinecone.io"),
            "https://my-ai-abc.svc.pinecone.io/query"
        );
        assert_eq!(query_url("http://localhost:5080/"), "http://localhost:5080/query");
    }
}
