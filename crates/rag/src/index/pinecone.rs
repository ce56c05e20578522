use std::env;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info};

use project_brain_core::Chunk;

use super::{EmbeddedChunk, Retriever, VectorStore};
use crate::embedding::EmbeddingClient;

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
const UPSERT_BATCH: usize = 100;
const UNKNOWN_SOURCE: &str = "Unknown";

#[derive(Clone)]
pub struct PineconeClient {
    http: Client,
    api_key: String,
    control_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexDescription {
    pub name: String,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub status: IndexStatus,
}

impl IndexDescription {
    pub fn is_ready(&self) -> bool {
        self.status.ready
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: String,
    pub cloud: String,
    pub region: String,
}

#[derive(Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

impl PineconeClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            control_url: CONTROL_PLANE_URL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key =
            env::var("PINECONE_API_KEY").map_err(|_| anyhow!("PINECONE_API_KEY is not set"))?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("PINECONE_API_KEY is empty"));
        }
        Ok(Self::new(api_key))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    pub async fn list_indexes(&self) -> Result<Vec<IndexDescription>> {
        let url = format!("{}/indexes", self.control_url);
        let response = self
            .authorized(self.http.get(url))
            .send()
            .await
            .context("pinecone list_indexes request failed")?;
        let listing: IndexList = decode(response, "list_indexes").await?;
        Ok(listing.indexes)
    }

    pub async fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        let url = format!("{}/indexes/{}", self.control_url, name);
        let response = self
            .authorized(self.http.get(url))
            .send()
            .await
            .context("pinecone describe_index request failed")?;
        decode(response, "describe_index").await
    }

    pub async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let url = format!("{}/indexes", self.control_url);
        let payload = json!({
            "name": spec.name,
            "dimension": spec.dimension,
            "metric": spec.metric,
            "spec": { "serverless": { "cloud": spec.cloud, "region": spec.region } },
        });
        let response = self
            .authorized(self.http.post(url))
            .json(&payload)
            .send()
            .await
            .context("pinecone create_index request failed")?;
        let _: Value = decode(response, "create_index").await?;
        Ok(())
    }

    /// Polls `describe_index` every `poll` until the index reports ready.
    ///
    /// Lookup failures while the index is still being provisioned are treated as "not yet".
    pub async fn wait_until_ready(
        &self,
        name: &str,
        poll: Duration,
        timeout: Duration,
    ) -> Result<IndexDescription> {
        let started = Instant::now();
        loop {
            match self.describe_index(name).await {
                Ok(description) if description.is_ready() => return Ok(description),
                Ok(description) => info!(
                    index = name,
                    state = description.status.state.as_deref().unwrap_or("unknown"),
                    "index still initializing"
                ),
                Err(err) => info!(index = name, error = %err, "index not found yet"),
            }
            if started.elapsed() >= timeout {
                return Err(anyhow!(
                    "index {name} was not ready after {}s",
                    timeout.as_secs()
                ));
            }
            sleep(poll).await;
        }
    }

    pub fn index(&self, host: &str, namespace: Option<String>) -> PineconeIndex {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };
        PineconeIndex {
            client: self.clone(),
            base_url,
            namespace,
        }
    }

    /// Resolves the data-plane host for `name` (or uses `host_override`) and returns a handle.
    pub async fn connect(
        &self,
        name: &str,
        host_override: Option<&str>,
        namespace: Option<String>,
    ) -> Result<PineconeIndex> {
        let host = match host_override {
            Some(host) => host.to_string(),
            None => self
                .describe_index(name)
                .await?
                .host
                .ok_or_else(|| anyhow!("index {name} has no host yet"))?,
        };
        debug!(index = name, host = %host, "resolved pinecone host");
        Ok(self.index(&host, namespace))
    }
}

#[derive(Clone)]
pub struct PineconeIndex {
    client: PineconeClient,
    base_url: String,
    namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexStats {
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default, rename = "totalVectorCount")]
    pub total_vector_count: u64,
}

impl PineconeIndex {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>> {
        let mut payload = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(namespace) = &self.namespace {
            payload["namespace"] = json!(namespace);
        }
        let response = self
            .client
            .authorized(self.client.http.post(format!("{}/query", self.base_url)))
            .json(&payload)
            .send()
            .await
            .context("pinecone query request failed")?;
        let parsed: QueryResponse = decode(response, "query").await?;
        Ok(parsed.matches)
    }

    pub async fn upsert(&self, vectors: &[EmbeddedChunk]) -> Result<usize> {
        let mut written = 0usize;
        for batch in vectors.chunks(UPSERT_BATCH) {
            let records: Vec<Value> = batch.iter().map(vector_record).collect();
            let mut payload = json!({ "vectors": records });
            if let Some(namespace) = &self.namespace {
                payload["namespace"] = json!(namespace);
            }
            let response = self
                .client
                .authorized(
                    self.client
                        .http
                        .post(format!("{}/vectors/upsert", self.base_url)),
                )
                .json(&payload)
                .send()
                .await
                .context("pinecone upsert request failed")?;
            let ack: UpsertResponse = decode(response, "upsert").await?;
            written += ack.upserted_count.unwrap_or(batch.len());
        }
        Ok(written)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let response = self
            .client
            .authorized(
                self.client
                    .http
                    .post(format!("{}/describe_index_stats", self.base_url)),
            )
            .json(&json!({}))
            .send()
            .await
            .context("pinecone describe_index_stats request failed")?;
        decode(response, "describe_index_stats").await
    }
}

#[derive(Deserialize)]
struct UpsertResponse {
    #[serde(default, rename = "upsertedCount")]
    upserted_count: Option<usize>,
}

#[derive(Clone)]
pub struct PineconeStore {
    index: PineconeIndex,
    embeddings: EmbeddingClient,
}

impl PineconeStore {
    pub fn new(index: PineconeIndex, embeddings: EmbeddingClient) -> Self {
        Self { index, embeddings }
    }

    pub fn index(&self) -> &PineconeIndex {
        &self.index
    }
}

#[async_trait]
impl Retriever for PineconeStore {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        let vector = self
            .embeddings
            .embed(query)
            .await
            .context("failed to embed query")?;
        let matches = self.index.query(&vector, k).await?;
        Ok(matches
            .iter()
            .map(|hit| chunk_from_metadata(hit.metadata.as_ref()))
            .collect())
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert(&self, records: &[EmbeddedChunk]) -> Result<usize> {
        self.index.upsert(records).await
    }
}

/// Decodes match metadata written at ingestion: `text`, `source` and a 0-based `page`.
///
/// Metadata written by other loaders may store `page` as a float, so both forms are read.
pub fn chunk_from_metadata(metadata: Option<&Value>) -> Chunk {
    let field = |key: &str| metadata.and_then(|meta| meta.get(key));
    let content = field("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let source = field("source")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_SOURCE)
        .to_string();
    let page = field("page")
        .and_then(|value| {
            value
                .as_u64()
                .or_else(|| value.as_f64().filter(|p| *p >= 0.0).map(|p| p as u64))
        })
        .unwrap_or(0);
    Chunk::new(content, source, page.min(u32::MAX as u64) as u32)
}

fn vector_record(record: &EmbeddedChunk) -> Value {
    json!({
        "id": record.id,
        "values": record.values,
        "metadata": {
            "text": record.chunk.content,
            "source": record.chunk.source_file,
            "page": record.chunk.page_number,
        }
    })
}

async fn decode<T: DeserializeOwned>(response: Response, operation: &str) -> Result<T> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!("pinecone {operation} failed (status {status}): {body}"));
    }
    let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
    serde_json::from_str(body)
        .with_context(|| format!("failed to decode pinecone {operation} response"))
}
