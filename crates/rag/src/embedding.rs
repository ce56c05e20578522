use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;

use project_brain_core::{HashEmbedder, HashEmbedderConfig};

const GEMINI_EMBED_BATCH: usize = 100;
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    Gemini(GeminiEmbeddingClient),
    OpenAi(OpenAiEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    /// `provider` is one of `gemini`, `openai` or `hash`; credentials come from the environment.
    pub fn from_settings(
        provider: &str,
        model: Option<&str>,
        dimensions: Option<usize>,
    ) -> Result<Self> {
        match provider.trim().to_lowercase().as_str() {
            "gemini" | "google" => {
                let model = model.unwrap_or("text-embedding-004");
                Ok(Self {
                    backend: EmbeddingBackend::Gemini(GeminiEmbeddingClient::new(
                        model,
                        dimensions.unwrap_or(768),
                    )?),
                })
            }
            "openai" => {
                let model = model.unwrap_or("text-embedding-3-small");
                let default_dims = if model.contains("large") { 3072 } else { 1536 };
                Ok(Self {
                    backend: EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
                        model,
                        dimensions.unwrap_or(default_dims),
                    )?),
                })
            }
            "hash" | "local" => Ok(Self::hash(dimensions.unwrap_or(384))),
            other => Err(anyhow!(format!("unknown embedding provider {other}"))),
        }
    }

    pub fn hash(dimensions: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                dimensions,
                ..HashEmbedderConfig::default()
            })),
        }
    }

    pub fn backend(&self) -> &EmbeddingBackend {
        &self.backend
    }

    pub fn name(&self) -> &str {
        match &self.backend {
            EmbeddingBackend::Hash(_) => "hash",
            EmbeddingBackend::Gemini(client) => client.model.as_str(),
            EmbeddingBackend::OpenAi(client) => client.model.as_str(),
        }
    }

    pub fn dimensions(&self) -> usize {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => embedder.dimensions(),
            EmbeddingBackend::Gemini(client) => client.dimensions,
            EmbeddingBackend::OpenAi(client) => client.dimensions,
        }
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect()),
            EmbeddingBackend::Gemini(client) => client.embed_batch(inputs).await,
            EmbeddingBackend::OpenAi(client) => client.embed_batch(inputs).await,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = vec![text.to_string()];
        self.embed_batch(&inputs)
            .await?
            .pop()
            .ok_or_else(|| anyhow!("embedding provider returned no vectors"))
    }
}

#[derive(Clone)]
pub struct GeminiEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
    base_url: String,
    dimensions: usize,
}

impl GeminiEmbeddingClient {
    pub fn new(model: &str, dimensions: usize) -> Result<Self> {
        let api_key = env::var("GOOGLE_API_KEY")
            .or_else(|_| env::var("GEMINI_API_KEY"))
            .map_err(|_| anyhow!("GOOGLE_API_KEY is required for gemini embeddings"))?;
        Ok(Self {
            http: Client::new(),
            model: model.trim_start_matches("models/").to_string(),
            api_key,
            base_url: env::var("GEMINI_BASE_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }),
            dimensions,
        })
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(GEMINI_EMBED_BATCH) {
            let url = format!(
                "{}/models/{}:batchEmbedContents",
                self.base_url.trim_end_matches('/'),
                self.model
            );
            let response = self
                .http
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(&gemini_batch_payload(&self.model, self.dimensions, batch))
                .send()
                .await
                .context("gemini embeddings request failed")?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow!(
                    "gemini embeddings request failed: {status}: {body}"
                ));
            }
            let parsed: GeminiEmbeddingResponse = response
                .json()
                .await
                .context("failed to decode gemini embeddings")?;
            for embedding in parsed.embeddings {
                if embedding.values.len() != self.dimensions {
                    return Err(anyhow!(
                        "gemini returned {} dimensions, expected {}",
                        embedding.values.len(),
                        self.dimensions
                    ));
                }
                out.push(embedding.values);
            }
        }
        Ok(out)
    }
}

// Vectors must come back at the index dimension.
fn gemini_batch_payload(model: &str, dimensions: usize, batch: &[String]) -> Value {
    let requests: Vec<Value> = batch
        .iter()
        .map(|text| {
            json!({
                "model": format!("models/{model}"),
                "content": { "parts": [{ "text": text }] },
                "outputDimensionality": dimensions,
            })
        })
        .collect();
    json!({ "requests": requests })
}

fn openai_embeddings_url(base_url: &str) -> String {
    format!("{}/embeddings", base_url.trim_end_matches('/'))
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
    base_url: String,
    dimensions: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str, dimensions: usize) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY is required for openai embeddings"))?;
        Ok(Self {
            http: Client::new(),
            model: model.to_string(),
            api_key,
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| OPENAI_BASE_URL.to_string()),
            dimensions,
        })
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = openai_embeddings_url(&self.base_url);
        let payload = json!({
            "model": self.model,
            "input": inputs,
            "dimensions": self.dimensions,
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("openai embeddings request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "openai embeddings request failed: {}",
                response.status()
            ));
        }
        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .context("failed to decode openai embeddings")?;
        Ok(parsed.data.into_iter().map(|data| data.embedding).collect())
    }
}

#[derive(Deserialize)]
struct GeminiEmbeddingResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}
