use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use tracing::debug;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const LOCAL_NOT_FOUND: &str = "I cannot find that information";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "gemini" | "google" => Some(LlmProvider::Gemini),
            "openai" => Some(LlmProvider::OpenAi),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini-2.0-flash",
            LlmProvider::OpenAi => "gpt-4.1-mini",
            LlmProvider::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: Option<f32>,
    pub response_schema: Option<Value>,
}

impl LlmRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub generation_methods: Vec<String>,
}

impl ModelInfo {
    pub fn supports_generate_content(&self) -> bool {
        self.generation_methods
            .iter()
            .any(|method| method == "generateContent")
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    Gemini(GeminiConfig),
    OpenAi(OpenAiConfig),
    Local,
}

#[derive(Clone)]
struct GeminiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self> {
        let config = match provider {
            LlmProvider::Gemini => ProviderConfig::Gemini(GeminiConfig {
                api_key: read_gemini_key()?,
                base_url: env::var("GEMINI_BASE_URL")
                    .unwrap_or_else(|_| GEMINI_BASE_URL.to_string()),
            }),
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| OPENAI_BASE_URL.to_string()),
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model: model.into(),
            config,
        })
    }

    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: LlmProvider::Local.default_model().to_string(),
            config: ProviderConfig::Local,
        }
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        debug!(
            provider = self.provider.as_str(),
            model = %self.model,
            prompt_chars = req.user.len() + req.system.as_ref().map_or(0, String::len),
            "sending chat request"
        );
        match &self.config {
            ProviderConfig::Gemini(cfg) => self.chat_gemini(cfg, req).await,
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Local => Ok(chat_local(req)),
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        match &self.config {
            ProviderConfig::Gemini(cfg) => {
                let url = format!("{}/models", cfg.base_url.trim_end_matches('/'));
                let response = self
                    .http
                    .get(url)
                    .header("x-goog-api-key", &cfg.api_key)
                    .send()
                    .await
                    .context("gemini model listing failed")?;
                let value = decode_body("gemini", response).await?;
                let listing: GeminiModelList =
                    serde_json::from_value(value).context("failed to decode gemini models")?;
                Ok(listing
                    .models
                    .into_iter()
                    .map(|model| ModelInfo {
                        name: model.name,
                        generation_methods: model.supported_generation_methods,
                    })
                    .collect())
            }
            ProviderConfig::OpenAi(cfg) => {
                let url = format!("{}/models", cfg.base_url.trim_end_matches('/'));
                let response = self
                    .http
                    .get(url)
                    .bearer_auth(&cfg.api_key)
                    .send()
                    .await
                    .context("openai model listing failed")?;
                let value = decode_body("openai", response).await?;
                let listing: OpenAiModelList =
                    serde_json::from_value(value).context("failed to decode openai models")?;
                Ok(listing
                    .data
                    .into_iter()
                    .map(|model| ModelInfo {
                        name: model.id,
                        generation_methods: vec!["chat.completions".to_string()],
                    })
                    .collect())
            }
            ProviderConfig::Local => Ok(vec![ModelInfo {
                name: self.model.clone(),
                generation_methods: vec!["generateContent".to_string()],
            }]),
        }
    }

    async fn chat_gemini(&self, cfg: &GeminiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!(
            "{}/models/{}:generateContent",
            cfg.base_url.trim_end_matches('/'),
            self.model
        );
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &cfg.api_key)
            .json(&gemini_payload(req))
            .send()
            .await
            .context("gemini request failed")?;
        let value = decode_body("gemini", response).await?;
        let parsed: GeminiResponse =
            serde_json::from_value(value).context("failed to decode gemini response")?;
        parse_gemini_response(parsed)
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .bearer_auth(&cfg.api_key)
            .json(&openai_payload(&self.model, req))
            .send()
            .await
            .context("openai request failed")?;
        let value = decode_body("openai", response).await?;
        let content =
            extract_openai_text(&value).ok_or_else(|| anyhow!("missing text in OpenAI response"))?;
        let usage: OpenAiUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }
}

fn gemini_payload(req: &LlmRequest) -> Value {
    let mut payload = json!({
        "contents": [
            {
                "role": "user",
                "parts": [{ "text": req.user }]
            }
        ]
    });
    if let Some(system) = &req.system {
        payload["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    let mut generation = serde_json::Map::new();
    if let Some(temperature) = req.temperature {
        generation.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(schema) = &req.response_schema {
        generation.insert("responseMimeType".to_string(), json!("application/json"));
        generation.insert("responseSchema".to_string(), gemini_schema(schema));
    }
    if !generation.is_empty() {
        payload["generationConfig"] = Value::Object(generation);
    }
    payload
}

// Gemini spells schema types in upper case and rejects `additionalProperties`.
fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "additionalProperties")
                .map(|(key, value)| match (key.as_str(), value) {
                    ("type", Value::String(kind)) => (key.clone(), json!(kind.to_uppercase())),
                    _ => (key.clone(), gemini_schema(value)),
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(gemini_schema).collect()),
        other => other.clone(),
    }
}

fn openai_payload(model: &str, req: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": req.user }));
    let mut payload = json!({
        "model": model,
        "messages": messages,
    });
    if let Some(temperature) = req.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(schema) = &req.response_schema {
        payload["response_format"] = json!({
            "type": "json_schema",
            "json_schema": { "name": "response", "schema": schema }
        });
    }
    payload
}

fn parse_gemini_response(response: GeminiResponse) -> Result<LlmResponse> {
    let text = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|text| !text.is_empty())
        .ok_or_else(|| anyhow!("missing text in Gemini response"))?;
    let usage = response.usage.unwrap_or_default();
    Ok(LlmResponse {
        content: text,
        prompt_tokens: usage.prompt_tokens.unwrap_or(0),
        completion_tokens: usage.completion_tokens.unwrap_or(0),
    })
}

async fn decode_body(provider: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(
            "{provider} returned error (status {status}): {body}"
        ));
    }
    serde_json::from_str(&body).with_context(|| format!("failed to decode {provider} response"))
}

fn chat_local(req: &LlmRequest) -> LlmResponse {
    if req.response_schema.is_some() {
        return LlmResponse::text("{}");
    }
    let context = req
        .system
        .as_deref()
        .map(|system| extract_context_block(system, "Context:"))
        .unwrap_or_default();
    let summary = summarize_text(&context, 40);
    if summary.is_empty() {
        LlmResponse::text(LOCAL_NOT_FOUND)
    } else {
        LlmResponse::text(summary)
    }
}

fn extract_context_block(text: &str, marker: &str) -> String {
    match text.rfind(marker) {
        Some(idx) => text[idx + marker.len()..].trim().to_string(),
        None => String::new(),
    }
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn read_gemini_key() -> Result<String> {
    let (var, value) = match env::var("GOOGLE_API_KEY") {
        Ok(value) => ("GOOGLE_API_KEY", value),
        Err(_) => (
            "GEMINI_API_KEY",
            env::var("GEMINI_API_KEY")
                .map_err(|_| anyhow!("GOOGLE_API_KEY (or GEMINI_API_KEY) is not set"))?,
        ),
    };
    validate_api_key(var, &value)?;
    Ok(value)
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!(format!("{var} is not set")))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!(format!("{var} is empty")));
    }
    if var.contains("OPENAI") && !value.starts_with("sk-") {
        return Err(anyhow!(format!(
            "{} must start with 'sk-' (see https://platform.openai.com/)",
            var
        )));
    }
    if (var.contains("GEMINI") || var.contains("GOOGLE")) && !value.starts_with("AI") {
        return Err(anyhow!(format!(
            "{} must be a valid Gemini API key (starts with 'AI...')",
            var
        )));
    }
    Ok(())
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(|text| text.to_string())
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct OpenAiModelList {
    #[serde(default)]
    data: Vec<OpenAiModel>,
}

#[derive(Deserialize)]
struct OpenAiModel {
    id: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_tokens: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiModelList {
    #[serde(default)]
    models: Vec<GeminiModel>,
}

#[derive(Deserialize)]
struct GeminiModel {
    name: String,
    #[serde(default, rename = "supportedGenerationMethods")]
    supported_generation_methods: Vec<String>,
}
