use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use project_brain_rag::{
    EmbeddingClient, ExtractionStrategy, IndexSpec, LlmClient, LlmProvider, CHAT_TOP_K,
    DEFAULT_EXTRACT_QUERY, EXTRACT_TOP_K,
};

pub const DEFAULT_CONFIG: &str = "project-brain.toml";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Optional `project-brain.toml`. Every key has a default, so an absent file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub retrieval: RetrievalSection,
    pub extraction: ExtractionSection,
    pub index: IndexSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini.as_str().to_string(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub provider: String,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            dimensions: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub chat_top_k: usize,
    pub extract_top_k: usize,
    pub extract_query: String,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            chat_top_k: CHAT_TOP_K,
            extract_top_k: EXTRACT_TOP_K,
            extract_query: DEFAULT_EXTRACT_QUERY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSection {
    pub strategy: String,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            strategy: "recovery".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    pub cloud: String,
    pub region: String,
    pub metric: String,
    pub ready_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            metric: "cosine".to_string(),
            ready_timeout_secs: 120,
            poll_interval_secs: 2,
        }
    }
}

impl IndexSection {
    pub fn spec(&self, name: &str, dimension: usize) -> IndexSpec {
        IndexSpec {
            name: name.to_string(),
            dimension,
            metric: self.metric.clone(),
            cloud: self.cloud.clone(),
            region: self.region.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

impl FileConfig {
    pub fn llm_provider(&self) -> Result<LlmProvider> {
        LlmProvider::from_str(&self.llm.provider)
            .ok_or_else(|| anyhow!("unknown llm provider {}", self.llm.provider))
    }

    pub fn llm_client(&self) -> Result<LlmClient> {
        let provider = self.llm_provider()?;
        let model = self
            .llm
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        LlmClient::new(provider, model)
            .with_context(|| format!("failed to configure {} chat model", provider.as_str()))
    }

    pub fn embedding_client(&self) -> Result<EmbeddingClient> {
        EmbeddingClient::from_settings(
            &self.embedding.provider,
            self.embedding.model.as_deref(),
            self.embedding.dimensions,
        )
        .context("failed to configure embeddings")
    }

    pub fn extraction_strategy(&self) -> Result<ExtractionStrategy> {
        ExtractionStrategy::from_str(&self.extraction.strategy)
            .ok_or_else(|| anyhow!("unknown extraction strategy {}", self.extraction.strategy))
    }
}

/// Missing file yields defaults; unreadable or invalid TOML is an error.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config {}: {e}", path.display()))
}

pub fn config_path_from_env() -> PathBuf {
    env::var("PROJECT_BRAIN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG))
}

#[derive(Debug, Clone)]
pub struct PineconeSettings {
    pub index_name: String,
    pub host: Option<String>,
    pub namespace: Option<String>,
}

impl PineconeSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let index_name = non_empty(lookup("PINECONE_INDEX_NAME"))
            .ok_or_else(|| anyhow!("PINECONE_INDEX_NAME is not set"))?;
        Ok(Self {
            index_name,
            host: non_empty(lookup("PINECONE_HOST")),
            namespace: non_empty(lookup("PINECONE_NAMESPACE")),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub file: FileConfig,
    pub pinecone: PineconeSettings,
    pub bind_addr: SocketAddr,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let file = load_config(&config_path_from_env())?;
        let pinecone = PineconeSettings::from_env()?;
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("BIND_ADDR is not a socket address")?;
        Ok(Self {
            file,
            pinecone,
            bind_addr,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.retrieval.chat_top_k, 5);
        assert_eq!(config.retrieval.extract_top_k, 10);
        assert_eq!(config.retrieval.extract_query, DEFAULT_EXTRACT_QUERY);
        assert_eq!(config.llm_provider().unwrap(), LlmProvider::Gemini);
        assert_eq!(
            config.extraction_strategy().unwrap(),
            ExtractionStrategy::Recovery
        );
        assert_eq!(config.index.metric, "cosine");
        assert_eq!(config.index.ready_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("project-brain.toml");
        fs::write(
            &path,
            "[retrieval]\nextract_top_k = 20\n\n[extraction]\nstrategy = \"structured\"\n\n[embedding]\nprovider = \"hash\"\ndimensions = 64\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.retrieval.extract_top_k, 20);
        assert_eq!(config.retrieval.chat_top_k, 5);
        assert_eq!(
            config.extraction_strategy().unwrap(),
            ExtractionStrategy::Structured
        );
        let embeddings = config.embedding_client().unwrap();
        assert_eq!(embeddings.dimensions(), 64);
        assert_eq!(config.index.spec("brain", 64).region, "us-east-1");
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("project-brain.toml");
        fs::write(&path, "[retrieval\nchat_top_k = five").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut config = FileConfig::default();
        config.llm.provider = "mystery".to_string();
        config.extraction.strategy = "guess".to_string();
        assert!(config.llm_provider().is_err());
        assert!(config.extraction_strategy().is_err());
    }

    #[test]
    fn pinecone_settings_require_index_name() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PINECONE_HOST", "brain-abc.svc.pinecone.io"),
            ("PINECONE_NAMESPACE", " "),
        ]);
        assert!(PineconeSettings::from_lookup(|key| vars.get(key).map(|v| v.to_string())).is_err());

        let vars: HashMap<&str, &str> = HashMap::from([
            ("PINECONE_INDEX_NAME", "project-brain"),
            ("PINECONE_HOST", "brain-abc.svc.pinecone.io"),
            ("PINECONE_NAMESPACE", " "),
        ]);
        let settings =
            PineconeSettings::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.index_name, "project-brain");
        assert_eq!(settings.host.as_deref(), Some("brain-abc.svc.pinecone.io"));
        assert!(settings.namespace.is_none());
    }
}
