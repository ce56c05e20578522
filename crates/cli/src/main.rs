use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use project_brain_core::{load_pdf_pages, SourceRef};
use project_brain_rag::{
    AnswerPipeline, ChatModel, EmbeddingClient, ExtractionPipeline, IngestPipeline, LlmClient,
    LlmProvider, LlmRequest, MemoryStore, PineconeClient, PineconeIndex, PineconeStore, Retriever,
};
use project_brain_service::config::{
    config_path_from_env, load_config, FileConfig, PineconeSettings,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PREVIEW_CHARS: usize = 500;
const KEY_PREFIX_CHARS: usize = 5;

const EVALUATION_QUESTIONS: [&str; 5] = [
    "What is the fire rating for door D-101?",
    "List the hardware set for the Lobby door.",
    "What is the height of door 105?",
    "Who is the manufacturer of the wood doors?",
    "Does the roof have a warranty?",
];

#[derive(Parser, Debug)]
#[command(name = "brain", version = VERSION, about = "Project Brain operator CLI")]
struct Cli {
    /// Config file; defaults to $PROJECT_BRAIN_CONFIG or project-brain.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load, split, embed and upsert every PDF under a folder.
    Ingest {
        #[arg(default_value = "Documents")]
        folder: PathBuf,
    },
    /// Vector index provisioning.
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },
    /// Check keys, embeddings, index search and chat independently.
    Doctor,
    /// List chat models that support content generation.
    Models,
    /// Print per-page extracted text of one PDF.
    InspectPdf { file: PathBuf },
    /// Post a fixed question set to a running service.
    Evaluate {
        #[arg(long, default_value = "http://localhost:8000")]
        url: String,
        #[arg(long = "delay-secs", default_value_t = 10)]
        delay_secs: u64,
        /// Replaces the built-in question set when given.
        #[arg(long = "question")]
        questions: Vec<String>,
    },
    /// Answer one question through the answer pipeline.
    Ask {
        question: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Run door schedule extraction.
    Extract {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        query: Option<String>,
        #[arg(long = "top-k")]
        top_k: Option<usize>,
        #[arg(long)]
        strategy: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum IndexCommands {
    /// Create the configured index if it is missing and wait until it is ready.
    Ensure,
    /// Report dimension and vector count.
    Stats,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Build an in-memory index from this PDF folder instead of using the hosted index.
    #[arg(long)]
    local: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config_path_from_env);
    let config = load_config(&config_path)?;

    match cli.command {
        Commands::Ingest { folder } => cmd_ingest(&config, &folder).await,
        Commands::Index { command } => match command {
            IndexCommands::Ensure => cmd_index_ensure(&config).await,
            IndexCommands::Stats => cmd_index_stats(&config).await,
        },
        Commands::Doctor => cmd_doctor(&config).await,
        Commands::Models => cmd_models().await,
        Commands::InspectPdf { file } => cmd_inspect_pdf(&file),
        Commands::Evaluate {
            url,
            delay_secs,
            questions,
        } => cmd_evaluate(&url, Duration::from_secs(delay_secs), questions).await,
        Commands::Ask { question, source } => cmd_ask(&config, &question, &source).await,
        Commands::Extract {
            source,
            query,
            top_k,
            strategy,
        } => cmd_extract(&config, &source, query, top_k, strategy).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn connect_index(settings: &PineconeSettings) -> Result<PineconeIndex> {
    let client = PineconeClient::from_env()?;
    client
        .connect(
            &settings.index_name,
            settings.host.as_deref(),
            settings.namespace.clone(),
        )
        .await
        .with_context(|| format!("failed to connect to index {}", settings.index_name))
}

/// Hosted index unless `--local` names a folder, in which case its PDFs are ingested into memory.
async fn build_retriever(config: &FileConfig, source: &SourceArgs) -> Result<Arc<dyn Retriever>> {
    let embeddings = config.embedding_client()?;
    match &source.local {
        Some(folder) => {
            let store = Arc::new(MemoryStore::new(embeddings.clone()));
            let report = IngestPipeline::new(embeddings, store.clone())
                .ingest_folder(folder)
                .await?;
            info!(chunks = report.chunks, folder = %folder.display(), "built in-memory index");
            Ok(store)
        }
        None => {
            let settings = PineconeSettings::from_env()?;
            let index = connect_index(&settings).await?;
            Ok(Arc::new(PineconeStore::new(index, embeddings)))
        }
    }
}

async fn cmd_ingest(config: &FileConfig, folder: &Path) -> Result<()> {
    let embeddings = config.embedding_client()?;
    let settings = PineconeSettings::from_env()?;
    let index = connect_index(&settings).await?;
    let store = Arc::new(PineconeStore::new(index, embeddings.clone()));
    let report = IngestPipeline::new(embeddings, store)
        .ingest_folder(folder)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_index_ensure(config: &FileConfig) -> Result<()> {
    let settings = PineconeSettings::from_env()?;
    let client = PineconeClient::from_env()?;
    let embeddings = config.embedding_client()?;
    let existing = client.list_indexes().await?;
    if existing.iter().any(|index| index.name == settings.index_name) {
        println!("index {} already exists", settings.index_name);
    } else {
        let spec = config
            .index
            .spec(&settings.index_name, embeddings.dimensions());
        println!(
            "creating index {} (dimension {}, metric {}, {}/{})",
            spec.name, spec.dimension, spec.metric, spec.cloud, spec.region
        );
        client.create_index(&spec).await?;
    }
    let description = client
        .wait_until_ready(
            &settings.index_name,
            config.index.poll_interval(),
            config.index.ready_timeout(),
        )
        .await?;
    println!(
        "index {} ready (dimension {}, host {})",
        description.name,
        description
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "?".to_string()),
        description.host.as_deref().unwrap_or("?")
    );
    Ok(())
}

async fn cmd_index_stats(config: &FileConfig) -> Result<()> {
    let settings = PineconeSettings::from_env()?;
    let index = connect_index(&settings).await?;
    let stats = index.stats().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "index": settings.index_name,
            "dimension": stats.dimension,
            "total_vector_count": stats.total_vector_count,
        }))?
    );
    let embeddings = config.embedding_client()?;
    if let Some(dimension) = stats.dimension {
        if dimension != embeddings.dimensions() {
            warn!(
                index_dimension = dimension,
                embedding_dimension = embeddings.dimensions(),
                embeddings = embeddings.name(),
                "index dimension does not match the configured embeddings"
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct CheckOutcome {
    name: &'static str,
    passed: bool,
    detail: String,
}

impl CheckOutcome {
    fn from_result(name: &'static str, result: Result<String>) -> Self {
        match result {
            Ok(detail) => Self {
                name,
                passed: true,
                detail,
            },
            Err(err) => Self {
                name,
                passed: false,
                detail: format!("{err:#}"),
            },
        }
    }
}

/// First few characters of a secret, for confirming which key is loaded.
fn mask_key(value: &str) -> String {
    let prefix: String = value.chars().take(KEY_PREFIX_CHARS).collect();
    format!("{prefix}...")
}

fn describe_key(names: &[&str]) -> Result<String> {
    names
        .iter()
        .find_map(|name| {
            env::var(name)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(|value| format!("{name}={}", mask_key(&value)))
        })
        .ok_or_else(|| anyhow!("{} not set", names.join(" / ")))
}

async fn check_embeddings(embeddings: &EmbeddingClient) -> Result<String> {
    let vector = embeddings.embed("fire rated door").await?;
    if vector.len() != embeddings.dimensions() {
        bail!(
            "expected {} dimensions, got {}",
            embeddings.dimensions(),
            vector.len()
        );
    }
    Ok(format!("{} -> {} dims", embeddings.name(), vector.len()))
}

async fn check_search(embeddings: EmbeddingClient) -> Result<String> {
    let settings = PineconeSettings::from_env()?;
    let index = connect_index(&settings).await?;
    let store = PineconeStore::new(index, embeddings);
    let hits = store.search("door schedule", 1).await?;
    Ok(match hits.first() {
        Some(chunk) => format!(
            "top hit {} page {}",
            chunk.source_ref().file,
            chunk.source_ref().page
        ),
        None => "index reachable, no vectors".to_string(),
    })
}

async fn check_chat(config: &FileConfig) -> Result<String> {
    let client = config.llm_client()?;
    let response = client
        .generate(&LlmRequest::new("Reply with the single word OK.").with_temperature(0.0))
        .await?;
    Ok(format!(
        "{} replied {:?}",
        client.model(),
        response.content.trim()
    ))
}

async fn cmd_doctor(config: &FileConfig) -> Result<()> {
    let mut outcomes = vec![
        CheckOutcome::from_result(
            "google_api_key",
            describe_key(&["GOOGLE_API_KEY", "GEMINI_API_KEY"]),
        ),
        CheckOutcome::from_result("pinecone_api_key", describe_key(&["PINECONE_API_KEY"])),
        CheckOutcome::from_result(
            "pinecone_index_name",
            env::var("PINECONE_INDEX_NAME").map_err(|_| anyhow!("PINECONE_INDEX_NAME not set")),
        ),
    ];
    match config.embedding_client() {
        Ok(embeddings) => {
            outcomes.push(CheckOutcome::from_result(
                "embeddings",
                check_embeddings(&embeddings).await,
            ));
            outcomes.push(CheckOutcome::from_result(
                "index_search",
                check_search(embeddings).await,
            ));
        }
        Err(err) => outcomes.push(CheckOutcome::from_result("embeddings", Err(err))),
    }
    outcomes.push(CheckOutcome::from_result("chat", check_chat(config).await));

    for outcome in &outcomes {
        let mark = if outcome.passed { "PASS" } else { "FAIL" };
        println!("[{mark}] {:<20} {}", outcome.name, outcome.detail);
    }
    let failed = outcomes.iter().filter(|outcome| !outcome.passed).count();
    if failed > 0 {
        bail!("{failed} check(s) failed");
    }
    Ok(())
}

async fn cmd_models() -> Result<()> {
    let client = LlmClient::new(LlmProvider::Gemini, LlmProvider::Gemini.default_model())?;
    let models = client.list_models().await?;
    let usable: Vec<_> = models
        .iter()
        .filter(|model| model.supports_generate_content())
        .collect();
    for model in &usable {
        println!("{}", model.name);
    }
    info!(total = models.len(), usable = usable.len(), "listed models");
    Ok(())
}

fn cmd_inspect_pdf(file: &Path) -> Result<()> {
    let pages = load_pdf_pages(file)?;
    println!("{}: {} page(s)", file.display(), pages.len());
    for page in &pages {
        println!("--- page {} ---", page.page + 1);
        if page.is_blank() {
            println!("(no extractable text: the page may be scanned or image-only)");
            continue;
        }
        let preview: String = page.text.chars().take(PREVIEW_CHARS).collect();
        println!("{preview}");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    answer: String,
    #[serde(default)]
    sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, PartialEq)]
struct EvaluationRow {
    question: String,
    outcome: std::result::Result<(String, usize), String>,
    latency: Duration,
}

#[derive(Debug, PartialEq)]
struct EvaluationSummary {
    asked: usize,
    answered: usize,
    not_found: usize,
    failed: usize,
    mean_latency: Duration,
}

fn summarize(rows: &[EvaluationRow]) -> EvaluationSummary {
    let answered = rows.iter().filter(|row| row.outcome.is_ok()).count();
    let not_found = rows
        .iter()
        .filter(|row| {
            row.outcome
                .as_ref()
                .map(|(answer, _)| answer.contains("cannot find"))
                .unwrap_or(false)
        })
        .count();
    let total: Duration = rows.iter().map(|row| row.latency).sum();
    EvaluationSummary {
        asked: rows.len(),
        answered,
        not_found,
        failed: rows.len() - answered,
        mean_latency: if rows.is_empty() {
            Duration::ZERO
        } else {
            total / rows.len() as u32
        },
    }
}

async fn ask_service(http: &reqwest::Client, endpoint: &str, question: &str) -> Result<ChatReply> {
    let response = http
        .post(endpoint)
        .json(&json!({ "query": question }))
        .send()
        .await
        .with_context(|| format!("request to {endpoint} failed"))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("{status}: {body}");
    }
    response.json().await.context("invalid chat response")
}

async fn cmd_evaluate(base_url: &str, delay: Duration, questions: Vec<String>) -> Result<()> {
    let questions = if questions.is_empty() {
        EVALUATION_QUESTIONS.iter().map(|q| q.to_string()).collect()
    } else {
        questions
    };
    let endpoint = format!("{}/chat", base_url.trim_end_matches('/'));
    let http = reqwest::Client::new();
    let mut rows = Vec::with_capacity(questions.len());

    for (idx, question) in questions.iter().enumerate() {
        if idx > 0 && !delay.is_zero() {
            sleep(delay).await;
        }
        println!("Q{}: {question}", idx + 1);
        let started = Instant::now();
        let result = ask_service(&http, &endpoint, question).await;
        let latency = started.elapsed();
        let outcome = match result {
            Ok(reply) => {
                println!("A: {}", reply.answer.trim());
                println!(
                    "   {} source(s) in {:.2}s",
                    reply.sources.len(),
                    latency.as_secs_f64()
                );
                Ok((reply.answer, reply.sources.len()))
            }
            Err(err) => {
                println!("ERROR: {err:#}");
                Err(format!("{err:#}"))
            }
        };
        rows.push(EvaluationRow {
            question: question.clone(),
            outcome,
            latency,
        });
    }

    let summary = summarize(&rows);
    println!(
        "\n{} asked, {} answered ({} not found in context), {} failed, mean latency {:.2}s",
        summary.asked,
        summary.answered,
        summary.not_found,
        summary.failed,
        summary.mean_latency.as_secs_f64()
    );
    for row in rows.iter().filter(|row| row.outcome.is_err()) {
        println!("  failed: {}", row.question);
    }
    Ok(())
}

async fn cmd_ask(config: &FileConfig, question: &str, source: &SourceArgs) -> Result<()> {
    let retriever = build_retriever(config, source).await?;
    let model: Arc<dyn ChatModel> = Arc::new(config.llm_client()?);
    let answer = AnswerPipeline::new(retriever, model)
        .with_top_k(config.retrieval.chat_top_k)
        .ask(question)
        .await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

async fn cmd_extract(
    config: &FileConfig,
    source: &SourceArgs,
    query: Option<String>,
    top_k: Option<usize>,
    strategy: Option<String>,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(strategy) = strategy {
        config.extraction.strategy = strategy;
    }
    let retriever = build_retriever(&config, source).await?;
    let model: Arc<dyn ChatModel> = Arc::new(config.llm_client()?);
    let generator = config.extraction_strategy()?.generator(model);
    let pipeline = ExtractionPipeline::with_generator(retriever, generator)
        .with_query(query.unwrap_or_else(|| config.retrieval.extract_query.clone()))
        .with_top_k(top_k.unwrap_or(config.retrieval.extract_top_k));
    let schedule = pipeline.extract_schedule().await;
    println!("{}", serde_json::to_string_pretty(&schedule)?);
    Ok(())
}
