use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use project_brain_core::DoorSchedule;

use crate::answer::join_context;
use crate::index::Retriever;
use crate::model::ChatModel;
use crate::recovery::recover_schedule;
use crate::LlmRequest;

pub const DEFAULT_EXTRACT_QUERY: &str =
    "door schedule list hardware openings frame material width height fire rating";
pub const EXTRACT_TOP_K: usize = 10;

const EXTRACTION_PROMPT: &str = "Analyze the text below and extract the Door Schedule table.

CRITICAL INSTRUCTION:
The text might be messy (e.g. '2100 1 HR' might be on the same line).
You must infer the columns based on the headers 'Mark', 'Location', 'Width', 'Height', 'Fire Rating', 'Material'.
Extract every single door row whose mark starts with 'D-'.

Return ONLY a JSON object of this exact shape, with no commentary:
{\"doors\": [{\"mark\": \"\", \"location\": \"\", \"width_mm\": \"\", \"height_mm\": \"\", \"fire_rating\": \"\", \"material\": \"\"}]}
Use null for any value that is not present in the text.

TEXT CONTENT:
{context}";

pub fn build_extraction_prompt(context: &str) -> String {
    EXTRACTION_PROMPT.replace("{context}", context)
}

/// JSON schema for `{"doors": [...]}` in the lowercase dialect both providers accept.
pub fn door_schedule_schema() -> Value {
    let text = json!({ "type": "string" });
    json!({
        "type": "object",
        "properties": {
            "doors": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "mark": text,
                        "location": text,
                        "width_mm": text,
                        "height_mm": text,
                        "fire_rating": text,
                        "material": text
                    }
                }
            }
        },
        "required": ["doors"]
    })
}

#[async_trait]
pub trait ScheduleGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate_schedule(&self, context: &str) -> Result<DoorSchedule>;
}

pub struct TextRecoveryGenerator {
    model: Arc<dyn ChatModel>,
}

impl TextRecoveryGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ScheduleGenerator for TextRecoveryGenerator {
    fn name(&self) -> &'static str {
        "recovery"
    }

    async fn generate_schedule(&self, context: &str) -> Result<DoorSchedule> {
        let request = LlmRequest::new(build_extraction_prompt(context)).with_temperature(0.0);
        let response = self
            .model
            .generate(&request)
            .await
            .context("schedule generation failed")?;
        Ok(recover_schedule(&response.content))
    }
}

/// Provider-enforced JSON schema. Output still goes through recovery since providers
/// occasionally wrap schema-constrained output in fences.
pub struct StructuredOutputGenerator {
    model: Arc<dyn ChatModel>,
}

impl StructuredOutputGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ScheduleGenerator for StructuredOutputGenerator {
    fn name(&self) -> &'static str {
        "structured"
    }

    async fn generate_schedule(&self, context: &str) -> Result<DoorSchedule> {
        let request = LlmRequest::new(build_extraction_prompt(context))
            .with_temperature(0.0)
            .with_response_schema(door_schedule_schema());
        let response = self
            .model
            .generate(&request)
            .await
            .context("structured schedule generation failed")?;
        Ok(recover_schedule(&response.content))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionStrategy {
    #[default]
    Recovery,
    Structured,
}

impl ExtractionStrategy {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "recovery" | "text" => Some(ExtractionStrategy::Recovery),
            "structured" | "schema" => Some(ExtractionStrategy::Structured),
            _ => None,
        }
    }

    pub fn generator(&self, model: Arc<dyn ChatModel>) -> Arc<dyn ScheduleGenerator> {
        match self {
            ExtractionStrategy::Recovery => Arc::new(TextRecoveryGenerator::new(model)),
            ExtractionStrategy::Structured => Arc::new(StructuredOutputGenerator::new(model)),
        }
    }
}

pub struct ExtractionPipeline {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn ScheduleGenerator>,
    query: String,
    top_k: usize,
}

impl ExtractionPipeline {
    pub fn new(retriever: Arc<dyn Retriever>, model: Arc<dyn ChatModel>) -> Self {
        Self::with_generator(retriever, ExtractionStrategy::default().generator(model))
    }

    pub fn with_generator(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn ScheduleGenerator>,
    ) -> Self {
        Self {
            retriever,
            generator,
            query: DEFAULT_EXTRACT_QUERY.to_string(),
            top_k: EXTRACT_TOP_K,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn strategy_name(&self) -> &'static str {
        self.generator.name()
    }

    /// Best effort. Retrieval or provider failures are logged and yield the empty schedule.
    pub async fn extract_schedule(&self) -> DoorSchedule {
        match self.try_extract().await {
            Ok(schedule) => {
                info!(
                    doors = schedule.len(),
                    strategy = self.generator.name(),
                    "extracted door schedule"
                );
                schedule
            }
            Err(err) => {
                warn!(
                    error = %format!("{err:#}"),
                    strategy = self.generator.name(),
                    "door schedule extraction degraded to empty"
                );
                DoorSchedule::empty()
            }
        }
    }

    async fn try_extract(&self) -> Result<DoorSchedule> {
        let mut chunks = self
            .retriever
            .search(&self.query, self.top_k)
            .await
            .context("similarity search failed")?;
        chunks.truncate(self.top_k);
        let context = join_context(&chunks);
        info!(
            retrieved = chunks.len(),
            context_chars = context.len(),
            "extracting door schedule"
        );
        self.generator.generate_schedule(&context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmResponse;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use project_brain_core::{Chunk, DoorRecord};

    struct QueryRecorder {
        chunks: Vec<Chunk>,
        fail: bool,
        seen: Mutex<Vec<(String, usize)>>,
    }

    impl QueryRecorder {
        fn with_chunks(chunks: Vec<Chunk>) -> Self {
            Self {
                chunks,
                fail: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                chunks: Vec::new(),
                fail: true,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Retriever for QueryRecorder {
        async fn search(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
            self.seen.lock().push((query.to_string(), k));
            if self.fail {
                return Err(anyhow!("index unreachable"));
            }
            Ok(self.chunks.clone())
        }
    }

    struct CannedModel {
        reply: Option<String>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl CannedModel {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for CannedModel {
        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
            self.seen.lock().push(request.clone());
            self.reply
                .clone()
                .map(LlmResponse::text)
                .ok_or_else(|| anyhow!("503 model overloaded"))
        }
    }

    fn schedule_chunks() -> Vec<Chunk> {
        vec![
            Chunk::new("Mark Location Width Height Fire Rating Material", "d/doors.pdf", 0),
            Chunk::new("D-101 Lobby 900 2100 1 HR Timber", "d/doors.pdf", 0),
        ]
    }

    #[tokio::test]
    async fn uses_default_query_and_window() {
        let retriever = Arc::new(QueryRecorder::with_chunks(schedule_chunks()));
        let model = CannedModel::replying(r#"{"doors": []}"#);
        let pipeline = ExtractionPipeline::new(retriever.clone(), model.clone());
        assert_eq!(pipeline.strategy_name(), "recovery");
        pipeline.extract_schedule().await;

        let seen = retriever.seen.lock();
        assert_eq!(
            seen.as_slice(),
            &[(DEFAULT_EXTRACT_QUERY.to_string(), EXTRACT_TOP_K)]
        );
        let requests = model.seen.lock();
        assert_eq!(requests[0].temperature, Some(0.0));
        assert!(requests[0]
            .user
            .contains("Mark Location Width Height Fire Rating Material\n\nD-101 Lobby"));
        assert!(requests[0].response_schema.is_none());
    }

    #[tokio::test]
    async fn overrides_query_and_k() {
        let retriever = Arc::new(QueryRecorder::with_chunks(Vec::new()));
        let model = CannedModel::replying(r#"{"doors": []}"#);
        ExtractionPipeline::new(retriever.clone(), model)
            .with_query("door hardware")
            .with_top_k(20)
            .extract_schedule()
            .await;
        assert_eq!(
            retriever.seen.lock().as_slice(),
            &[("door hardware".to_string(), 20)]
        );
    }

    #[tokio::test]
    async fn fenced_reply_is_recovered() {
        let retriever = Arc::new(QueryRecorder::with_chunks(schedule_chunks()));
        let model = CannedModel::replying(
            "```json\n{\"doors\": [{\"mark\": \"D-101\", \"location\": \"Lobby\", \"width_mm\": 900, \"height_mm\": \"2100\", \"fire_rating\": \"1 HR\", \"material\": \"Timber\"}]}\n```",
        );
        let schedule = ExtractionPipeline::new(retriever, model).extract_schedule().await;
        assert_eq!(schedule.len(), 1);
        let door = &schedule.doors[0];
        assert_eq!(door.mark.as_deref(), Some("D-101"));
        assert_eq!(door.width.as_deref(), Some("900"));
        assert_eq!(door.height.as_deref(), Some("2100"));
        assert_eq!(door.material.as_deref(), Some("Timber"));
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_empty() {
        let retriever = Arc::new(QueryRecorder::with_chunks(schedule_chunks()));
        let schedule = ExtractionPipeline::new(retriever, CannedModel::failing())
            .extract_schedule()
            .await;
        assert_eq!(schedule, DoorSchedule::empty());
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_to_empty() {
        let model = CannedModel::replying(r#"{"doors": [{"mark": "D-1"}]}"#);
        let schedule = ExtractionPipeline::new(Arc::new(QueryRecorder::failing()), model.clone())
            .extract_schedule()
            .await;
        assert!(schedule.is_empty());
        assert!(model.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn structured_strategy_sends_schema() {
        let retriever = Arc::new(QueryRecorder::with_chunks(schedule_chunks()));
        let model = CannedModel::replying(r#"{"doors": [{"mark": "D-102"}]}"#);
        let generator = ExtractionStrategy::Structured.generator(model.clone());
        let pipeline = ExtractionPipeline::with_generator(retriever, generator);
        assert_eq!(pipeline.strategy_name(), "structured");

        let schedule = pipeline.extract_schedule().await;
        assert_eq!(schedule.doors, vec![DoorRecord::with_mark("D-102")]);
        let requests = model.seen.lock();
        let schema = requests[0].response_schema.as_ref().unwrap();
        assert_eq!(
            schema["properties"]["doors"]["items"]["properties"]["width_mm"]["type"],
            "string"
        );
    }

    #[test]
    fn prompt_names_columns_and_mark_rule() {
        let prompt = build_extraction_prompt("D-101 Lobby");
        assert!(prompt.contains("'Mark', 'Location', 'Width', 'Height', 'Fire Rating', 'Material'"));
        assert!(prompt.contains("starts with 'D-'"));
        assert!(prompt.contains("\"width_mm\""));
        assert!(prompt.ends_with("TEXT CONTENT:\nD-101 Lobby"));
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(
            ExtractionStrategy::from_str("Structured"),
            Some(ExtractionStrategy::Structured)
        );
        assert_eq!(
            ExtractionStrategy::from_str("recovery"),
            Some(ExtractionStrategy::Recovery)
        );
        assert_eq!(ExtractionStrategy::from_str("magic"), None);
    }
}
