use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use project_brain_core::{Answer, Chunk};

use crate::index::Retriever;
use crate::model::ChatModel;
use crate::LlmRequest;

pub const CHAT_TOP_K: usize = 5;

pub const ANSWER_SYSTEM_PROMPT: &str = "You are a construction AI. Answer based ONLY on the context provided. \
If the answer is not in the context, say 'I cannot find that information'. Context: {context}";

pub struct AnswerPipeline {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn ChatModel>,
    top_k: usize,
}

impl AnswerPipeline {
    pub fn new(retriever: Arc<dyn Retriever>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            retriever,
            model,
            top_k: CHAT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn ask(&self, query: &str) -> Result<Answer> {
        info!(query_len = query.len(), "answering question");
        let mut chunks = self
            .retriever
            .search(query, self.top_k)
            .await
            .context("similarity search failed")?;
        chunks.truncate(self.top_k);
        debug!(retrieved = chunks.len(), "retrieved context chunks");

        let request = build_answer_request(query, &chunks);
        let response = self
            .model
            .generate(&request)
            .await
            .context("chat model request failed")?;

        Ok(Answer {
            text: response.content,
            sources: chunks.iter().map(Chunk::source_ref).collect(),
        })
    }
}

/// Chunk contents in retrieval order, separated by blank lines.
pub fn join_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_answer_request(query: &str, chunks: &[Chunk]) -> LlmRequest {
    let context = join_context(chunks);
    debug!(context_chars = context.len(), "built answer context");
    LlmRequest::new(query)
        .with_system(ANSWER_SYSTEM_PROMPT.replace("{context}", &context))
        .with_temperature(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmResponse;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FixedRetriever {
        chunks: Vec<Chunk>,
        requested_k: Mutex<Option<usize>>,
    }

    impl FixedRetriever {
        fn new(chunks: Vec<Chunk>) -> Self {
            Self {
                chunks,
                requested_k: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<Chunk>> {
            *self.requested_k.lock() = Some(k);
            Ok(self.chunks.clone())
        }
    }

    struct RecordingModel {
        reply: Result<String, String>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl RecordingModel {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
            self.seen.lock().push(request.clone());
            match &self.reply {
                Ok(text) => Ok(LlmResponse::text(text.clone())),
                Err(message) => Err(anyhow!(message.clone())),
            }
        }
    }

    #[tokio::test]
    async fn sources_use_basename_and_one_based_pages() {
        let retriever = Arc::new(FixedRetriever::new(vec![
            Chunk::new("D-101 is rated 1 HR", "Documents/Schedules/doors.pdf", 0),
            Chunk::new("Lobby hardware set 3", "Documents/specs.pdf", 4),
            Chunk::new("D-101 again", "Documents/Schedules/doors.pdf", 0),
        ]));
        let model = Arc::new(RecordingModel::replying("D-101 is rated 1 HR."));
        let pipeline = AnswerPipeline::new(retriever.clone(), model.clone());

        let answer = pipeline.ask("What is the fire rating for door D-101?").await.unwrap();
        assert_eq!(answer.text, "D-101 is rated 1 HR.");
        let pages: Vec<(&str, u32)> = answer
            .sources
            .iter()
            .map(|source| (source.file.as_str(), source.page))
            .collect();
        assert_eq!(
            pages,
            vec![("doors.pdf", 1), ("specs.pdf", 5), ("doors.pdf", 1)]
        );
        assert_eq!(*retriever.requested_k.lock(), Some(CHAT_TOP_K));
    }

    #[tokio::test]
    async fn request_carries_context_and_zero_temperature() {
        let retriever = Arc::new(FixedRetriever::new(vec![
            Chunk::new("first", "a.pdf", 0),
            Chunk::new("second", "b.pdf", 1),
        ]));
        let model = Arc::new(RecordingModel::replying("ok"));
        AnswerPipeline::new(retriever, model.clone())
            .ask("question?")
            .await
            .unwrap();

        let seen = model.seen.lock();
        assert_eq!(seen.len(), 1);
        let request = &seen[0];
        assert_eq!(request.user, "question?");
        assert_eq!(request.temperature, Some(0.0));
        let system = request.system.as_deref().unwrap();
        assert!(system.starts_with("You are a construction AI."));
        assert!(system.ends_with("Context: first\n\nsecond"));
        assert!(request.response_schema.is_none());
    }

    #[tokio::test]
    async fn empty_retrieval_still_answers() {
        let retriever = Arc::new(FixedRetriever::new(Vec::new()));
        let model = Arc::new(RecordingModel::replying("I cannot find that information"));
        let answer = AnswerPipeline::new(retriever, model)
            .ask("Does the roof have a warranty?")
            .await
            .unwrap();
        assert_eq!(answer.text, "I cannot find that information");
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn sources_never_exceed_top_k() {
        let chunks = (0..8)
            .map(|page| Chunk::new(format!("chunk {page}"), "dir/x.pdf", page))
            .collect();
        let retriever = Arc::new(FixedRetriever::new(chunks));
        let model = Arc::new(RecordingModel::replying("fine"));
        let answer = AnswerPipeline::new(retriever, model)
            .with_top_k(3)
            .ask("q")
            .await
            .unwrap();
        assert_eq!(answer.sources.len(), 3);
        assert!(answer.sources.iter().all(|source| !source.file.contains('/')));
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let retriever = Arc::new(FixedRetriever::new(vec![Chunk::new("x", "a.pdf", 0)]));
        let model = Arc::new(RecordingModel::failing("quota exceeded"));
        let err = AnswerPipeline::new(retriever, model)
            .ask("q")
            .await
            .unwrap_err();
        let rendered = format!("{err:#}");
        assert!(rendered.contains("chat model request failed"));
        assert!(rendered.contains("quota exceeded"));
    }
}
