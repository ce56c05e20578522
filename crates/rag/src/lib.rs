pub mod answer;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod model;
pub mod recovery;

pub use answer::{build_answer_request, AnswerPipeline, ANSWER_SYSTEM_PROMPT, CHAT_TOP_K};
pub use embedding::{EmbeddingBackend, EmbeddingClient};
pub use extract::{
    build_extraction_prompt, door_schedule_schema, ExtractionPipeline, ExtractionStrategy,
    ScheduleGenerator, StructuredOutputGenerator, TextRecoveryGenerator, DEFAULT_EXTRACT_QUERY,
    EXTRACT_TOP_K,
};
pub use index::{
    EmbeddedChunk, IndexDescription, IndexSpec, IndexStats, MemoryStore, PineconeClient,
    PineconeIndex, PineconeStore, Retriever, VectorStore,
};
pub use ingest::{IngestPipeline, IngestReport};
pub use model::ChatModel;
pub use recovery::{recover_json, recover_schedule, strip_code_fences, ParseStrategy};
pub use project_brain_llm::{LlmClient, LlmProvider, LlmRequest, LlmResponse, ModelInfo};
