mod memory;
mod pinecone;

pub use memory::MemoryStore;
pub use pinecone::{
    chunk_from_metadata, IndexDescription, IndexSpec, IndexStats, PineconeClient, PineconeIndex,
    PineconeStore, QueryMatch,
};

use anyhow::Result;
use async_trait::async_trait;

use project_brain_core::Chunk;

/// Similarity search over stored chunks. Implementations embed the query text themselves.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` chunks, most similar first. An empty result is not an error.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Chunk>>;
}

/// A retriever that can also be written to during ingestion.
#[async_trait]
pub trait VectorStore: Retriever {
    /// Inserts or replaces vectors by id, returning how many were written.
    async fn upsert(&self, records: &[EmbeddedChunk]) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub id: String,
    pub chunk: Chunk,
    pub values: Vec<f32>,
}
