use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use project_brain_core::{cosine_similarity, Chunk};

use super::{EmbeddedChunk, Retriever, VectorStore};
use crate::embedding::EmbeddingClient;

pub struct MemoryStore {
    embeddings: EmbeddingClient,
    entries: RwLock<Vec<EmbeddedChunk>>,
}

impl MemoryStore {
    pub fn new(embeddings: EmbeddingClient) -> Self {
        Self {
            embeddings,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Retriever for MemoryStore {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        let query_vector = self.embeddings.embed(query).await?;
        let entries = self.entries.read();
        let mut hits: Vec<(f32, &EmbeddedChunk)> = entries
            .iter()
            .map(|entry| (cosine_similarity(&query_vector, &entry.values), entry))
            .collect();
        hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits
            .into_iter()
            .take(k)
            .map(|(_, entry)| entry.chunk.clone())
            .collect())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert(&self, records: &[EmbeddedChunk]) -> Result<usize> {
        let mut entries = self.entries.write();
        for record in records {
            match entries.iter_mut().find(|entry| entry.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => entries.push(record.clone()),
            }
        }
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> MemoryStore {
        let embeddings = EmbeddingClient::hash(128);
        let store = MemoryStore::new(embeddings.clone());
        let chunks = [
            Chunk::new("D-101 Lobby 900 2100 fire rating 1 HR timber", "docs/doors.pdf", 0),
            Chunk::new("Roof membrane warranty twenty years", "docs/roof.pdf", 2),
            Chunk::new("D-102 Office 820 2100 fire rating none steel", "docs/doors.pdf", 1),
        ];
        let mut records = Vec::new();
        for (idx, chunk) in chunks.into_iter().enumerate() {
            records.push(EmbeddedChunk {
                id: format!("chunk-{idx}"),
                values: embeddings.embed(&chunk.content).await.unwrap(),
                chunk,
            });
        }
        store.upsert(&records).await.unwrap();
        store
    }

    #[tokio::test]
    async fn search_ranks_by_similarity_and_limits_k() {
        let store = seeded_store().await;
        let hits = store.search("fire rating for door D-101", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.starts_with("D-101"));
        assert!(hits.iter().all(|hit| !hit.content.contains("Roof")));
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = MemoryStore::new(EmbeddingClient::hash(32));
        assert!(store.search("anything", 5).await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_ids() {
        let store = seeded_store().await;
        let embeddings = EmbeddingClient::hash(128);
        let replacement = Chunk::new("D-101 revised hardware set 4", "docs/doors.pdf", 0);
        store
            .upsert(&[EmbeddedChunk {
                id: "chunk-0".to_string(),
                values: embeddings.embed(&replacement.content).await.unwrap(),
                chunk: replacement,
            }])
            .await
            .unwrap();
        assert_eq!(store.len(), 3);
        let hits = store.search("revised hardware set", 1).await.unwrap();
        assert_eq!(hits[0].content, "D-101 revised hardware set 4");
    }
}
