use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use project_brain_core::{load_pdf_folder, stable_chunk_id, PageText, TextSplitter};

use crate::embedding::EmbeddingClient;
use crate::index::{EmbeddedChunk, VectorStore};

const DEFAULT_EMBED_BATCH: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files: usize,
    pub pages: usize,
    pub chunks: usize,
    pub upserted: usize,
}

pub struct IngestPipeline {
    embeddings: EmbeddingClient,
    store: Arc<dyn VectorStore>,
    splitter: TextSplitter,
    embed_batch: usize,
}

impl IngestPipeline {
    pub fn new(embeddings: EmbeddingClient, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embeddings,
            store,
            splitter: TextSplitter::default(),
            embed_batch: DEFAULT_EMBED_BATCH,
        }
    }

    pub fn with_splitter(mut self, splitter: TextSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_embed_batch(mut self, batch: usize) -> Self {
        self.embed_batch = batch.max(1);
        self
    }

    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestReport> {
        let folder = folder.to_path_buf();
        info!(folder = %folder.display(), "ingesting pdf folder");
        let pages = tokio::task::spawn_blocking(move || load_pdf_folder(&folder))
            .await
            .context("pdf loading task failed")??;
        self.ingest_pages(&pages).await
    }

    pub async fn ingest_pages(&self, pages: &[PageText]) -> Result<IngestReport> {
        let files: BTreeSet<&str> = pages.iter().map(|page| page.source.as_str()).collect();
        let mut records = Vec::new();
        let mut per_page: HashMap<(&str, u32), usize> = HashMap::new();
        for page in pages.iter().filter(|page| !page.is_blank()) {
            for chunk in self.splitter.split_page(page) {
                let counter = per_page.entry((page.source.as_str(), page.page)).or_insert(0);
                let id = stable_chunk_id(&chunk.source_file, chunk.page_number, *counter);
                *counter += 1;
                records.push((id, chunk));
            }
        }

        let mut report = IngestReport {
            files: files.len(),
            pages: pages.len(),
            chunks: records.len(),
            upserted: 0,
        };
        if records.is_empty() {
            info!("no text to ingest");
            return Ok(report);
        }

        for batch in records.chunks(self.embed_batch) {
            let inputs: Vec<String> = batch
                .iter()
                .map(|(_, chunk)| chunk.content.clone())
                .collect();
            let vectors = self
                .embeddings
                .embed_batch(&inputs)
                .await
                .with_context(|| format!("embedding {} chunks failed", inputs.len()))?;
            ensure!(
                vectors.len() == batch.len(),
                "embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            );
            let embedded: Vec<EmbeddedChunk> = batch
                .iter()
                .zip(vectors)
                .map(|((id, chunk), values)| EmbeddedChunk {
                    id: id.clone(),
                    chunk: chunk.clone(),
                    values,
                })
                .collect();
            report.upserted += self.store.upsert(&embedded).await?;
            debug!(upserted = report.upserted, total = records.len(), "upsert progress");
        }

        info!(
            files = report.files,
            pages = report.pages,
            chunks = report.chunks,
            upserted = report.upserted,
            "ingestion complete"
        );
        Ok(report)
    }
}
