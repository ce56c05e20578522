use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pdf::PageText;
use crate::types::Chunk;

const CHUNK_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SplitterConfig {
        self.config
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let size = self.config.chunk_size.max(1);
        let overlap = self.config.chunk_overlap.min(size.saturating_sub(1));
        let mut pieces = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let hard_end = (start + size).min(chars.len());
            let end = if hard_end < chars.len() {
                soft_break(&chars, start + overlap + 1, hard_end).unwrap_or(hard_end)
            } else {
                hard_end
            };
            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                pieces.push(trimmed.to_string());
            }
            if end == chars.len() {
                break;
            }
            let mut next = end.saturating_sub(overlap);
            if next > start && !chars[next - 1].is_whitespace() {
                if let Some(idx) = (next..end).find(|&idx| chars[idx].is_whitespace()) {
                    next = idx + 1;
                }
            }
            start = if next > start { next } else { end };
        }
        pieces
    }

    pub fn split_page(&self, page: &PageText) -> Vec<Chunk> {
        self.split_text(&page.text)
            .into_iter()
            .map(|content| Chunk::new(content, page.source.clone(), page.page))
            .collect()
    }

    pub fn split_pages(&self, pages: &[PageText]) -> Vec<Chunk> {
        pages.iter().flat_map(|page| self.split_page(page)).collect()
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(SplitterConfig::default())
    }
}

fn soft_break(chars: &[char], min: usize, max: usize) -> Option<usize> {
    if min >= max {
        return None;
    }
    (min..max)
        .rev()
        .find(|&idx| chars[idx].is_whitespace())
        .map(|idx| idx + 1)
}

pub fn stable_chunk_id(source: &str, page: u32, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(CHUNK_VERSION.to_be_bytes());
    hasher.update(page.to_be_bytes());
    hasher.update((chunk_index as u64).to_be_bytes());
    hex::encode(hasher.finalize())
}
