mod chunk;
mod embedding;
mod error;
mod pdf;
mod types;

pub use chunk::{stable_chunk_id, SplitterConfig, TextSplitter};
pub use embedding::{cosine_similarity, HashEmbedder, HashEmbedderConfig};
pub use error::{BrainError, Result};
pub use pdf::{discover_pdfs, load_pdf_folder, load_pdf_pages, PageText};
pub use types::{Answer, Chunk, DoorRecord, DoorSchedule, SourceRef};
