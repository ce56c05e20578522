use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{BrainError, Result};

/// Extracted text of one PDF page. `page` is 0-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub source: String,
    pub page: u32,
    pub text: String,
}

impl PageText {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// All pages of a single PDF, blank ones included, in page order.
pub fn load_pdf_pages(path: &Path) -> Result<Vec<PageText>> {
    let pages = pdf_extract::extract_text_by_pages(path).map_err(|e| BrainError::PdfExtract {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let source = path.to_string_lossy().replace('\\', "/");
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(idx, text)| PageText {
            source: source.clone(),
            page: idx as u32,
            text,
        })
        .collect())
}

/// Recursively finds `*.pdf` files (case-insensitive extension), sorted for stable ingestion.
pub fn discover_pdfs(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(BrainError::MissingFolder(folder.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_pdf(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Loads every non-blank page of every PDF under `folder`.
///
/// A PDF that fails to parse is logged and skipped so one bad upload does not block the
/// rest of the folder.
pub fn load_pdf_folder(folder: &Path) -> Result<Vec<PageText>> {
    let mut pages = Vec::new();
    for path in discover_pdfs(folder)? {
        match load_pdf_pages(&path) {
            Ok(loaded) => {
                let total = loaded.len();
                let kept: Vec<PageText> = loaded.into_iter().filter(|p| !p.is_blank()).collect();
                debug!(file = %path.display(), total, kept = kept.len(), "loaded pdf");
                pages.extend(kept);
            }
            Err(err) => warn!(file = %path.display(), error = %err, "skipping unreadable pdf"),
        }
    }
    Ok(pages)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn discover_finds_nested_pdfs_only() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("drawings");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("specs.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(nested.join("DOORS.PDF"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a pdf").unwrap();

        let found = discover_pdfs(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| is_pdf(p)));
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = tempdir().unwrap();
        let err = discover_pdfs(&dir.path().join("Documents")).unwrap_err();
        assert!(matches!(err, BrainError::MissingFolder(_)));
    }

    #[test]
    fn broken_pdf_is_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.pdf"), b"definitely not a pdf").unwrap();
        let pages = load_pdf_folder(dir.path()).unwrap();
        assert!(pages.is_empty());
    }
}
