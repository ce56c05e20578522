use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrainError {
    #[error("pdf extract failed for {path:?}: {message}")]
    PdfExtract { path: PathBuf, message: String },
    #[error("document folder not found: {0:?}")]
    MissingFolder(PathBuf),
}

pub type Result<T> = std::result::Result<T, BrainError>;
