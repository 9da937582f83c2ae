use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to read page tree: {0}")]
    PageError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for PDF parsing backends.
///
/// Implementors only need to open the document and count its pages; the
/// acceptance policy lives in [`crate::validator::ArtifactValidator`].
pub trait PdfBackend: Send + Sync {
    /// Number of pages in the PDF at `path`.
    fn page_count(&self, path: &Path) -> Result<usize, BackendError>;
}
