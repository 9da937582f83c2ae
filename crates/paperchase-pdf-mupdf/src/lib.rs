use std::path::Path;

use mupdf::Document;

use paperchase_core::{BackendError, PdfBackend};

/// MuPDF-based implementation of [`PdfBackend`].
///
/// This crate is the sole AGPL island. It isolates the mupdf dependency
/// (which is AGPL-3.0) so that the resolution engine does not transitively
/// depend on it.
///
/// Only structure is inspected: the document must open and its page tree
/// must be readable. Damaged cross-reference tables are repaired by MuPDF
/// on open, so a file that passes here is one a reader can display.
#[derive(Debug, Default, Clone, Copy)]
pub struct MupdfBackend;

impl MupdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PdfBackend for MupdfBackend {
    fn page_count(&self, path: &Path) -> Result<usize, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;

        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;

        let count = document
            .page_count()
            .map_err(|e| BackendError::PageError(e.to_string()))?;

        usize::try_from(count).map_err(|_| BackendError::PageError(format!("negative page count {count}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One empty US-letter page. Offsets are approximate; MuPDF repairs them.
    const ONE_PAGE: &str = "%PDF-1.4\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >> endobj\n\
trailer << /Root 1 0 R /Size 4 >>\n\
%%EOF\n";

    #[test]
    fn counts_pages_of_minimal_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.pdf");
        std::fs::write(&path, ONE_PAGE).unwrap();
        assert_eq!(MupdfBackend::new().page_count(&path).unwrap(), 1);
    }

    #[test]
    fn html_saved_as_pdf_has_no_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("login.pdf");
        std::fs::write(&path, "<html><body>Please sign in</body></html>").unwrap();
        let result = MupdfBackend::new().page_count(&path);
        assert!(!matches!(result, Ok(n) if n > 0));
    }

    #[test]
    fn missing_file_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MupdfBackend::new()
            .page_count(&dir.path().join("absent.pdf"))
            .unwrap_err();
        assert!(matches!(err, BackendError::OpenError(_)));
    }
}
