//! Acceptance checks for downloaded artifacts.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::backend::PdfBackend;

/// Default minimum artifact size. A real paper is well above this; error
/// pages and one-page stubs are not.
pub const DEFAULT_MIN_PDF_SIZE: u64 = 50_000;

/// Lowercase filename fragments that mark supplementary material.
const SUPPLEMENTARY_MARKERS: &[&str] = &["supplem", "suppinfo", "si_", "_si.", "s001", "s002"];

/// Why an artifact was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Missing,
    TooSmall { size: u64, min: u64 },
    BadHeader,
    Unreadable(String),
    NoPages,
    Supplementary,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Missing => write!(f, "file missing"),
            Rejection::TooSmall { size, min } => {
                write!(f, "too small: {} bytes (min: {})", size, min)
            }
            Rejection::BadHeader => write!(f, "not a PDF (bad header)"),
            Rejection::Unreadable(e) => write!(f, "cannot be opened: {}", e),
            Rejection::NoPages => write!(f, "PDF has no pages"),
            Rejection::Supplementary => write!(f, "looks like supplementary material"),
        }
    }
}

/// True when `file_name` follows a supplementary-material naming convention.
pub fn is_supplementary_name(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    SUPPLEMENTARY_MARKERS.iter().any(|m| lower.contains(m))
}

/// Decides whether a file on disk is an acceptable standalone article PDF.
#[derive(Clone)]
pub struct ArtifactValidator {
    backend: Arc<dyn PdfBackend>,
    min_size: u64,
}

impl ArtifactValidator {
    pub fn new(backend: Arc<dyn PdfBackend>) -> Self {
        Self {
            backend,
            min_size: DEFAULT_MIN_PDF_SIZE,
        }
    }

    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn min_size(&self) -> u64 {
        self.min_size
    }

    /// Run every predicate; the first failure is returned.
    pub fn check(&self, path: &Path) -> Result<(), Rejection> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if is_supplementary_name(&file_name) {
            return Err(Rejection::Supplementary);
        }

        let meta = std::fs::metadata(path).map_err(|_| Rejection::Missing)?;
        if !meta.is_file() {
            return Err(Rejection::Missing);
        }
        if meta.len() < self.min_size {
            return Err(Rejection::TooSmall {
                size: meta.len(),
                min: self.min_size,
            });
        }

        let mut header = [0u8; 4];
        std::fs::File::open(path)
            .and_then(|mut f| f.read_exact(&mut header))
            .map_err(|e| Rejection::Unreadable(e.to_string()))?;
        if &header != b"%PDF" {
            return Err(Rejection::BadHeader);
        }

        match self.backend.page_count(path) {
            Ok(0) => Err(Rejection::NoPages),
            Ok(_) => Ok(()),
            Err(e) => Err(Rejection::Unreadable(e.to_string())),
        }
    }

    /// [`check`](Self::check) on the blocking pool. Opening a PDF can take
    /// a while and must not stall the runtime.
    pub async fn verify(&self, path: &Path) -> Result<(), Rejection> {
        let validator = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || validator.check(&path))
            .await
            .unwrap_or_else(|e| Err(Rejection::Unreadable(e.to_string())))
    }

    pub async fn is_valid(&self, path: &Path) -> bool {
        match self.verify(path).await {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(path = %path.display(), %reason, "artifact rejected");
                false
            }
        }
    }

    /// Validate and delete the file when it is rejected.
    pub async fn accept_or_remove(&self, path: &Path) -> Result<(), Rejection> {
        let verdict = self.verify(path).await;
        if let Err(ref reason) = verdict {
            tracing::debug!(path = %path.display(), %reason, "removing rejected artifact");
            remove_if_present(path);
        }
        verdict
    }
}

/// Delete `path` if it exists. Failures other than "not found" are logged.
pub fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
