use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod artifact;
pub mod backend;
pub mod browser;
pub mod chain;
pub mod checklist;
pub mod config_file;
pub mod fetch;
pub mod identifier;
pub mod matcher;
pub mod metadata;
pub mod pool;
pub mod rate_limit;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod validator;
pub mod vision;

// Re-export for convenience
pub use backend::{BackendError, PdfBackend};
pub use browser::{BrowserError, BrowserLauncher, BrowserPage, LazyLauncher};
pub use chain::SourceChain;
pub use checklist::{ChecklistError, ChecklistStore};
pub use identifier::{Identifier, IdentifierKind, extract as extract_identifier};
pub use matcher::{CandidateElement, Confidence, VisionDescription, rank};
pub use rate_limit::RateLimiters;
pub use registry::DuplicateRegistry;
pub use scheduler::{RunReport, Scheduler};
pub use source::{Source, SourceError};
pub use validator::{ArtifactValidator, Rejection};
pub use vision::{VisionDescriber, VisionError};

/// One row of the checklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceItem {
    /// 1-based row number as written in the checklist. Stable across runs.
    pub index: usize,
    pub checked: bool,
    pub url: String,
}

/// Per-item working state threaded through the source chain.
///
/// Title and authors start empty and are filled at most once, right before
/// the first source that needs them.
#[derive(Debug, Clone)]
pub struct ResolutionAttempt {
    pub item: ReferenceItem,
    pub identifier: Option<Identifier>,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub(crate) metadata_fetched: bool,
}

impl ResolutionAttempt {
    pub fn new(item: ReferenceItem) -> Self {
        let identifier = identifier::extract(&item.url);
        Self {
            item,
            identifier,
            title: None,
            authors: None,
            metadata_fetched: false,
        }
    }

    pub fn index(&self) -> usize {
        self.item.index
    }

    pub fn url(&self) -> &str {
        &self.item.url
    }

    pub fn doi(&self) -> Option<&str> {
        self.identifier.as_ref().and_then(|id| id.doi())
    }

    pub fn arxiv_id(&self) -> Option<&str> {
        self.identifier.as_ref().and_then(|id| id.arxiv_id())
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.is_empty())
    }
}

/// Outcome of a single source within one chain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Success,
    NotFound,
    /// Bytes were written but the artifact validator refused them.
    Rejected,
    Timeout,
    RateLimited,
    Error(String),
    /// The source needs an identifier or metadata this item lacks.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    pub status: SourceStatus,
    pub elapsed: Duration,
}

/// Result of running the chain (or one source) for an item.
#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    pub success: bool,
    pub source_name: Option<String>,
    pub artifact_path: Option<PathBuf>,
    pub attempts: Vec<SourceReport>,
}

impl ResolutionResult {
    pub fn failed(attempts: Vec<SourceReport>) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fast,
    Browser,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Fast => f.write_str("fast"),
            Phase::Browser => f.write_str("browser"),
        }
    }
}

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PhaseStarted {
        phase: Phase,
        items: usize,
    },
    Started {
        index: usize,
        url: String,
        phase: Phase,
    },
    SourceComplete {
        index: usize,
        source: String,
        status: SourceStatus,
        elapsed: Duration,
    },
    Resolved {
        index: usize,
        source: String,
        path: PathBuf,
        phase: Phase,
    },
    Duplicate {
        index: usize,
        original: usize,
    },
    Existing {
        index: usize,
    },
    Unresolved {
        index: usize,
        phase: Phase,
    },
    ScreenshotsCaptured {
        index: usize,
    },
    /// Screenshots-only mode found both screenshots already on disk.
    ScreenshotsExist {
        index: usize,
    },
    Warning {
        index: usize,
        message: String,
    },
}

pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("checklist error: {0}")]
    Checklist(#[from] ChecklistError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Configuration for a resolution run.
#[derive(Clone)]
pub struct Config {
    /// Where artifacts, stubs and screenshots are written.
    pub output_dir: PathBuf,
    pub unpaywall_email: Option<String>,
    pub core_api_key: Option<String>,
    pub crossref_mailto: Option<String>,
    pub s2_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub vision_model: String,
    /// Per-request timeout for HTTP fetches.
    pub request_timeout_secs: u64,
    /// Upper bound for one fast source attempt (may span several requests).
    pub source_timeout_secs: u64,
    /// Upper bound for one browser attempt.
    pub browser_timeout_secs: u64,
    pub disabled_sources: Vec<String>,
    pub num_workers: usize,
    pub browser_workers: usize,
    /// Pause between phase-1 submissions.
    pub submit_delay: Duration,
    /// Pause between phase-2 submissions.
    pub browser_submit_delay: Duration,
    pub skip_browser: bool,
    pub screenshots_only: bool,
    pub headless: bool,
    pub min_pdf_size: u64,
    pub start_index: Option<usize>,
    pub end_index: Option<usize>,
    pub rate_limiters: Arc<RateLimiters>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("output_dir", &self.output_dir)
            .field(
                "unpaywall_email",
                &self.unpaywall_email.as_ref().map(|_| "***"),
            )
            .field("core_api_key", &self.core_api_key.as_ref().map(|_| "***"))
            .field(
                "crossref_mailto",
                &self.crossref_mailto.as_ref().map(|_| "***"),
            )
            .field("s2_api_key", &self.s2_api_key.as_ref().map(|_| "***"))
            .field(
                "anthropic_api_key",
                &self.anthropic_api_key.as_ref().map(|_| "***"),
            )
            .field("vision_model", &self.vision_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("source_timeout_secs", &self.source_timeout_secs)
            .field("browser_timeout_secs", &self.browser_timeout_secs)
            .field("disabled_sources", &self.disabled_sources)
            .field("num_workers", &self.num_workers)
            .field("browser_workers", &self.browser_workers)
            .field("submit_delay", &self.submit_delay)
            .field("browser_submit_delay", &self.browser_submit_delay)
            .field("skip_browser", &self.skip_browser)
            .field("screenshots_only", &self.screenshots_only)
            .field("headless", &self.headless)
            .field("min_pdf_size", &self.min_pdf_size)
            .field("start_index", &self.start_index)
            .field("end_index", &self.end_index)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            unpaywall_email: None,
            core_api_key: None,
            crossref_mailto: None,
            s2_api_key: None,
            anthropic_api_key: None,
            vision_model: vision::DEFAULT_VISION_MODEL.to_string(),
            request_timeout_secs: 30,
            source_timeout_secs: 90,
            browser_timeout_secs: 180,
            disabled_sources: vec![],
            num_workers: 5,
            browser_workers: 2,
            submit_delay: Duration::from_millis(500),
            browser_submit_delay: Duration::from_secs(1),
            skip_browser: false,
            screenshots_only: false,
            headless: true,
            min_pdf_size: validator::DEFAULT_MIN_PDF_SIZE,
            start_index: None,
            end_index: None,
            rate_limiters: Arc::new(RateLimiters::default()),
        }
    }
}

impl Config {
    /// True when `index` falls inside the configured `--start`/`--end` range.
    pub fn in_range(&self, index: usize) -> bool {
        self.start_index.is_none_or(|s| index >= s) && self.end_index.is_none_or(|e| index <= e)
    }

    pub fn is_disabled(&self, source: &str) -> bool {
        self.disabled_sources
            .iter()
            .any(|d| d.eq_ignore_ascii_case(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_keys() {
        let config = Config {
            anthropic_api_key: Some("sk-ant-secret".into()),
            core_api_key: Some("core-secret".into()),
            ..Default::default()
        };
        let dbg = format!("{:?}", config);
        assert!(!dbg.contains("sk-ant-secret"));
        assert!(!dbg.contains("core-secret"));
        assert!(dbg.contains("***"));
    }

    #[test]
    fn range_filter() {
        let config = Config {
            start_index: Some(3),
            end_index: Some(5),
            ..Default::default()
        };
        assert!(!config.in_range(2));
        assert!(config.in_range(3));
        assert!(config.in_range(5));
        assert!(!config.in_range(6));
        assert!(Config::default().in_range(1000));
    }

    #[test]
    fn disabled_sources_case_insensitive() {
        let config = Config {
            disabled_sources: vec!["sci-hub".into()],
            ..Default::default()
        };
        assert!(config.is_disabled("Sci-Hub"));
        assert!(!config.is_disabled("OpenAlex"));
    }

    #[test]
    fn attempt_exposes_doi_only_for_doi_urls() {
        let attempt = ResolutionAttempt::new(ReferenceItem {
            index: 1,
            checked: false,
            url: "https://doi.org/10.1038/nature12373".into(),
        });
        assert_eq!(attempt.doi(), Some("10.1038/nature12373"));
        let arxiv = ResolutionAttempt::new(ReferenceItem {
            index: 2,
            checked: false,
            url: "https://arxiv.org/abs/2301.00001".into(),
        });
        assert!(arxiv.doi().is_none());
        assert_eq!(arxiv.arxiv_id(), Some("2301.00001"));
    }
}
