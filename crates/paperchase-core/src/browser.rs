//! Vision-guided browser automation.
//!
//! The driver crate implements [`BrowserLauncher`] and [`BrowserPage`] on top
//! of a real browser; this module owns the decisions. One attempt walks the
//! states below, each transition logged at debug level:
//!
//! ```text
//! Loaded -> ConsentDismissed -> Analyzed(Top) -> CandidateClicked ... -> Analyzed(Bottom) -> ...
//!                                                      |
//!                      DownloadCaptured | PdfViewerDetected | NoMatch
//! ```
//!
//! A detected PDF viewer runs its own sequence: an explicit download control,
//! then the save shortcut, then a direct fetch of the embedded document.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::ResolutionAttempt;
use crate::artifact::{ScreenshotRegion, screenshot_path};
use crate::fetch::{Downloader, absolutize};
use crate::matcher::{CandidateElement, rank};
use crate::vision::VisionDescriber;

/// Common cookie and consent banner controls, tried in order.
pub const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    ".optanon-alert-box-close",
    "button[id*=\"accept\"]",
    "button[class*=\"accept\"]",
    "button[id*=\"cookie\"]",
    "button[class*=\"cookie\"]",
    ".cookie-consent-accept",
    ".cc-dismiss",
    ".cc-allow",
    "button[data-cc-action=\"accept\"]",
    "button.cc-banner__button--accept",
    "button[aria-label*=\"Accept\"]",
    "button[aria-label*=\"Close\"]",
];

/// Download controls of built-in and publisher PDF viewers.
pub const VIEWER_DOWNLOAD_SELECTORS: &[&str] = &[
    "button[title*=\"Download\"]",
    "button[aria-label*=\"Download\"]",
    "a[title*=\"Download\"]",
    "a[aria-label*=\"Download\"]",
    "button#download",
    "button.download",
    "button[data-l10n-id=\"download\"]",
];

/// Elements that embed a PDF document in the page.
pub const PDF_EMBED_SELECTOR: &str =
    "embed[type=\"application/pdf\"], object[type=\"application/pdf\"], iframe[src*=\".pdf\"]";

/// Ranked candidates tried per screenshot region.
pub const MAX_CANDIDATES_PER_REGION: usize = 5;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the page looks like right now, as seen from script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DomSnapshot {
    pub url: String,
    pub title: String,
    /// `document.contentType`.
    pub content_type: String,
    /// Visible links and buttons, in document order.
    pub candidates: Vec<CandidateElement>,
    /// Whether anything matches [`PDF_EMBED_SELECTOR`].
    pub pdf_embed: bool,
    /// `src`/`data` of the first embedded PDF, if any.
    pub embedded_pdf_url: Option<String>,
}

impl DomSnapshot {
    pub fn is_pdf_viewer(&self) -> bool {
        let url = self.url.to_lowercase();
        self.pdf_embed
            || self.content_type.to_lowercase().contains("pdf")
            || (url.contains(".pdf") && (url.contains("viewer") || url.contains("watermark")))
    }

    /// Host of the page, lowercased.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget<'a> {
    /// `id` of a [`CandidateElement`] from the latest snapshot.
    Element(usize),
    Selector(&'a str),
}

/// One browser tab. Implementations follow a click into a newly opened tab.
#[async_trait]
pub trait BrowserPage: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Scroll so that `region` of the document is in the viewport.
    async fn scroll_to(&mut self, region: ScreenshotRegion) -> Result<(), BrowserError>;

    /// PNG of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError>;

    async fn snapshot(&mut self) -> Result<DomSnapshot, BrowserError>;

    async fn is_visible(&mut self, selector: &str) -> Result<bool, BrowserError>;

    async fn click(&mut self, target: ClickTarget<'_>) -> Result<(), BrowserError>;

    /// Send the platform "save page" shortcut.
    async fn press_save(&mut self) -> Result<(), BrowserError>;

    /// Wait up to `wait` for a download started by the previous action and
    /// move it to `dest`. `Ok(false)` when nothing arrived.
    async fn take_download(&mut self, dest: &Path, wait: Duration) -> Result<bool, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError>;
}

pub type LaunchFuture =
    Pin<Box<dyn Future<Output = Result<Arc<dyn BrowserLauncher>, BrowserError>> + Send>>;

/// Starts the real browser on the first page request, so a run with nothing
/// left for the browser phase never spawns one. A failed launch is kept and
/// returned to every later request.
pub struct LazyLauncher {
    launch: Box<dyn Fn() -> LaunchFuture + Send + Sync>,
    launched: OnceCell<Result<Arc<dyn BrowserLauncher>, String>>,
}

impl LazyLauncher {
    pub fn new<F, Fut, L>(launch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<L, BrowserError>> + Send + 'static,
        L: BrowserLauncher + 'static,
    {
        Self {
            launch: Box::new(move || {
                let started = launch();
                Box::pin(async move {
                    started
                        .await
                        .map(|l| Arc::new(l) as Arc<dyn BrowserLauncher>)
                })
            }),
            launched: OnceCell::new(),
        }
    }

    pub fn is_launched(&self) -> bool {
        self.launched.initialized()
    }
}

#[async_trait]
impl BrowserLauncher for LazyLauncher {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let launched = self
            .launched
            .get_or_init(|| async {
                match (self.launch)().await {
                    Ok(launcher) => {
                        tracing::info!("browser started");
                        Ok(launcher)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "browser unavailable; browser-phase rows stay unresolved");
                        Err(e.to_string())
                    }
                }
            })
            .await;
        match launched {
            Ok(launcher) => launcher.new_page().await,
            Err(msg) => Err(BrowserError::Launch(msg.clone())),
        }
    }
}

/// How the viewer sequence got the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerStep {
    DownloadControl,
    SaveShortcut,
    EmbeddedFetch,
}

/// Terminal state of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    DownloadCaptured,
    PdfViewer(ViewerStep),
    /// A PDF-looking link or landing URL fetched without the browser.
    DirectFetch(String),
    /// Screenshots written; nothing else attempted.
    ScreenshotsOnly,
    NoMatch,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::DownloadCaptured | Outcome::PdfViewer(_) | Outcome::DirectFetch(_)
        )
    }
}

enum State {
    Loaded,
    ConsentDismissed,
    Analyzed(ScreenshotRegion),
    Trying {
        region: ScreenshotRegion,
        page_url: String,
        candidates: Vec<CandidateElement>,
        next: usize,
    },
    Done(Outcome),
}

pub fn looks_like_pdf_href(href: &str) -> bool {
    let h = href.to_lowercase();
    h.contains(".pdf") || h.contains("/pdf") || h.contains("/article-pdf/")
}

fn next_region(region: ScreenshotRegion) -> State {
    match region {
        ScreenshotRegion::Top => State::Analyzed(ScreenshotRegion::Bottom),
        ScreenshotRegion::Bottom => State::Done(Outcome::NoMatch),
    }
}

/// Drives one page through the vision-guided search for the article PDF.
pub struct BrowserStrategy {
    describer: Option<Arc<dyn VisionDescriber>>,
    downloader: Arc<Downloader>,
    screenshot_dir: PathBuf,
    screenshots_only: bool,
    settle: Duration,
    download_wait: Duration,
}

impl BrowserStrategy {
    pub fn new(downloader: Arc<Downloader>, screenshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            describer: None,
            downloader,
            screenshot_dir: screenshot_dir.into(),
            screenshots_only: false,
            settle: Duration::from_secs(2),
            download_wait: Duration::from_secs(5),
        }
    }

    pub fn with_describer(mut self, describer: Arc<dyn VisionDescriber>) -> Self {
        self.describer = Some(describer);
        self
    }

    pub fn screenshots_only(mut self, on: bool) -> Self {
        self.screenshots_only = on;
        self
    }

    /// Pause after navigation and clicks, and how long to wait for downloads.
    pub fn with_waits(mut self, settle: Duration, download_wait: Duration) -> Self {
        self.settle = settle;
        self.download_wait = download_wait;
        self
    }

    async fn pause(&self) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }

    pub async fn run(
        &self,
        page: &mut dyn BrowserPage,
        ctx: &ResolutionAttempt,
        output: &Path,
    ) -> Result<Outcome, BrowserError> {
        let index = ctx.index();
        page.navigate(ctx.url()).await?;
        self.pause().await;
        let mut state = State::Loaded;

        loop {
            state = match state {
                State::Loaded => {
                    tracing::debug!(index, "loaded");
                    let snapshot = page.snapshot().await?;
                    if !self.screenshots_only && snapshot.is_pdf_viewer() {
                        tracing::debug!(index, url = %snapshot.url, "landed on a PDF viewer");
                        match self.viewer_sequence(page, &snapshot, output).await? {
                            Some(step) => State::Done(Outcome::PdfViewer(step)),
                            None => State::Done(Outcome::NoMatch),
                        }
                    } else {
                        self.dismiss_consent(page).await;
                        State::ConsentDismissed
                    }
                }
                State::ConsentDismissed => State::Analyzed(ScreenshotRegion::Top),
                State::Analyzed(region) => self.analyze(page, ctx, region).await?,
                State::Trying {
                    region,
                    page_url,
                    candidates,
                    next,
                } => {
                    let result = match candidates.get(next) {
                        None => None,
                        Some(candidate) => {
                            tracing::debug!(
                                index,
                                region = region.as_str(),
                                rank = next + 1,
                                text = candidate.label(),
                                href = %candidate.href,
                                "trying candidate"
                            );
                            Some(self.try_candidate(page, candidate, &page_url, output).await)
                        }
                    };
                    match result {
                        None => next_region(region),
                        Some(Ok(Some(outcome))) => State::Done(outcome),
                        Some(other) => {
                            if let Err(e) = other {
                                tracing::debug!(index, error = %e, "candidate failed");
                            }
                            let fresh = self.return_to(page, ctx.url(), region).await?;
                            State::Trying {
                                region,
                                page_url,
                                candidates: rebind(candidates, next + 1, &fresh),
                                next: next + 1,
                            }
                        }
                    }
                }
                State::Done(outcome) => {
                    tracing::debug!(index, ?outcome, "browser attempt finished");
                    return Ok(outcome);
                }
            };
        }
    }

    async fn dismiss_consent(&self, page: &mut dyn BrowserPage) {
        for selector in CONSENT_SELECTORS {
            if matches!(page.is_visible(selector).await, Ok(true)) {
                match page.click(ClickTarget::Selector(selector)).await {
                    Ok(()) => {
                        tracing::debug!(selector, "dismissed consent banner");
                        self.pause().await;
                        return;
                    }
                    Err(e) => tracing::debug!(selector, error = %e, "consent click failed"),
                }
            }
        }
    }

    /// Screenshot `region` (reusing one on disk), describe it and rank.
    async fn analyze(
        &self,
        page: &mut dyn BrowserPage,
        ctx: &ResolutionAttempt,
        region: ScreenshotRegion,
    ) -> Result<State, BrowserError> {
        page.scroll_to(region).await?;
        let path = screenshot_path(&self.screenshot_dir, ctx.index(), region);
        let png = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), "reusing screenshot");
                bytes
            }
            Err(_) => {
                let bytes = page.screenshot().await?;
                tokio::fs::write(&path, &bytes).await?;
                bytes
            }
        };

        if self.screenshots_only {
            return Ok(match region {
                ScreenshotRegion::Top => State::Analyzed(ScreenshotRegion::Bottom),
                ScreenshotRegion::Bottom => State::Done(Outcome::ScreenshotsOnly),
            });
        }

        let Some(describer) = self.describer.as_ref() else {
            return Ok(next_region(region));
        };
        let description = match describer.describe(&png, ctx.url()).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                tracing::debug!(index = ctx.index(), region = region.as_str(), "no control seen");
                return Ok(next_region(region));
            }
            Err(e) => {
                tracing::warn!(index = ctx.index(), error = %e, "vision call failed");
                return Ok(next_region(region));
            }
        };

        let snapshot = page.snapshot().await?;
        let host = snapshot.host();
        let candidates: Vec<CandidateElement> = rank(&snapshot.candidates, &description, host.as_deref())
            .into_iter()
            .take(MAX_CANDIDATES_PER_REGION)
            .map(|(_, c)| c.clone())
            .collect();
        tracing::debug!(
            index = ctx.index(),
            region = region.as_str(),
            wanted = %description.element_text,
            matched = candidates.len(),
            "analyzed"
        );

        Ok(State::Trying {
            region,
            page_url: snapshot.url,
            candidates,
            next: 0,
        })
    }

    /// `Ok(None)` means this candidate led nowhere and the next one should run.
    async fn try_candidate(
        &self,
        page: &mut dyn BrowserPage,
        candidate: &CandidateElement,
        page_url: &str,
        output: &Path,
    ) -> Result<Option<Outcome>, BrowserError> {
        if looks_like_pdf_href(&candidate.href) {
            if let Some(url) = absolutize(&candidate.href, page_url) {
                if self.downloader.fetch_either(&url, output).await {
                    return Ok(Some(Outcome::DirectFetch(url)));
                }
            }
        }

        page.click(ClickTarget::Element(candidate.id)).await?;
        tracing::debug!("candidate clicked");
        if self.captured(page, output).await? {
            return Ok(Some(Outcome::DownloadCaptured));
        }

        self.pause().await;
        let after = page.snapshot().await?;
        if after.is_pdf_viewer() {
            tracing::debug!(url = %after.url, "PDF viewer detected");
            return Ok(self
                .viewer_sequence(page, &after, output)
                .await?
                .map(Outcome::PdfViewer));
        }

        if after.url.to_lowercase().ends_with(".pdf") && self.downloader.fetch_either(&after.url, output).await {
            return Ok(Some(Outcome::DirectFetch(after.url)));
        }
        Ok(None)
    }

    async fn captured(&self, page: &mut dyn BrowserPage, output: &Path) -> Result<bool, BrowserError> {
        if !page.take_download(output, self.download_wait).await? {
            return Ok(false);
        }
        match self.downloader.validator().accept_or_remove(output).await {
            Ok(()) => Ok(true),
            Err(reason) => {
                tracing::debug!(%reason, "captured download rejected");
                Ok(false)
            }
        }
    }

    async fn viewer_sequence(
        &self,
        page: &mut dyn BrowserPage,
        snapshot: &DomSnapshot,
        output: &Path,
    ) -> Result<Option<ViewerStep>, BrowserError> {
        for selector in VIEWER_DOWNLOAD_SELECTORS {
            if !matches!(page.is_visible(selector).await, Ok(true)) {
                continue;
            }
            if page.click(ClickTarget::Selector(selector)).await.is_ok()
                && self.captured(page, output).await?
            {
                return Ok(Some(ViewerStep::DownloadControl));
            }
        }

        match page.press_save().await {
            Ok(()) => {
                if self.captured(page, output).await? {
                    return Ok(Some(ViewerStep::SaveShortcut));
                }
            }
            Err(e) => tracing::debug!(error = %e, "save shortcut failed"),
        }

        let embedded = snapshot
            .embedded_pdf_url
            .as_deref()
            .and_then(|src| absolutize(src, &snapshot.url))
            .unwrap_or_else(|| snapshot.url.clone());
        if !embedded.is_empty() && self.downloader.fetch_either(&embedded, output).await {
            return Ok(Some(ViewerStep::EmbeddedFetch));
        }
        Ok(None)
    }

    /// Reload the landing page and snapshot it again. Element ids from the
    /// previous snapshot do not survive a navigation.
    async fn return_to(
        &self,
        page: &mut dyn BrowserPage,
        url: &str,
        region: ScreenshotRegion,
    ) -> Result<DomSnapshot, BrowserError> {
        page.navigate(url).await?;
        self.pause().await;
        page.scroll_to(region).await?;
        page.snapshot().await
    }
}

fn same_element(a: &CandidateElement, b: &CandidateElement) -> bool {
    a.href == b.href
        && a.visible_text.trim() == b.visible_text.trim()
        && a.aria_label == b.aria_label
        && a.title == b.title
        && a.classes == b.classes
}

/// Point the untried candidates (`from..`) at their elements in `fresh`.
/// Candidates that no longer exist are dropped; tried ones keep their slot.
fn rebind(
    candidates: Vec<CandidateElement>,
    from: usize,
    fresh: &DomSnapshot,
) -> Vec<CandidateElement> {
    let mut taken = Vec::new();
    let mut out = Vec::with_capacity(candidates.len());
    for (i, mut candidate) in candidates.into_iter().enumerate() {
        if i < from {
            out.push(candidate);
            continue;
        }
        let found = fresh
            .candidates
            .iter()
            .find(|c| !taken.contains(&c.id) && same_element(c, &candidate));
        match found {
            Some(c) => {
                taken.push(c.id);
                candidate.id = c.id;
                candidate.center = c.center;
                out.push(candidate);
            }
            None => tracing::debug!(text = candidate.label(), "candidate gone after reload"),
        }
    }
    out
}
