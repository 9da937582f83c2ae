//! The ordered fallback chain of acquisition sources.
//!
//! For one item the chain walks its sources strictly in priority order and
//! stops at the first one that leaves a validated artifact behind. Failures of
//! any kind are absorbed and the walk continues; a source is never retried
//! within one pass.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::backend::PdfBackend;
use crate::browser::{BrowserLauncher, BrowserStrategy};
use crate::fetch::Downloader;
use crate::metadata::{CrossRef, MetadataLookup};
use crate::rate_limit::RateLimiters;
use crate::source::browser::BrowserSource;
use crate::source::{Source, SourceError, build_source_list};
use crate::validator::{ArtifactValidator, remove_if_present};
use crate::vision::AnthropicVision;
use crate::{
    Config, CoreError, Phase, ProgressEvent, ProgressFn, ResolutionAttempt, ResolutionResult,
    SourceReport, SourceStatus,
};

pub struct SourceChain {
    sources: Vec<Arc<dyn Source>>,
    metadata: Option<Arc<dyn MetadataLookup>>,
    validator: ArtifactValidator,
    rate_limiters: Arc<RateLimiters>,
    source_timeout: Duration,
    browser_timeout: Duration,
    cancel: CancellationToken,
}

impl SourceChain {
    pub fn new(
        sources: Vec<Arc<dyn Source>>,
        validator: ArtifactValidator,
        rate_limiters: Arc<RateLimiters>,
    ) -> Self {
        Self {
            sources,
            metadata: None,
            validator,
            rate_limiters,
            source_timeout: Duration::from_secs(90),
            browser_timeout: Duration::from_secs(180),
            cancel: CancellationToken::new(),
        }
    }

    /// The full chain for a run: every enabled fast source, CrossRef
    /// metadata, and the browser source when a launcher is given.
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn PdfBackend>,
        launcher: Option<Arc<dyn BrowserLauncher>>,
        cancel: CancellationToken,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let validator = ArtifactValidator::new(backend).with_min_size(config.min_pdf_size);
        let downloader = Arc::new(Downloader::new(
            client.clone(),
            validator.clone(),
            request_timeout,
        ));

        let browser: Option<Arc<dyn Source>> = match launcher {
            Some(launcher) if !config.skip_browser => {
                let mut strategy = BrowserStrategy::new(downloader.clone(), &config.output_dir)
                    .screenshots_only(config.screenshots_only);
                match (&config.anthropic_api_key, config.screenshots_only) {
                    (Some(key), false) => {
                        strategy = strategy.with_describer(Arc::new(AnthropicVision::new(
                            client.clone(),
                            key.clone(),
                            config.vision_model.clone(),
                            Duration::from_secs(config.request_timeout_secs.max(60)),
                        )));
                    }
                    (None, false) => tracing::warn!(
                        "ANTHROPIC_API_KEY not set; the browser phase will only capture screenshots"
                    ),
                    _ => {}
                }
                Some(Arc::new(BrowserSource::new(launcher, strategy)))
            }
            _ => None,
        };

        let sources = build_source_list(config, downloader, browser);
        tracing::debug!(
            sources = ?sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "source chain built"
        );

        let metadata = CrossRef::new(
            client,
            config.crossref_mailto.clone(),
            request_timeout,
            config.rate_limiters.clone(),
        );

        Ok(Self::new(sources, validator, config.rate_limiters.clone())
            .with_metadata(Arc::new(metadata))
            .with_timeouts(
                Duration::from_secs(config.source_timeout_secs),
                Duration::from_secs(config.browser_timeout_secs),
            )
            .with_cancel(cancel))
    }

    pub fn with_metadata(mut self, lookup: Arc<dyn MetadataLookup>) -> Self {
        self.metadata = Some(lookup);
        self
    }

    pub fn with_timeouts(mut self, source: Duration, browser: Duration) -> Self {
        self.source_timeout = source;
        self.browser_timeout = browser;
        self
    }

    /// Stop walking the chain at the next source boundary once cancelled.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn validator(&self) -> &ArtifactValidator {
        &self.validator
    }

    /// Sources belonging to `phase`, in priority order.
    pub fn sources_for(&self, phase: Phase) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources
            .iter()
            .filter(move |s| s.is_interactive() == (phase == Phase::Browser))
    }

    pub fn has_phase(&self, phase: Phase) -> bool {
        self.sources_for(phase).next().is_some()
    }

    pub fn names(&self, phase: Phase) -> Vec<&str> {
        self.sources_for(phase).map(|s| s.name()).collect()
    }

    /// Run every source of `phase` for one item until one succeeds.
    pub async fn resolve(
        &self,
        attempt: &mut ResolutionAttempt,
        output: &Path,
        phase: Phase,
        progress: Option<&ProgressFn>,
    ) -> ResolutionResult {
        let mut reports = Vec::new();

        for source in self.sources_for(phase) {
            if self.cancel.is_cancelled() {
                tracing::debug!(index = attempt.index(), "chain cancelled");
                break;
            }

            if source.needs().wants_metadata() {
                self.ensure_metadata(attempt).await;
            }

            let report = if !source.needs().is_met(attempt) {
                tracing::debug!(
                    index = attempt.index(),
                    source = source.name(),
                    "skipping: missing identifier or title"
                );
                SourceReport {
                    source: source.name().to_string(),
                    status: SourceStatus::Skipped,
                    elapsed: Duration::ZERO,
                }
            } else {
                self.run_one(source.as_ref(), attempt, output).await
            };

            if let Some(cb) = progress {
                cb(ProgressEvent::SourceComplete {
                    index: attempt.index(),
                    source: report.source.clone(),
                    status: report.status.clone(),
                    elapsed: report.elapsed,
                });
            }

            let succeeded = report.status == SourceStatus::Success;
            let name = report.source.clone();
            reports.push(report);

            if succeeded {
                return ResolutionResult {
                    success: true,
                    source_name: Some(name),
                    artifact_path: Some(output.to_path_buf()),
                    attempts: reports,
                };
            }
        }

        ResolutionResult::failed(reports)
    }

    async fn run_one(
        &self,
        source: &dyn Source,
        attempt: &ResolutionAttempt,
        output: &Path,
    ) -> SourceReport {
        let name = source.name();
        let limiter = self.rate_limiters.get(name);
        let timeout = if source.is_interactive() {
            self.browser_timeout
        } else {
            self.source_timeout
        };

        if let Some(lim) = limiter {
            lim.acquire().await;
        }

        let start = Instant::now();
        let outcome = match tokio::time::timeout(timeout, source.attempt(attempt, output)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(timeout)),
        };
        let elapsed = start.elapsed();

        let status = match outcome {
            Ok(true) => match self.validator.accept_or_remove(output).await {
                Ok(()) => SourceStatus::Success,
                Err(rejection) => {
                    tracing::debug!(
                        index = attempt.index(),
                        source = name,
                        reason = %rejection,
                        "artifact rejected"
                    );
                    SourceStatus::Rejected
                }
            },
            Ok(false) | Err(SourceError::NotFound) => SourceStatus::NotFound,
            Err(SourceError::Timeout(_)) => {
                tracing::debug!(index = attempt.index(), source = name, "timed out");
                SourceStatus::Timeout
            }
            Err(SourceError::RateLimited { retry_after }) => {
                tracing::info!(
                    source = name,
                    retry_after = ?retry_after,
                    "rate limited, slowing down"
                );
                if let Some(lim) = limiter {
                    lim.on_rate_limited(retry_after);
                }
                SourceStatus::RateLimited
            }
            Err(e) => {
                tracing::debug!(index = attempt.index(), source = name, error = %e, "source failed");
                SourceStatus::Error(e.to_string())
            }
        };

        if status != SourceStatus::Success {
            // A source that failed or timed out mid-write may leave bytes behind.
            remove_if_present(output);
        }

        SourceReport {
            source: name.to_string(),
            status,
            elapsed,
        }
    }

    /// Fill title and authors once per item. Only DOI items can be looked up.
    async fn ensure_metadata(&self, attempt: &mut ResolutionAttempt) {
        if attempt.metadata_fetched {
            return;
        }
        attempt.metadata_fetched = true;

        let (Some(lookup), Some(doi)) = (self.metadata.as_ref(), attempt.doi()) else {
            return;
        };
        let doi = doi.to_string();
        match tokio::time::timeout(self.source_timeout, lookup.lookup(&doi)).await {
            Ok(Ok(meta)) => {
                tracing::debug!(index = attempt.index(), title = ?meta.title, "metadata found");
                attempt.title = meta.title;
                attempt.authors = meta.authors;
            }
            Ok(Err(e)) => {
                tracing::debug!(index = attempt.index(), doi, error = %e, "metadata lookup failed")
            }
            Err(_) => tracing::debug!(index = attempt.index(), doi, "metadata lookup timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReferenceItem;
    use crate::metadata::tests::FixedMetadata;
    use crate::source::Needs;
    use crate::source::mock::{MockResponse, MockSource};
    use crate::validator::tests::FixedPages;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    fn validator() -> ArtifactValidator {
        ArtifactValidator::new(Arc::new(FixedPages(Some(5))))
    }

    fn chain(sources: Vec<Arc<dyn Source>>) -> SourceChain {
        SourceChain::new(sources, validator(), Arc::new(RateLimiters::default()))
    }

    fn attempt(url: &str) -> ResolutionAttempt {
        ResolutionAttempt::new(ReferenceItem {
            index: 4,
            checked: false,
            url: url.into(),
        })
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("item004.pdf");
        let a = Arc::new(MockSource::new("A", MockResponse::NotFound));
        let b = Arc::new(MockSource::new("B", MockResponse::Writes(60_000)));
        let c = Arc::new(MockSource::new("C", MockResponse::Writes(60_000)));
        let chain = chain(vec![a.clone(), b.clone(), c.clone()]);

        let mut att = attempt("https://example.org/paper");
        let result = chain.resolve(&mut att, &out, Phase::Fast, None).await;

        assert!(result.success);
        assert_eq!(result.source_name.as_deref(), Some("B"));
        assert_eq!(result.artifact_path.as_deref(), Some(out.as_path()));
        assert_eq!((a.call_count(), b.call_count(), c.call_count()), (1, 1, 0));
        assert_eq!(result.attempts.len(), 2);
    }

    #[tokio::test]
    async fn errors_and_rate_limits_fall_through() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("x.pdf");
        let chain = chain(vec![
            Arc::new(MockSource::new("Broken", MockResponse::Error("boom".into()))),
            Arc::new(MockSource::new(
                "OpenAlex",
                MockResponse::RateLimited { retry_after: None },
            )),
            Arc::new(MockSource::new("Last", MockResponse::Writes(60_000))),
        ]);

        let mut att = attempt("https://example.org/paper");
        let result = chain.resolve(&mut att, &out, Phase::Fast, None).await;

        assert!(result.success);
        let statuses: Vec<_> = result.attempts.iter().map(|r| r.status.clone()).collect();
        assert_eq!(
            statuses,
            vec![
                SourceStatus::Error("boom".into()),
                SourceStatus::RateLimited,
                SourceStatus::Success
            ]
        );
        assert_eq!(chain.rate_limiters.get("OpenAlex").unwrap().slowdown(), 2);
    }

    #[tokio::test]
    async fn invalid_write_is_deleted_and_chain_continues() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("x.pdf");
        let tiny = Arc::new(MockSource::new("Tiny", MockResponse::Writes(3_000)));
        let liar = Arc::new(MockSource::new("Liar", MockResponse::ClaimsSuccess));
        let chain = chain(vec![tiny, liar]);

        let mut att = attempt("https://example.org/paper");
        let result = chain.resolve(&mut att, &out, Phase::Fast, None).await;

        assert!(!result.success);
        assert!(!out.exists());
        assert_eq!(result.attempts[0].status, SourceStatus::Rejected);
        assert_eq!(result.attempts[1].status, SourceStatus::Rejected);
    }

    #[tokio::test]
    async fn failed_source_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("item004_10.1_a.pdf");
        let chain = chain(vec![Arc::new(MockSource::new(
            "Flaky",
            MockResponse::WritesThenFails(20_000),
        ))]);

        let mut att = attempt("https://doi.org/10.1/a");
        let result = chain.resolve(&mut att, &out, Phase::Fast, None).await;

        assert!(!result.success);
        assert_eq!(
            result.attempts[0].status,
            SourceStatus::Error("connection reset".into())
        );
        assert!(!out.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_source_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("item004_10.1_a.pdf");
        let stuck = Arc::new(MockSource::new("Stuck", MockResponse::WritesThenStalls(70_000)));
        let chain = chain(vec![stuck]).with_timeouts(Duration::from_secs(1), Duration::from_secs(5));

        let mut att = attempt("https://doi.org/10.1/a");
        let result = chain.resolve(&mut att, &out, Phase::Fast, None).await;

        assert_eq!(result.attempts[0].status, SourceStatus::Timeout);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn unmet_needs_are_skipped_without_calling() {
        let dir = tempfile::tempdir().unwrap();
        let needs_doi = Arc::new(MockSource::new("Doi", MockResponse::Writes(60_000)).with_needs(Needs::Doi));
        let chain = chain(vec![needs_doi.clone()]);

        let mut att = attempt("https://example.org/landing");
        let result = chain
            .resolve(&mut att, &dir.path().join("x.pdf"), Phase::Fast, None)
            .await;

        assert!(!result.success);
        assert_eq!(needs_doi.call_count(), 0);
        assert_eq!(result.attempts[0].status, SourceStatus::Skipped);
    }

    #[tokio::test]
    async fn metadata_fetched_once_and_only_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(FixedMetadata::titled("Graphene"));
        let chain = chain(vec![
            Arc::new(MockSource::new("Url", MockResponse::NotFound)),
            Arc::new(MockSource::new("T1", MockResponse::NotFound).with_needs(Needs::Title)),
            Arc::new(MockSource::new("T2", MockResponse::NotFound).with_needs(Needs::DoiOrTitle)),
        ])
        .with_metadata(meta.clone());

        let mut att = attempt("https://doi.org/10.1/abc");
        chain
            .resolve(&mut att, &dir.path().join("x.pdf"), Phase::Fast, None)
            .await;
        assert_eq!(meta.calls.load(Ordering::SeqCst), 1);
        assert_eq!(att.title(), Some("Graphene"));

        let url_only = SourceChain::new(
            vec![Arc::new(MockSource::new("Url", MockResponse::NotFound))],
            validator(),
            Arc::new(RateLimiters::default()),
        )
        .with_metadata(meta.clone());
        let mut att = attempt("https://doi.org/10.1/abc");
        url_only
            .resolve(&mut att, &dir.path().join("y.pdf"), Phase::Fast, None)
            .await;
        assert_eq!(meta.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let slow = Arc::new(
            MockSource::new("Slow", MockResponse::Writes(60_000)).with_delay(Duration::from_secs(10)),
        );
        let next = Arc::new(MockSource::new("Next", MockResponse::NotFound));
        let chain = chain(vec![slow, next.clone()])
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(5));

        let mut att = attempt("https://example.org/paper");
        let result = chain
            .resolve(&mut att, &dir.path().join("x.pdf"), Phase::Fast, None)
            .await;

        assert_eq!(result.attempts[0].status, SourceStatus::Timeout);
        assert_eq!(next.call_count(), 1);
    }

    #[tokio::test]
    async fn phases_partition_sources_and_report_progress() {
        let dir = tempfile::tempdir().unwrap();
        let fast = Arc::new(MockSource::new("Fast", MockResponse::NotFound));
        let browser = Arc::new(MockSource::new("Browser", MockResponse::Writes(60_000)).interactive());
        let chain = chain(vec![fast.clone(), browser.clone()]);
        assert_eq!(chain.names(Phase::Fast), vec!["Fast"]);
        assert_eq!(chain.names(Phase::Browser), vec!["Browser"]);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let progress: ProgressFn = Arc::new(move |e| {
            if let ProgressEvent::SourceComplete { source, .. } = e {
                sink.lock().unwrap().push(source);
            }
        });

        let mut att = attempt("https://example.org/paper");
        let out = dir.path().join("x.pdf");
        assert!(!chain.resolve(&mut att, &out, Phase::Fast, Some(&progress)).await.success);
        assert!(chain.resolve(&mut att, &out, Phase::Browser, Some(&progress)).await.success);
        assert_eq!(*events.lock().unwrap(), vec!["Fast", "Browser"]);
        assert_eq!((fast.call_count(), browser.call_count()), (1, 1));
    }

    struct NoBrowser;

    #[async_trait::async_trait]
    impl BrowserLauncher for NoBrowser {
        async fn new_page(&self) -> Result<Box<dyn crate::browser::BrowserPage>, crate::BrowserError> {
            Err(crate::BrowserError::Launch("not in tests".into()))
        }
    }

    #[tokio::test]
    async fn from_config_appends_browser_unless_skipped() {
        let backend = Arc::new(FixedPages(Some(1)));
        let config = Config::default();
        let chain = SourceChain::from_config(
            &config,
            backend.clone(),
            Some(Arc::new(NoBrowser)),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(chain.names(Phase::Browser), vec!["Browser"]);
        assert_eq!(chain.names(Phase::Fast).first(), Some(&"Direct"));

        let skipped = Config {
            skip_browser: true,
            ..Default::default()
        };
        let chain = SourceChain::from_config(
            &skipped,
            backend,
            Some(Arc::new(NoBrowser)),
            CancellationToken::new(),
        )
        .unwrap();
        assert!(!chain.has_phase(Phase::Browser));
    }

    #[tokio::test]
    async fn cancelled_chain_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = Arc::new(MockSource::new("A", MockResponse::Writes(60_000)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chain = chain(vec![src.clone()]).with_cancel(cancel);

        let mut att = attempt("https://example.org/paper");
        let result = chain
            .resolve(&mut att, &dir.path().join("x.pdf"), Phase::Fast, None)
            .await;
        assert!(!result.success);
        assert_eq!(src.call_count(), 0);
    }
}
