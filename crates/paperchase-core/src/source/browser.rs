use std::path::Path;
use std::sync::Arc;

use super::{Needs, Source, SourceFuture};
use crate::ResolutionAttempt;
use crate::browser::{BrowserLauncher, BrowserPage, BrowserStrategy, Outcome};

/// Last resort: a real browser steered by the vision describer.
pub struct BrowserSource {
    launcher: Arc<dyn BrowserLauncher>,
    strategy: BrowserStrategy,
}

impl BrowserSource {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, strategy: BrowserStrategy) -> Self {
        Self { launcher, strategy }
    }
}

/// An open tab that is closed even when the attempt is dropped by a timeout.
struct Tab(Option<Box<dyn BrowserPage>>);

impl Tab {
    async fn close(mut self, index: usize) {
        if let Some(mut page) = self.0.take()
            && let Err(e) = page.close().await
        {
            tracing::debug!(index, error = %e, "closing page failed");
        }
    }
}

impl Drop for Tab {
    fn drop(&mut self) {
        let Some(mut page) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::debug!(error = %e, "closing abandoned page failed");
                    }
                });
            }
            Err(_) => tracing::warn!("abandoned browser page left open: no runtime"),
        }
    }
}

impl Source for BrowserSource {
    fn name(&self) -> &str {
        "Browser"
    }

    fn needs(&self) -> Needs {
        Needs::Url
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn attempt<'a>(&'a self, ctx: &'a ResolutionAttempt, output: &'a Path) -> SourceFuture<'a> {
        Box::pin(async move {
            let mut tab = Tab(Some(self.launcher.new_page().await?));
            let result = match tab.0.as_deref_mut() {
                Some(page) => self.strategy.run(page, ctx, output).await,
                None => Ok(Outcome::NoMatch),
            };
            tab.close(ctx.index()).await;
            let outcome = result?;
            if let Outcome::DirectFetch(ref url) = outcome {
                tracing::debug!(index = ctx.index(), url = %url, "fetched link found by browser");
            }
            Ok(outcome.is_success())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::tests::{ClickEffect, FakePage, downloader, landing_page};
    use crate::browser::BrowserError;
    use crate::vision::tests::ScriptedVision;
    use crate::{ReferenceItem, ResolutionAttempt};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct OnePage(Mutex<Option<FakePage>>);

    #[async_trait]
    impl BrowserLauncher for OnePage {
        async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .map(|p| Box::new(p) as Box<dyn BrowserPage>)
                .ok_or_else(|| BrowserError::Launch("no page left".into()))
        }
    }

    #[tokio::test]
    async fn closes_page_and_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new(landing_page()).on_click(1, ClickEffect::Download);
        let log = page.log.clone();
        let vision = Arc::new(ScriptedVision::new(vec![Some(
            crate::browser::tests::download_pdf_description(),
        )]));
        let source = BrowserSource::new(
            Arc::new(OnePage(Mutex::new(Some(page)))),
            BrowserStrategy::new(downloader(), dir.path())
                .with_describer(vision)
                .with_waits(Duration::ZERO, Duration::ZERO),
        );
        let ctx = ResolutionAttempt::new(ReferenceItem {
            index: 7,
            checked: false,
            url: "https://www.journal.org/article/1".into(),
        });

        assert!(source.is_interactive());
        let ok = source.attempt(&ctx, &dir.path().join("item007.pdf")).await.unwrap();
        assert!(ok);
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("close"));

        // launcher exhausted: the error surfaces to the chain
        assert!(source.attempt(&ctx, &dir.path().join("b.pdf")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_attempt_still_closes_page() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new(landing_page());
        let log = page.log.clone();
        // the settle pause after navigation outlasts the timeout below
        let source = BrowserSource::new(
            Arc::new(OnePage(Mutex::new(Some(page)))),
            BrowserStrategy::new(downloader(), dir.path())
                .with_waits(Duration::from_secs(3600), Duration::ZERO),
        );
        let ctx = ResolutionAttempt::new(ReferenceItem {
            index: 7,
            checked: false,
            url: "https://www.journal.org/article/1".into(),
        });

        let out = dir.path().join("item007.pdf");
        let attempt = tokio::time::timeout(Duration::from_secs(1), source.attempt(&ctx, &out));
        assert!(attempt.await.is_err());

        for _ in 0..10 {
            if log.lock().unwrap().iter().any(|l| l == "close") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(log.lock().unwrap().iter().any(|l| l == "close"));
    }
}
