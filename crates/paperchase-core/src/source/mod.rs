//! Acquisition sources and the trait the chain drives them through.
//!
//! Most sources only need to turn an item into candidate PDF URLs; those
//! implement [`PdfLocator`] and are wrapped in [`Located`], which downloads
//! and validates through the shared [`Downloader`]. Sources that drive the
//! download themselves implement [`Source`] directly.

pub mod base;
pub mod browser;
pub mod core_api;
pub mod direct;
pub mod doaj;
pub mod google_scholar;
pub mod mock;
pub mod open_access;
pub mod openaire;
pub mod openalex;
pub mod researchgate;
pub mod scihub;
pub mod semantic_scholar;
pub mod twelve_ft;
pub mod unpaywall;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::browser::BrowserError;
use crate::fetch::{Downloader, FetchMode};
use crate::{Config, ResolutionAttempt};

/// Transient failure of a single source. The chain absorbs every variant
/// and moves on.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("timed out after {0:.1?}")]
    Timeout(Duration),
    #[error("rate limited (429)")]
    RateLimited { retry_after: Option<Duration> },
    #[error("not found")]
    NotFound,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Other(format!("bad JSON: {}", e))
    }
}

/// What an item must carry for a source to be worth calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Needs {
    Url,
    Doi,
    DoiOrArxiv,
    DoiOrTitle,
    Title,
}

impl Needs {
    /// Whether the chain should look up title/authors before this source.
    pub fn wants_metadata(self) -> bool {
        matches!(self, Needs::DoiOrTitle | Needs::Title)
    }

    pub fn is_met(self, ctx: &ResolutionAttempt) -> bool {
        match self {
            Needs::Url => true,
            Needs::Doi => ctx.doi().is_some(),
            Needs::DoiOrArxiv => ctx.doi().is_some() || ctx.arxiv_id().is_some(),
            Needs::DoiOrTitle => ctx.doi().is_some() || ctx.title().is_some(),
            Needs::Title => ctx.title().is_some(),
        }
    }
}

pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, SourceError>> + Send + 'a>>;

pub type LocateFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<String>, SourceError>> + Send + 'a>>;

/// One acquisition strategy in the chain.
pub trait Source: Send + Sync {
    /// Display name; also the rate-limiter and `--disable-sources` key.
    fn name(&self) -> &str;

    fn needs(&self) -> Needs {
        Needs::Url
    }

    /// Interactive sources run only in the browser phase.
    fn is_interactive(&self) -> bool {
        false
    }

    /// Try to write a validated artifact to `output`. `Ok(false)` means the
    /// source had nothing for this item.
    fn attempt<'a>(&'a self, ctx: &'a ResolutionAttempt, output: &'a Path) -> SourceFuture<'a>;
}

/// A source that only finds candidate PDF URLs.
pub trait PdfLocator: Send + Sync {
    fn name(&self) -> &str;

    fn needs(&self) -> Needs;

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::Plain
    }

    fn locate<'a>(&'a self, ctx: &'a ResolutionAttempt, fetch: &'a Downloader)
    -> LocateFuture<'a>;
}

/// Adapts a [`PdfLocator`] into a [`Source`].
pub struct Located<L> {
    locator: L,
    downloader: Arc<Downloader>,
}

impl<L: PdfLocator> Located<L> {
    pub fn new(locator: L, downloader: Arc<Downloader>) -> Self {
        Self {
            locator,
            downloader,
        }
    }
}

impl<L: PdfLocator> Source for Located<L> {
    fn name(&self) -> &str {
        self.locator.name()
    }

    fn needs(&self) -> Needs {
        self.locator.needs()
    }

    fn attempt<'a>(&'a self, ctx: &'a ResolutionAttempt, output: &'a Path) -> SourceFuture<'a> {
        Box::pin(async move {
            let mut candidates = self.locator.locate(ctx, &self.downloader).await?;
            candidates.dedup();
            if candidates.is_empty() {
                return Ok(false);
            }
            for url in &candidates {
                match self
                    .downloader
                    .fetch_to(url, output, self.locator.fetch_mode())
                    .await
                {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    // Candidate hosts are third parties; their failures say
                    // nothing about this source.
                    Err(e) => tracing::debug!(
                        source = self.locator.name(),
                        url = %url,
                        error = %e,
                        "candidate download failed"
                    ),
                }
            }
            Ok(false)
        })
    }
}

/// Build every enabled source in priority order. `browser`, if given, is
/// appended last.
pub fn build_source_list(
    config: &Config,
    downloader: Arc<Downloader>,
    browser: Option<Arc<dyn Source>>,
) -> Vec<Arc<dyn Source>> {
    let d = || downloader.clone();
    let mut sources: Vec<Arc<dyn Source>> = vec![
        Arc::new(Located::new(direct::Direct, d())),
        Arc::new(Located::new(open_access::OpenAccess, d())),
    ];

    if let Some(email) = config
        .unpaywall_email
        .clone()
        .or_else(|| config.crossref_mailto.clone())
    {
        sources.push(Arc::new(Located::new(unpaywall::Unpaywall { email }, d())));
    }

    sources.push(Arc::new(Located::new(openalex::OpenAlex, d())));

    if let Some(api_key) = config.core_api_key.clone() {
        sources.push(Arc::new(Located::new(core_api::Core { api_key }, d())));
    }

    sources.push(Arc::new(Located::new(
        semantic_scholar::SemanticScholar {
            api_key: config.s2_api_key.clone(),
        },
        d(),
    )));
    sources.push(Arc::new(Located::new(base::Base, d())));
    sources.push(Arc::new(Located::new(openaire::OpenAire, d())));
    sources.push(Arc::new(Located::new(doaj::Doaj, d())));
    sources.push(Arc::new(Located::new(researchgate::ResearchGate, d())));
    sources.push(Arc::new(Located::new(twelve_ft::TwelveFt, d())));
    sources.push(Arc::new(scihub::SciHub::new(d())));
    sources.push(Arc::new(Located::new(google_scholar::GoogleScholar, d())));

    if let Some(browser) = browser {
        sources.push(browser);
    }

    sources.retain(|s| {
        let disabled = config.is_disabled(s.name());
        if disabled {
            tracing::debug!(source = s.name(), "source disabled");
        }
        !disabled
    });
    sources
}

/// First string found at any of `pointers` in `value`.
pub(crate) fn first_str<'v>(value: &'v serde_json::Value, pointers: &[&str]) -> Option<&'v str> {
    pointers
        .iter()
        .filter_map(|p| value.pointer(p).and_then(|v| v.as_str()))
        .find(|s| !s.is_empty())
}

/// Treat a JSON value that may be one object or an array of objects as a list.
pub(crate) fn one_or_many(value: &serde_json::Value) -> Vec<&serde_json::Value> {
    match value {
        serde_json::Value::Array(items) => items.iter().collect(),
        serde_json::Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReferenceItem;
    use crate::validator::tests::FixedPages;
    use crate::validator::ArtifactValidator;

    fn downloader() -> Arc<Downloader> {
        Arc::new(Downloader::new(
            reqwest::Client::new(),
            ArtifactValidator::new(Arc::new(FixedPages(Some(1)))),
            Duration::from_secs(5),
        ))
    }

    fn attempt(url: &str) -> ResolutionAttempt {
        ResolutionAttempt::new(ReferenceItem {
            index: 1,
            checked: false,
            url: url.into(),
        })
    }

    #[test]
    fn needs_are_checked_against_attempt() {
        let doi = attempt("https://doi.org/10.1/a");
        let arxiv = attempt("https://arxiv.org/abs/2301.00001");
        let mut titled = attempt("https://example.org/landing-page");
        titled.title = Some("A Paper".into());

        assert!(Needs::Doi.is_met(&doi));
        assert!(!Needs::Doi.is_met(&arxiv));
        assert!(Needs::DoiOrArxiv.is_met(&arxiv));
        assert!(Needs::DoiOrTitle.is_met(&titled));
        assert!(!Needs::Title.is_met(&doi));
        assert!(Needs::Title.is_met(&titled));
        assert!(Needs::Url.is_met(&arxiv));
    }

    #[test]
    fn source_order_is_fixed() {
        let config = Config {
            unpaywall_email: Some("me@example.org".into()),
            core_api_key: Some("k".into()),
            ..Default::default()
        };
        let names: Vec<String> = build_source_list(&config, downloader(), None)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "Direct",
                "Open Access",
                "Unpaywall",
                "OpenAlex",
                "CORE",
                "Semantic Scholar",
                "BASE",
                "OpenAIRE",
                "DOAJ",
                "ResearchGate",
                "12ft",
                "Sci-Hub",
                "Google Scholar",
            ]
        );
    }

    #[test]
    fn keyless_sources_are_omitted_and_disabled_filtered() {
        let config = Config {
            disabled_sources: vec!["sci-hub".into(), "12FT".into()],
            ..Default::default()
        };
        let names: Vec<String> = build_source_list(&config, downloader(), None)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert!(!names.iter().any(|n| n == "Unpaywall" || n == "CORE"));
        assert!(!names.iter().any(|n| n == "Sci-Hub" || n == "12ft"));
        assert_eq!(names.first().map(String::as_str), Some("Direct"));
    }

    #[test]
    fn one_or_many_shapes() {
        let single = serde_json::json!({"url": "a"});
        let many = serde_json::json!([{"url": "a"}, {"url": "b"}]);
        assert_eq!(one_or_many(&single).len(), 1);
        assert_eq!(one_or_many(&many).len(), 2);
        assert!(one_or_many(&serde_json::Value::Null).is_empty());
    }
}
