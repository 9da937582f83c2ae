use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Needs, Source, SourceFuture};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, FetchMode};

pub const MIRRORS: &[&str] = &["https://sci-hub.ru", "https://sci-hub.se", "https://sci-hub.st"];

static PDF_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(https?://[^"'>\s]+\.pdf[^"'>\s]*)"#).unwrap());
static EMBED_SRC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"src="(//[^"]+)""#).unwrap());

/// Mirrors are tried in order; each is a separate page fetch and download.
pub struct SciHub {
    downloader: Arc<Downloader>,
}

impl SciHub {
    pub fn new(downloader: Arc<Downloader>) -> Self {
        Self { downloader }
    }
}

/// The PDF link on a mirror page, or `None` when the paper is not there.
pub fn embedded_pdf(page: &str) -> Option<String> {
    if page.to_lowercase().contains("not available") {
        return None;
    }
    if let Some(c) = PDF_URL_RE.captures(page) {
        return Some(c[1].to_string());
    }
    EMBED_SRC_RE
        .captures(page)
        .map(|c| format!("https:{}", &c[1]))
}

impl Source for SciHub {
    fn name(&self) -> &str {
        "Sci-Hub"
    }

    fn needs(&self) -> Needs {
        Needs::Doi
    }

    fn attempt<'a>(&'a self, ctx: &'a ResolutionAttempt, output: &'a Path) -> SourceFuture<'a> {
        Box::pin(async move {
            let Some(doi) = ctx.doi() else {
                return Ok(false);
            };
            for mirror in MIRRORS {
                let page = match self
                    .downloader
                    .get_text(&format!("{}/{}", mirror, doi), FetchMode::Plain)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::debug!(mirror, error = %e, "mirror unreachable");
                        continue;
                    }
                };
                let Some(pdf_url) = embedded_pdf(&page) else {
                    continue;
                };
                match self
                    .downloader
                    .fetch_to(&pdf_url, output, FetchMode::Plain)
                    .await
                {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    Err(e) => tracing::debug!(mirror, url = %pdf_url, error = %e, "mirror download failed"),
                }
            }
            Ok(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_pdf_link() {
        let page = r#"<iframe src="https://twin.sci-hub.ru/1/abc/paper.pdf#view=FitH"></iframe>"#;
        assert_eq!(
            embedded_pdf(page).unwrap(),
            "https://twin.sci-hub.ru/1/abc/paper.pdf#view=FitH"
        );
    }

    #[test]
    fn protocol_relative_embed() {
        let page = r#"<embed type="application/pdf" src="//moscow.sci-hub.ru/2/x/y">"#;
        assert_eq!(embedded_pdf(page).unwrap(), "https://moscow.sci-hub.ru/2/x/y");
    }

    #[test]
    fn unavailable_page_skipped() {
        let page = "Unfortunately, this article is Not Available through Sci-Hub. <a href='https://x.org/a.pdf'>";
        assert!(embedded_pdf(page).is_none());
    }
}
