use scraper::{Html, Selector};

use super::{LocateFuture, Needs, PdfLocator};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, FetchMode, absolutize};

const BASE_URL: &str = "https://www.researchgate.net";

/// ResearchGate publication search, scraped for full-text links.
pub struct ResearchGate;

/// Links on a search page that lead to a PDF or a download endpoint.
pub fn download_links(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse("a[href]") else {
        return vec![];
    };
    let mut out: Vec<String> = Vec::new();
    for a in doc.select(&sel) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let lower = href.to_lowercase();
        let is_pdf = lower.contains("researchgate.net/") && lower.contains(".pdf");
        let is_download = lower.starts_with("/publication/") && lower.contains("download");
        if (is_pdf || is_download)
            && let Some(url) = absolutize(href, BASE_URL)
            && !out.contains(&url)
        {
            out.push(url);
        }
    }
    out
}

impl PdfLocator for ResearchGate {
    fn name(&self) -> &str {
        "ResearchGate"
    }

    fn needs(&self) -> Needs {
        Needs::Title
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a ResolutionAttempt,
        fetch: &'a Downloader,
    ) -> LocateFuture<'a> {
        Box::pin(async move {
            let Some(title) = ctx.title() else {
                return Ok(vec![]);
            };
            let url = format!(
                "{}/search/publication?q={}",
                BASE_URL,
                urlencoding::encode(title)
            );
            let html = fetch.get_text(&url, FetchMode::Plain).await?;
            Ok(download_links(&html))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_pdf_and_download_links() {
        let html = r#"
            <a href="https://www.researchgate.net/profile/X/publication/1/links/abc/Paper.pdf">PDF</a>
            <a href="/publication/12345_Title/download">Download</a>
            <a href="/publication/12345_Title">Landing</a>
            <a href="https://elsewhere.org/file.pdf">Other</a>
        "#;
        assert_eq!(
            download_links(html),
            vec![
                "https://www.researchgate.net/profile/X/publication/1/links/abc/Paper.pdf",
                "https://www.researchgate.net/publication/12345_Title/download",
            ]
        );
    }
}
