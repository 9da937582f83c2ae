use scraper::{Html, Selector};

use super::{LocateFuture, Needs, PdfLocator};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, FetchMode};

/// The 12ft.io paywall proxy.
pub struct TwelveFt;

/// Absolute `.pdf` hrefs on the proxied page, first two only.
pub fn pdf_links(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse("a[href]") else {
        return vec![];
    };
    let mut out: Vec<String> = Vec::new();
    for href in doc.select(&sel).filter_map(|a| a.value().attr("href")) {
        if (href.starts_with("http://") || href.starts_with("https://"))
            && href.to_lowercase().contains(".pdf")
            && !out.iter().any(|u| u == href)
        {
            out.push(href.to_string());
        }
        if out.len() == 2 {
            break;
        }
    }
    out
}

impl PdfLocator for TwelveFt {
    fn name(&self) -> &str {
        "12ft"
    }

    fn needs(&self) -> Needs {
        Needs::Url
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a ResolutionAttempt,
        fetch: &'a Downloader,
    ) -> LocateFuture<'a> {
        Box::pin(async move {
            let html = fetch
                .get_text(&format!("https://12ft.io/{}", ctx.url()), FetchMode::Plain)
                .await?;
            Ok(pdf_links(&html))
        })
    }
}
