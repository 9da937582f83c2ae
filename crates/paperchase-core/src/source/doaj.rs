use super::{LocateFuture, Needs, PdfLocator};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, send_json};

/// Directory of Open Access Journals.
pub struct Doaj;

pub fn fulltext_pdfs(data: &serde_json::Value) -> Vec<String> {
    let Some(first) = data["results"].as_array().and_then(|r| r.first()) else {
        return vec![];
    };
    first["bibjson"]["link"]
        .as_array()
        .map(|links| {
            links
                .iter()
                .filter(|l| l["type"].as_str() == Some("fulltext"))
                .filter_map(|l| l["url"].as_str())
                .filter(|u| u.to_lowercase().contains(".pdf"))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl PdfLocator for Doaj {
    fn name(&self) -> &str {
        "DOAJ"
    }

    fn needs(&self) -> Needs {
        Needs::DoiOrTitle
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a ResolutionAttempt,
        fetch: &'a Downloader,
    ) -> LocateFuture<'a> {
        Box::pin(async move {
            let url = if let Some(doi) = ctx.doi() {
                format!("https://doaj.org/api/search/articles/doi:{}", doi)
            } else if let Some(title) = ctx.title() {
                format!(
                    "https://doaj.org/api/search/articles/{}",
                    urlencoding::encode(title)
                )
            } else {
                return Ok(vec![]);
            };
            let data = send_json(fetch.client().get(&url).timeout(fetch.timeout())).await?;
            Ok(fulltext_pdfs(&data))
        })
    }
}
