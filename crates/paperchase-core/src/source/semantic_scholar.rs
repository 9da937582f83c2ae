use super::{LocateFuture, Needs, PdfLocator, first_str};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, send_json};

pub struct SemanticScholar {
    pub api_key: Option<String>,
}

/// `openAccessPdf.url` of a paper lookup or of the first search hit.
pub fn open_access_pdf(data: &serde_json::Value) -> Option<String> {
    let paper = match data["data"].as_array() {
        Some(hits) => hits.first()?,
        None => data,
    };
    first_str(paper, &["/openAccessPdf/url"]).map(String::from)
}

impl PdfLocator for SemanticScholar {
    fn name(&self) -> &str {
        "Semantic Scholar"
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
                format!(
                    "https://api.semanticscholar.org/graph/v1/paper/DOI:{}?fields=openAccessPdf,title",
                    doi
                )
            } else if let Some(title) = ctx.title() {
                format!(
                    "https://api.semanticscholar.org/graph/v1/paper/search?query={}&limit=1&fields=openAccessPdf,title",
                    urlencoding::encode(title)
                )
            } else {
                return Ok(vec![]);
            };

            let mut req = fetch.client().get(&url).timeout(fetch.timeout());
            if let Some(ref key) = self.api_key {
                req = req.header("x-api-key", key);
            }
            let data = send_json(req).await?;
            Ok(open_access_pdf(&data).into_iter().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_and_search_shapes() {
        let lookup = json!({"title": "x", "openAccessPdf": {"url": "https://s2.org/a.pdf"}});
        assert_eq!(open_access_pdf(&lookup).unwrap(), "https://s2.org/a.pdf");

        let search = json!({"data": [{"openAccessPdf": {"url": "https://s2.org/b.pdf"}}]});
        assert_eq!(open_access_pdf(&search).unwrap(), "https://s2.org/b.pdf");
    }

    #[test]
    fn closed_paper() {
        assert!(open_access_pdf(&json!({"openAccessPdf": null})).is_none());
        assert!(open_access_pdf(&json!({"data": []})).is_none());
    }
}
