use super::{LocateFuture, Needs, PdfLocator, first_str};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, send_json};

const CORE_SEARCH_URL: &str = "https://api.core.ac.uk/v3/search/works";

/// CORE aggregator search. Only built when an API key is configured.
pub struct Core {
    pub api_key: String,
}

/// `downloadUrl` of the first hit, else its first `download` link.
pub fn download_url(data: &serde_json::Value) -> Option<String> {
    let first = data["results"].as_array()?.first()?;
    if let Some(url) = first_str(first, &["/downloadUrl"]) {
        return Some(url.to_string());
    }
    first["links"]
        .as_array()?
        .iter()
        .find(|l| l["type"].as_str() == Some("download"))
        .and_then(|l| l["url"].as_str())
        .map(String::from)
}

impl Core {
    async fn search(
        &self,
        fetch: &Downloader,
        query: &str,
    ) -> Result<Option<String>, super::SourceError> {
        let req = fetch
            .client()
            .post(CORE_SEARCH_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "q": query, "limit": 1 }))
            .timeout(fetch.timeout());
        let data = send_json(req).await?;
        Ok(download_url(&data))
    }
}

impl PdfLocator for Core {
    fn name(&self) -> &str {
        "CORE"
    }

    fn needs(&self) -> Needs {
        Needs::DoiOrArxiv
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a ResolutionAttempt,
        fetch: &'a Downloader,
    ) -> LocateFuture<'a> {
        Box::pin(async move {
            let mut out = Vec::new();
            if let Some(doi) = ctx.doi()
                && let Some(url) = self.search(fetch, &format!("doi:\"{}\"", doi)).await?
            {
                out.push(url);
            }
            if let Some(id) = ctx.arxiv_id()
                && let Some(url) = self.search(fetch, &format!("arxiv:{}", id)).await?
            {
                out.push(url);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn download_url_preferred() {
        let data = json!({"results": [{
            "downloadUrl": "https://core.ac.uk/download/1.pdf",
            "links": [{"type": "download", "url": "https://other.org/1.pdf"}]
        }]});
        assert_eq!(download_url(&data).unwrap(), "https://core.ac.uk/download/1.pdf");
    }

    #[test]
    fn falls_back_to_download_link() {
        let data = json!({"results": [{
            "downloadUrl": "",
            "links": [
                {"type": "display", "url": "https://core.ac.uk/display/1"},
                {"type": "download", "url": "https://core.ac.uk/download/pdf/1.pdf"}
            ]
        }]});
        assert_eq!(download_url(&data).unwrap(), "https://core.ac.uk/download/pdf/1.pdf");
    }

    #[test]
    fn no_results() {
        assert!(download_url(&json!({"results": []})).is_none());
        assert!(download_url(&json!({"message": "unauthorized"})).is_none());
    }
}
