use super::{LocateFuture, Needs, PdfLocator, first_str};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, send_json};

pub struct Unpaywall {
    /// Contact address Unpaywall requires on every request.
    pub email: String,
}

/// `best_oa_location.url_for_pdf`, then every OA location that looks like a PDF.
pub fn pdf_candidates(data: &serde_json::Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(url) = first_str(data, &["/best_oa_location/url_for_pdf"]) {
        out.push(url.to_string());
    }
    if let Some(locations) = data["oa_locations"].as_array() {
        for loc in locations {
            if let Some(url) = first_str(loc, &["/url_for_pdf", "/url"])
                && url.to_lowercase().contains(".pdf")
                && !out.iter().any(|u| u == url)
            {
                out.push(url.to_string());
            }
        }
    }
    out
}

impl PdfLocator for Unpaywall {
    fn name(&self) -> &str {
        "Unpaywall"
    }

    fn needs(&self) -> Needs {
        Needs::Doi
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a ResolutionAttempt,
        fetch: &'a Downloader,
    ) -> LocateFuture<'a> {
        Box::pin(async move {
            let Some(doi) = ctx.doi() else {
                return Ok(vec![]);
            };
            let url = format!(
                "https://api.unpaywall.org/v2/{}?email={}",
                doi,
                urlencoding::encode(&self.email)
            );
            let data = send_json(fetch.client().get(&url).timeout(fetch.timeout())).await?;
            Ok(pdf_candidates(&data))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn best_location_first_then_pdf_locations() {
        let data = json!({
            "best_oa_location": {"url_for_pdf": "https://repo.org/a.pdf"},
            "oa_locations": [
                {"url_for_pdf": "https://repo.org/a.pdf"},
                {"url_for_pdf": null, "url": "https://mirror.org/b.PDF"},
                {"url": "https://landing.org/html"}
            ]
        });
        assert_eq!(
            pdf_candidates(&data),
            vec!["https://repo.org/a.pdf", "https://mirror.org/b.PDF"]
        );
    }

    #[test]
    fn closed_access_has_none() {
        let data = json!({"best_oa_location": null, "oa_locations": []});
        assert!(pdf_candidates(&data).is_empty());
    }
}
