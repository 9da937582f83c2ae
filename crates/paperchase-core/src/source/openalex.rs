use super::{LocateFuture, Needs, PdfLocator, first_str};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, send_json};

pub struct OpenAlex;

/// PDF locations of the single work in a lookup or the first search hit.
pub fn pdf_candidates(data: &serde_json::Value) -> Vec<String> {
    let work = match data["results"].as_array() {
        Some(results) => match results.first() {
            Some(w) => w,
            None => return vec![],
        },
        None if data.get("id").is_some() => data,
        None => return vec![],
    };

    let mut out: Vec<String> = Vec::new();
    if work["open_access"]["is_oa"].as_bool() == Some(true)
        && let Some(url) = first_str(work, &["/open_access/oa_url"])
    {
        out.push(url.to_string());
    }
    for pointer in ["/best_oa_location/pdf_url", "/primary_location/pdf_url"] {
        if let Some(url) = first_str(work, &[pointer])
            && !out.iter().any(|u| u == url)
        {
            out.push(url.to_string());
        }
    }
    out
}

impl PdfLocator for OpenAlex {
    fn name(&self) -> &str {
        "OpenAlex"
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
                format!("https://api.openalex.org/works/https://doi.org/{}", doi)
            } else if let Some(title) = ctx.title() {
                format!(
                    "https://api.openalex.org/works?search={}&per-page=1",
                    urlencoding::encode(title)
                )
            } else {
                return Ok(vec![]);
            };

            let data = send_json(
                fetch
                    .client()
                    .get(&url)
                    .header("User-Agent", "paperchase (academic PDF retrieval)")
                    .timeout(fetch.timeout()),
            )
            .await?;
            Ok(pdf_candidates(&data))
        })
    }
}
