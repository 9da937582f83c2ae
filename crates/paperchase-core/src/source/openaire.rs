use super::{LocateFuture, Needs, PdfLocator, one_or_many};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, send_json};

pub struct OpenAire;

/// PDF web resources of the first result. OpenAIRE returns a bare object
/// wherever a list has a single element, at every level.
pub fn pdf_candidates(data: &serde_json::Value) -> Vec<String> {
    let results = one_or_many(&data["response"]["results"]["result"]);
    let Some(first) = results.first() else {
        return vec![];
    };
    let instances = one_or_many(&first["metadata"]["oaf:entity"]["oaf:result"]["children"]["instance"]);

    let mut out = Vec::new();
    for instance in instances {
        for wr in one_or_many(&instance["webresource"]) {
            let url = wr["url"]
                .as_str()
                .or_else(|| wr["url"]["$"].as_str());
            if let Some(url) = url
                && url.to_lowercase().contains(".pdf")
            {
                out.push(url.to_string());
            }
        }
    }
    out
}

impl PdfLocator for OpenAire {
    fn name(&self) -> &str {
        "OpenAIRE"
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
                    "https://api.openaire.eu/search/publications?doi={}&format=json",
                    urlencoding::encode(doi)
                )
            } else if let Some(title) = ctx.title() {
                format!(
                    "https://api.openaire.eu/search/publications?title={}&format=json&size=1",
                    urlencoding::encode(title)
                )
            } else {
                return Ok(vec![]);
            };
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
    fn single_object_shapes() {
        let data = json!({"response": {"results": {"result": {
            "metadata": {"oaf:entity": {"oaf:result": {"children": {"instance": {
                "webresource": {"url": {"$": "https://zenodo.org/record/1/files/a.pdf"}}
            }}}}}
        }}}});
        assert_eq!(pdf_candidates(&data), vec!["https://zenodo.org/record/1/files/a.pdf"]);
    }

    #[test]
    fn array_shapes_filter_non_pdf() {
        let data = json!({"response": {"results": {"result": [{
            "metadata": {"oaf:entity": {"oaf:result": {"children": {"instance": [
                {"webresource": [{"url": "https://repo.org/landing"}, {"url": "https://repo.org/a.PDF"}]},
                {"webresource": {"url": "https://repo.org/b.pdf"}}
            ]}}}}
        }]}}});
        assert_eq!(
            pdf_candidates(&data),
            vec!["https://repo.org/a.PDF", "https://repo.org/b.pdf"]
        );
    }

    #[test]
    fn no_results() {
        assert!(pdf_candidates(&json!({"response": {"results": null}})).is_empty());
    }
}
