use super::{LocateFuture, Needs, PdfLocator};
use crate::ResolutionAttempt;
use crate::fetch::Downloader;

/// Open-access publishers whose PDF location follows from the landing URL.
pub struct OpenAccess;

/// Candidate PDF URLs derived from publisher URL patterns, in order.
pub fn publisher_candidates(url: &str, doi: Option<&str>, arxiv_id: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(id) = arxiv_id {
        out.push(format!("https://arxiv.org/pdf/{}.pdf", id));
    }

    if url.contains("mdpi.com") && !url.ends_with("/pdf") {
        out.push(format!("{}/pdf", url.trim_end_matches('/')));
    }

    if url.contains("frontiersin.org") && !url.contains("/pdf") && url.contains("/full") {
        out.push(url.replace("/full", "/pdf"));
    }

    if let Some(doi) = doi {
        if url.contains("plos.org") {
            out.push(format!(
                "https://journals.plos.org/plosone/article/file?id={}&type=printable",
                doi
            ));
        }
        if url.contains("rsc.org")
            && let Some(suffix) = doi.rsplit('/').next()
        {
            out.push(format!(
                "https://pubs.rsc.org/en/content/articlepdf/{}",
                suffix
            ));
        }
    }

    out
}

impl PdfLocator for OpenAccess {
    fn name(&self) -> &str {
        "Open Access"
    }

    fn needs(&self) -> Needs {
        Needs::Url
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a ResolutionAttempt,
        _fetch: &'a Downloader,
    ) -> LocateFuture<'a> {
        Box::pin(async move { Ok(publisher_candidates(ctx.url(), ctx.doi(), ctx.arxiv_id())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arxiv_pdf() {
        assert_eq!(
            publisher_candidates("https://arxiv.org/abs/2301.00001", None, Some("2301.00001")),
            vec!["https://arxiv.org/pdf/2301.00001.pdf"]
        );
    }

    #[test]
    fn mdpi_and_frontiers() {
        assert_eq!(
            publisher_candidates("https://www.mdpi.com/2073-4360/15/3/123/", None, None),
            vec!["https://www.mdpi.com/2073-4360/15/3/123/pdf"]
        );
        assert_eq!(
            publisher_candidates(
                "https://www.frontiersin.org/articles/10.3389/fchem.2023.1/full",
                Some("10.3389/fchem.2023.1"),
                None
            ),
            vec!["https://www.frontiersin.org/articles/10.3389/fchem.2023.1/pdf"]
        );
    }

    #[test]
    fn plos_and_rsc_need_doi() {
        let plos = "https://journals.plos.org/plosone/article?id=10.1371/journal.pone.0281234";
        assert!(publisher_candidates(plos, None, None).is_empty());
        assert_eq!(
            publisher_candidates(plos, Some("10.1371/journal.pone.0281234"), None),
            vec![
                "https://journals.plos.org/plosone/article/file?id=10.1371/journal.pone.0281234&type=printable"
            ]
        );
        assert_eq!(
            publisher_candidates(
                "https://pubs.rsc.org/en/content/articlelanding/2023/ta/d3ta01234a",
                Some("10.1039/d3ta01234a"),
                None
            ),
            vec!["https://pubs.rsc.org/en/content/articlepdf/d3ta01234a"]
        );
    }

    #[test]
    fn unknown_publisher_yields_nothing() {
        assert!(publisher_candidates("https://www.science.org/doi/10.1126/x", Some("10.1126/x"), None).is_empty());
    }
}
