use once_cell::sync::Lazy;
use regex::Regex;

use super::{LocateFuture, Needs, PdfLocator};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, send_text};

static FULLTEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<dcfulltextpath>(https?://[^<]+\.pdf)</dcfulltextpath>").unwrap());

/// Bielefeld Academic Search Engine.
pub struct Base;

pub fn fulltext_pdfs(body: &str) -> Vec<String> {
    FULLTEXT_RE
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .take(3)
        .collect()
}

impl PdfLocator for Base {
    fn name(&self) -> &str {
        "BASE"
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
            let query = match (ctx.doi(), ctx.title()) {
                (Some(doi), _) => format!("doi:{}", doi),
                (None, Some(title)) => title.to_string(),
                (None, None) => return Ok(vec![]),
            };
            let url = format!(
                "https://api.base-search.net/cgi-bin/BaseHttpSearchInterface.fcgi?func=PerformSearch&query={}&hits=5&format=json",
                urlencoding::encode(&query)
            );
            let body = send_text(fetch.client().get(&url).timeout(fetch.timeout())).await?;
            Ok(fulltext_pdfs(&body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_three_pdf_paths() {
        let body = (1..=5)
            .map(|i| format!("<doc><dcfulltextpath>https://repo.org/{}.pdf</dcfulltextpath></doc>", i))
            .collect::<String>()
            + "<dcfulltextpath>https://repo.org/landing</dcfulltextpath>";
        assert_eq!(
            fulltext_pdfs(&body),
            vec!["https://repo.org/1.pdf", "https://repo.org/2.pdf", "https://repo.org/3.pdf"]
        );
    }
}
