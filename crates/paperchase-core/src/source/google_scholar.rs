use scraper::{Html, Selector};

use super::{LocateFuture, Needs, PdfLocator};
use crate::ResolutionAttempt;
use crate::fetch::{Downloader, FetchMode, absolutize};

pub struct GoogleScholar;

/// Links of results tagged `[PDF]`, first three.
pub fn pdf_result_links(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse("a[href]") else {
        return vec![];
    };
    doc.select(&sel)
        .filter(|a| a.text().collect::<String>().contains("[PDF]"))
        .filter_map(|a| a.value().attr("href"))
        .filter(|h| h.starts_with("http") || h.starts_with("//"))
        .filter_map(|h| absolutize(h, "https://scholar.google.com/"))
        .take(3)
        .collect()
}

impl PdfLocator for GoogleScholar {
    fn name(&self) -> &str {
        "Google Scholar"
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
                "https://scholar.google.com/scholar?q={}",
                urlencoding::encode(title)
            );
            let html = fetch.get_text(&url, FetchMode::Plain).await?;
            Ok(pdf_result_links(&html))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_tagged_results_only() {
        let html = r#"
            <div class="gs_or_ggsm"><a href="https://repo.org/a.pdf"><span class="gs_ctg2">[PDF]</span> repo.org</a></div>
            <a href="https://pub.org/landing">A landing page</a>
            <div><a href="//cdn.org/b.pdf"><span>[PDF]</span> cdn.org</a></div>
            <div><a href="/scholar?cites=1"><span>[PDF]</span> odd</a></div>
        "#;
        assert_eq!(
            pdf_result_links(html),
            vec!["https://repo.org/a.pdf", "https://cdn.org/b.pdf"]
        );
    }
}
