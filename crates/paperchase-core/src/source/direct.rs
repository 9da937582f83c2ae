use super::{LocateFuture, Needs, PdfLocator};
use crate::ResolutionAttempt;
use crate::fetch::Downloader;

/// The reference URL itself, when it already points at a PDF.
pub struct Direct;

pub fn looks_like_pdf_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.ends_with(".pdf") || lower.contains("/pdf")
}

impl PdfLocator for Direct {
    fn name(&self) -> &str {
        "Direct"
    }

    fn needs(&self) -> Needs {
        Needs::Url
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a ResolutionAttempt,
        _fetch: &'a Downloader,
    ) -> LocateFuture<'a> {
        Box::pin(async move {
            if looks_like_pdf_url(ctx.url()) {
                Ok(vec![ctx.url().to_string()])
            } else {
                Ok(vec![])
            }
        })
    }
}
