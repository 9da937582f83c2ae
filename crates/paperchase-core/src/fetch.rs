//! Shared HTTP fetch capability: download-to-file with validation, plus the
//! JSON/text helpers the API sources use.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use tokio::io::AsyncWriteExt;

use crate::rate_limit::check_rate_limit_response;
use crate::source::SourceError;
use crate::validator::ArtifactValidator;

/// Desktop browser user agent used for plain fetches and page scraping.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

const CRAWLER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
    "Mozilla/5.0 (compatible; bingbot/2.0; +http://www.bing.com/bingbot.htm)",
    "facebookexternalhit/1.1 (+http://www.facebook.com/externalhit_uatext.php)",
];

/// Header profile for a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Plain,
    /// Crawler user agent and a search-engine referrer.
    Stealth,
}

fn headers_for(mode: FetchMode) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match mode {
        FetchMode::Plain => {
            headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
            headers.insert(ACCEPT, HeaderValue::from_static("application/pdf"));
        }
        FetchMode::Stealth => {
            let ua = CRAWLER_USER_AGENTS[fastrand::usize(..CRAWLER_USER_AGENTS.len())];
            headers.insert(USER_AGENT, HeaderValue::from_static(ua));
            headers.insert(ACCEPT, HeaderValue::from_static("application/pdf,*/*"));
            headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
        }
    }
    headers
}

/// Wiley-style PDF links only serve the file with `download=true`.
pub fn with_download_param(url: &str) -> String {
    if !(url.contains("/pdfdirect/") || url.contains("/doi/pdf/")) {
        return url.to_string();
    }
    if !url.contains('?') {
        format!("{}?download=true", url)
    } else if !url.contains("download=") {
        format!("{}&download=true", url)
    } else {
        url.to_string()
    }
}

/// Turn protocol-relative and root-relative links into absolute URLs.
pub fn absolutize(href: &str, base: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    url::Url::parse(base)
        .and_then(|b| b.join(href))
        .ok()
        .map(|u| u.to_string())
}

/// Send a request and decode a JSON body, mapping 429/404/other statuses.
pub async fn send_json(req: reqwest::RequestBuilder) -> Result<serde_json::Value, SourceError> {
    let resp = req.send().await?;
    check_rate_limit_response(&resp)?;
    let status = resp.status();
    if status.as_u16() == 404 {
        return Err(SourceError::NotFound);
    }
    if !status.is_success() {
        return Err(SourceError::Other(format!("HTTP {}", status)));
    }
    Ok(resp.json().await?)
}

/// Send a request and return the body as text.
pub async fn send_text(req: reqwest::RequestBuilder) -> Result<String, SourceError> {
    let resp = req.send().await?;
    check_rate_limit_response(&resp)?;
    let status = resp.status();
    if status.as_u16() == 404 {
        return Err(SourceError::NotFound);
    }
    if !status.is_success() {
        return Err(SourceError::Other(format!("HTTP {}", status)));
    }
    Ok(resp.text().await?)
}

/// Downloads candidate URLs to the item's output path and keeps only files
/// the validator accepts.
pub struct Downloader {
    client: reqwest::Client,
    validator: ArtifactValidator,
    timeout: Duration,
}

impl Downloader {
    pub fn new(client: reqwest::Client, validator: ArtifactValidator, timeout: Duration) -> Self {
        Self {
            client,
            validator,
            timeout,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn validator(&self) -> &ArtifactValidator {
        &self.validator
    }

    /// GET `url` with the given header profile and return the page body.
    pub async fn get_text(&self, url: &str, mode: FetchMode) -> Result<String, SourceError> {
        let mut headers = headers_for(mode);
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,*/*"));
        send_text(self.client.get(url).headers(headers).timeout(self.timeout)).await
    }

    /// Download `url` into `dest`. Returns `Ok(true)` only when the written
    /// file passes validation; anything else is removed.
    pub async fn fetch_to(
        &self,
        url: &str,
        dest: &Path,
        mode: FetchMode,
    ) -> Result<bool, SourceError> {
        let url = with_download_param(url);
        let resp = self
            .client
            .get(&url)
            .headers(headers_for(mode))
            .timeout(self.timeout)
            .send()
            .await?;
        check_rate_limit_response(&resp)?;
        if !resp.status().is_success() {
            tracing::debug!(url = %url, status = %resp.status(), "download refused");
            return Ok(false);
        }

        write_body(resp, dest).await?;

        match self.validator.accept_or_remove(dest).await {
            Ok(()) => {
                tracing::debug!(url = %url, path = %dest.display(), "download accepted");
                Ok(true)
            }
            Err(reason) => {
                tracing::debug!(url = %url, %reason, "download rejected");
                Ok(false)
            }
        }
    }

    /// Stealth first, then plain; used for PDF-looking links found on pages.
    pub async fn fetch_either(&self, url: &str, dest: &Path) -> bool {
        for mode in [FetchMode::Stealth, FetchMode::Plain] {
            match self.fetch_to(url, dest, mode).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => tracing::debug!(url, error = %e, ?mode, "direct fetch failed"),
            }
        }
        false
    }
}

/// Stream the body into a hidden file next to `dest` and move it into place
/// once complete. An interrupted download never appears under `dest`.
async fn write_body(resp: reqwest::Response, dest: &Path) -> Result<(), SourceError> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let partial = tempfile::Builder::new()
        .prefix(".paperchase-")
        .suffix(".part")
        .tempfile_in(dir)?;
    let mut file = tokio::fs::File::from_std(partial.as_file().try_clone()?);
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    drop(file);
    partial.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_param_added_for_wiley_links() {
        assert_eq!(
            with_download_param("https://onlinelibrary.wiley.com/doi/pdfdirect/10.1002/x"),
            "https://onlinelibrary.wiley.com/doi/pdfdirect/10.1002/x?download=true"
        );
        assert_eq!(
            with_download_param("https://pubs.acs.org/doi/pdf/10.1021/x?ref=a"),
            "https://pubs.acs.org/doi/pdf/10.1021/x?ref=a&download=true"
        );
        assert_eq!(
            with_download_param("https://pubs.acs.org/doi/pdf/10.1021/x?download=false"),
            "https://pubs.acs.org/doi/pdf/10.1021/x?download=false"
        );
        assert_eq!(
            with_download_param("https://example.org/paper.pdf"),
            "https://example.org/paper.pdf"
        );
    }

    #[test]
    fn stealth_headers_carry_referrer() {
        let h = headers_for(FetchMode::Stealth);
        assert_eq!(h.get(REFERER).unwrap(), "https://www.google.com/");
        let ua = h.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(CRAWLER_USER_AGENTS.contains(&ua));
        assert!(headers_for(FetchMode::Plain).get(REFERER).is_none());
    }

    fn response_from(chunks: Vec<std::io::Result<Vec<u8>>>) -> reqwest::Response {
        let body = reqwest::Body::wrap_stream(futures_util::stream::iter(chunks));
        reqwest::Response::from(http::Response::new(body))
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn broken_stream_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("item001_10.1_a.pdf");
        let resp = response_from(vec![
            Ok(b"%PDF-1.7\n".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ]);

        assert!(write_body(resp, &dest).await.is_err());
        assert!(!dest.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn complete_body_lands_at_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("item001_10.1_a.pdf");
        let resp = response_from(vec![Ok(b"%PDF".to_vec()), Ok(b"-1.7".to_vec())]);

        write_body(resp, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.7");
        assert_eq!(leftovers(dir.path()), vec!["item001_10.1_a.pdf".to_string()]);
    }

    #[test]
    fn absolutize_forms() {
        let base = "https://www.researchgate.net/search?q=x";
        assert_eq!(
            absolutize("//cdn.example.org/a.pdf", base).unwrap(),
            "https://cdn.example.org/a.pdf"
        );
        assert_eq!(
            absolutize("/publication/1_download", base).unwrap(),
            "https://www.researchgate.net/publication/1_download"
        );
        assert_eq!(
            absolutize("https://x.org/a.pdf", base).unwrap(),
            "https://x.org/a.pdf"
        );
    }
}
