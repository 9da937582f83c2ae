//! Bibliographic metadata lookup used by title-based sources.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::fetch::send_json;
use crate::rate_limit::RateLimiters;
use crate::source::SourceError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaperMetadata {
    pub title: Option<String>,
    /// First three authors, `"Given Family"`, joined with `", "`.
    pub authors: Option<String>,
}

pub type MetadataFuture<'a> =
    Pin<Box<dyn Future<Output = Result<PaperMetadata, SourceError>> + Send + 'a>>;

pub trait MetadataLookup: Send + Sync {
    fn lookup<'a>(&'a self, doi: &'a str) -> MetadataFuture<'a>;
}

/// CrossRef `works/{doi}`.
pub struct CrossRef {
    client: reqwest::Client,
    mailto: Option<String>,
    timeout: Duration,
    rate_limiters: Arc<RateLimiters>,
}

impl CrossRef {
    pub fn new(
        client: reqwest::Client,
        mailto: Option<String>,
        timeout: Duration,
        rate_limiters: Arc<RateLimiters>,
    ) -> Self {
        Self {
            client,
            mailto,
            timeout,
            rate_limiters,
        }
    }
}

/// Pull title and the first three authors out of a CrossRef work message.
pub fn parse_work(data: &serde_json::Value) -> PaperMetadata {
    let message = &data["message"];
    let title = message["title"]
        .as_array()
        .and_then(|a| a.first())
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let authors = message["author"].as_array().and_then(|arr| {
        let names: Vec<String> = arr
            .iter()
            .take(3)
            .map(|a| {
                let given = a["given"].as_str().unwrap_or("");
                let family = a["family"].as_str().unwrap_or("");
                format!("{} {}", given, family).trim().to_string()
            })
            .filter(|n| !n.is_empty())
            .collect();
        (!names.is_empty()).then(|| names.join(", "))
    });

    PaperMetadata { title, authors }
}

impl MetadataLookup for CrossRef {
    fn lookup<'a>(&'a self, doi: &'a str) -> MetadataFuture<'a> {
        Box::pin(async move {
            if let Some(lim) = self.rate_limiters.get("CrossRef") {
                lim.acquire().await;
            }

            let mut url = format!("https://api.crossref.org/works/{}", doi);
            let user_agent = if let Some(ref email) = self.mailto {
                url.push_str(&format!("?mailto={}", urlencoding::encode(email)));
                format!("paperchase/0.1 (mailto:{})", email)
            } else {
                "paperchase/0.1".to_string()
            };

            let req = self
                .client
                .get(&url)
                .header("User-Agent", user_agent)
                .timeout(self.timeout);
            match send_json(req).await {
                Ok(data) => Ok(parse_work(&data)),
                Err(SourceError::RateLimited { retry_after }) => {
                    if let Some(lim) = self.rate_limiters.get("CrossRef") {
                        lim.on_rate_limited(retry_after);
                    }
                    Err(SourceError::RateLimited { retry_after })
                }
                Err(e) => Err(e),
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Lookup returning fixed metadata and counting calls.
    pub struct FixedMetadata {
        pub meta: PaperMetadata,
        pub calls: AtomicUsize,
    }

    impl FixedMetadata {
        pub fn titled(title: &str) -> Self {
            Self {
                meta: PaperMetadata {
                    title: Some(title.to_string()),
                    authors: Some("A. Author".into()),
                },
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl MetadataLookup for FixedMetadata {
        fn lookup<'a>(&'a self, _doi: &'a str) -> MetadataFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let meta = self.meta.clone();
            Box::pin(async move { Ok(meta) })
        }
    }

    #[test]
    fn first_title_and_three_authors() {
        let data = json!({"message": {
            "title": ["Solid-state batteries  "],
            "author": [
                {"given": "Ada", "family": "Lovelace"},
                {"family": "Babbage"},
                {"given": "Grace", "family": "Hopper"},
                {"given": "Alan", "family": "Turing"}
            ]
        }});
        let meta = parse_work(&data);
        assert_eq!(meta.title.as_deref(), Some("Solid-state batteries"));
        assert_eq!(
            meta.authors.as_deref(),
            Some("Ada Lovelace, Babbage, Grace Hopper")
        );
    }

    #[test]
    fn missing_fields() {
        let meta = parse_work(&json!({"message": {"title": []}}));
        assert_eq!(meta, PaperMetadata::default());
    }
}
