//! Mock source for testing.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Needs, Source, SourceError, SourceFuture};
use crate::ResolutionAttempt;

/// A configurable mock response for [`MockSource`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Write a `%PDF`-headed file of this many bytes and report success.
    Writes(usize),
    /// Report success without writing anything (exercises re-validation).
    ClaimsSuccess,
    /// Write this many bytes, then fail like a dropped connection.
    WritesThenFails(usize),
    /// Write this many bytes, then hang until the chain gives up.
    WritesThenStalls(usize),
    NotFound,
    RateLimited { retry_after: Option<Duration> },
    Error(String),
}

/// A hand-rolled mock implementing [`Source`].
///
/// Supports:
/// - A fixed response (used for every call), **or**
/// - A sequence of responses (one per call, repeating the fallback once exhausted).
/// - Per-item responses keyed by checklist index.
/// - Optional per-call latency.
/// - Call counting and the list of item indices seen.
pub struct MockSource {
    name: &'static str,
    needs: Needs,
    interactive: bool,
    responses: Mutex<Vec<MockResponse>>,
    per_item: Vec<(usize, MockResponse)>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    seen: Mutex<Vec<usize>>,
}

impl MockSource {
    pub fn new(name: &'static str, response: MockResponse) -> Self {
        Self {
            name,
            needs: Needs::Url,
            interactive: false,
            responses: Mutex::new(Vec::new()),
            per_item: Vec::new(),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Responses in call order; `fallback` afterwards.
    pub fn with_sequence(
        name: &'static str,
        mut responses: Vec<MockResponse>,
        fallback: MockResponse,
    ) -> Self {
        responses.reverse();
        let mock = Self::new(name, fallback);
        *mock.responses.lock().unwrap_or_else(|e| e.into_inner()) = responses;
        mock
    }

    /// Override the response for one checklist index.
    pub fn for_item(mut self, index: usize, response: MockResponse) -> Self {
        self.per_item.push((index, response));
        self
    }

    pub fn with_needs(mut self, needs: Needs) -> Self {
        self.needs = needs;
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Item indices this source was called for, in call order.
    pub fn seen(&self) -> Vec<usize> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn next_response(&self, index: usize) -> MockResponse {
        if let Some((_, r)) = self.per_item.iter().find(|(i, _)| *i == index) {
            return r.clone();
        }
        let mut seq = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

/// Bytes of a file that passes the header check.
pub fn fake_pdf_bytes(size: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(size.max(bytes.len()), b' ');
    bytes
}

impl Source for MockSource {
    fn name(&self) -> &str {
        self.name
    }

    fn needs(&self) -> Needs {
        self.needs
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn attempt<'a>(&'a self, ctx: &'a ResolutionAttempt, output: &'a Path) -> SourceFuture<'a> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ctx.index());
        let response = self.next_response(ctx.index());
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match response {
                MockResponse::Writes(size) => {
                    tokio::fs::write(output, fake_pdf_bytes(size)).await?;
                    Ok(true)
                }
                MockResponse::ClaimsSuccess => Ok(true),
                MockResponse::WritesThenFails(size) => {
                    tokio::fs::write(output, fake_pdf_bytes(size)).await?;
                    Err(SourceError::Other("connection reset".into()))
                }
                MockResponse::WritesThenStalls(size) => {
                    tokio::fs::write(output, fake_pdf_bytes(size)).await?;
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(true)
                }
                MockResponse::NotFound => Ok(false),
                MockResponse::RateLimited { retry_after } => {
                    Err(SourceError::RateLimited { retry_after })
                }
                MockResponse::Error(msg) => Err(SourceError::Other(msg)),
            }
        })
    }
}
