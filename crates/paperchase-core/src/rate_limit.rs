//! Request pacing for remote sources.
//!
//! Each remote source owns one governor. The chain waits on it before every
//! attempt. A 429 never triggers a retry here: the source's pace is
//! stretched (honoring `Retry-After` when the server sends one) and the chain
//! simply moves on to the next source. A minute without 429s restores the
//! configured pace.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::source::SourceError;

type Governor = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const MAX_SLOWDOWN: u32 = 16;
const RECOVER_AFTER: Duration = Duration::from_secs(60);
/// Wait assumed for a `Retry-After` given as an HTTP date.
const DATE_RETRY_WAIT: Duration = Duration::from_secs(5);

/// Steady pace of a source when it is not being throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    PerSecond(u32),
    /// One request per interval, for sources slower than 1/s.
    Every(Duration),
}

impl Pace {
    fn interval(self) -> Duration {
        match self {
            Pace::PerSecond(n) => Duration::from_secs(1) / n.max(1),
            Pace::Every(d) => d,
        }
    }
}

fn governor(interval: Duration) -> Arc<Governor> {
    let quota = Quota::with_period(interval).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
    Arc::new(Governor::direct(quota))
}

#[derive(Debug, Default)]
struct Throttle {
    /// Multiplier on the base interval; 1 when unthrottled.
    slowdown: u32,
    /// Server-requested floor for the interval.
    floor: Option<Duration>,
    last_hit: Option<Instant>,
}

/// A governor whose interval stretches on 429 and recovers when quiet.
pub struct AdaptiveLimiter {
    governor: ArcSwap<Governor>,
    base: Duration,
    throttle: Mutex<Throttle>,
}

impl AdaptiveLimiter {
    pub fn new(pace: Pace) -> Self {
        let base = pace.interval();
        Self {
            governor: ArcSwap::new(governor(base)),
            base,
            throttle: Mutex::new(Throttle {
                slowdown: 1,
                ..Default::default()
            }),
        }
    }

    fn throttle(&self) -> std::sync::MutexGuard<'_, Throttle> {
        self.throttle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Interval currently enforced.
    pub fn interval(&self) -> Duration {
        let t = self.throttle();
        let scaled = self.base.saturating_mul(t.slowdown);
        t.floor.map_or(scaled, |f| scaled.max(f))
    }

    pub fn slowdown(&self) -> u32 {
        self.throttle().slowdown
    }

    /// Wait for permission to send one request.
    pub async fn acquire(&self) {
        self.recover_if_quiet();
        let governor = self.governor.load_full();
        governor.until_ready().await;
    }

    /// Record a 429: double the slowdown (capped) and respect `retry_after`.
    pub fn on_rate_limited(&self, retry_after: Option<Duration>) {
        {
            let mut t = self.throttle();
            t.slowdown = (t.slowdown * 2).min(MAX_SLOWDOWN);
            t.floor = retry_after.max(t.floor);
            t.last_hit = Some(Instant::now());
        }
        let interval = self.interval();
        tracing::debug!(interval = ?interval, "source pace stretched");
        self.governor.store(governor(interval));
    }

    fn recover_if_quiet(&self) {
        let mut t = self.throttle();
        let quiet = t.last_hit.is_some_and(|at| at.elapsed() >= RECOVER_AFTER);
        if quiet && t.slowdown > 1 {
            *t = Throttle {
                slowdown: 1,
                ..Default::default()
            };
            self.governor.store(governor(self.base));
        }
    }
}

/// Default pace of every remote source. Sources that only touch the
/// reference's own publisher (direct URL, open-access patterns, browser)
/// are unpaced.
fn source_paces(crossref_polite: bool, s2_keyed: bool) -> Vec<(&'static str, Pace)> {
    vec![
        // 1/s anonymous, 3/s in the polite pool
        ("CrossRef", Pace::PerSecond(if crossref_polite { 3 } else { 1 })),
        ("Unpaywall", Pace::PerSecond(5)),
        ("OpenAlex", Pace::PerSecond(10)),
        ("CORE", Pace::PerSecond(1)),
        // keyless quota is roughly 100 requests per 5 minutes
        (
            "Semantic Scholar",
            if s2_keyed {
                Pace::PerSecond(1)
            } else {
                Pace::Every(Duration::from_secs(3))
            },
        ),
        ("BASE", Pace::PerSecond(5)),
        ("OpenAIRE", Pace::PerSecond(2)),
        ("DOAJ", Pace::PerSecond(2)),
        ("ResearchGate", Pace::PerSecond(1)),
        ("12ft", Pace::PerSecond(1)),
        ("Sci-Hub", Pace::PerSecond(1)),
        ("Google Scholar", Pace::Every(Duration::from_secs(5))),
    ]
}

/// One [`AdaptiveLimiter`] per remote source, looked up by source name.
pub struct RateLimiters {
    by_source: HashMap<&'static str, AdaptiveLimiter>,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl RateLimiters {
    pub fn new(has_crossref_mailto: bool, has_s2_api_key: bool) -> Self {
        let by_source = source_paces(has_crossref_mailto, has_s2_api_key)
            .into_iter()
            .map(|(name, pace)| (name, AdaptiveLimiter::new(pace)))
            .collect();
        Self { by_source }
    }

    pub fn get(&self, source_name: &str) -> Option<&AdaptiveLimiter> {
        self.by_source.get(source_name)
    }
}

/// `Err(RateLimited)` for a 429, carrying any `Retry-After` hint.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), SourceError> {
    if resp.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Ok(());
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    Err(SourceError::RateLimited { retry_after })
}

/// Delta-seconds are taken as given; an HTTP date maps to a short fixed wait.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        Some(Duration::from_secs(secs))
    } else if value.ends_with("GMT") {
        Some(DATE_RETRY_WAIT)
    } else {
        None
    }
}
