//! Ranking of on-page interactive elements against a vision description.
//!
//! The describer looks at a screenshot and says, in words, which control is
//! the real "download PDF" button. [`rank`] turns that into an ordered list
//! of DOM candidates to try. Scoring is additive over independent signals:
//!
//! | signal | points |
//! |---|---|
//! | text: exact / case-insensitive exact / contains (first that holds) | 100 / 95 / 60 |
//! | more than half of the description's significant words present | 40 |
//! | `pdf` in both texts, `download` in both texts | 30, 25 |
//! | `pdf` in href | 20 |
//! | same site (or relative href) / academic resolver | 30 / 5 |
//! | `/article/`, `/doi/` or `/pdf` in href | 25 |
//! | each distinctive feature in classes / href / title | 15 / 15 / 10 |
//! | a `pdf` feature and `pdf` in the text | 10 |
//! | position hint satisfied (first region that holds) | 40 |
//! | toolbar or header band, near the title | 50, 45 |
//! | strong position match (position points above 30) | 30 |
//!
//! A link to any other site that is not an academic resolver is disqualified
//! outright. Candidates at or below [`MIN_SCORE`] are dropped.

use serde::{Deserialize, Serialize};
use url::Url;

/// Candidates must score strictly above this to be tried.
pub const MIN_SCORE: i32 = 10;

/// Applied to off-site links. Large enough that no combination of bonuses
/// brings the candidate back above zero.
pub const EXTERNAL_DOMAIN_PENALTY: i32 = -1000;

/// Identifier resolvers that may legitimately live on another site.
pub const ACADEMIC_DOMAINS: &[&str] = &[
    "doi.org",
    "arxiv.org",
    "pubmed.ncbi.nlm.nih.gov",
    "pmc.ncbi.nlm.nih.gov",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl From<String> for Confidence {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// What the vision model says the download control looks like.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionDescription {
    pub element_text: String,
    pub visual_description: String,
    /// Free text such as `"top right"`, `"toolbar"` or `"below title"`.
    pub position: String,
    pub distinctive_features: Vec<String>,
    pub confidence: Confidence,
}

/// Element center relative to the viewport; both axes in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A visible link or button captured from the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CandidateElement {
    /// Position in the page snapshot; used to click the element back.
    pub id: usize,
    pub visible_text: String,
    pub aria_label: String,
    /// Raw `class` attribute.
    pub classes: String,
    /// Raw `href` attribute; may be relative or empty.
    pub href: String,
    pub title: String,
    pub center: Option<Point>,
}

impl CandidateElement {
    /// Visible text, or the ARIA label for icon-only controls.
    pub fn label(&self) -> &str {
        let text = self.visible_text.trim();
        if text.is_empty() {
            self.aria_label.trim()
        } else {
            text
        }
    }

    /// Host the href points at; `None` for relative or non-http targets.
    pub fn target_host(&self) -> Option<String> {
        let href = self.href.trim();
        if href.starts_with("//") {
            return Url::parse(&format!("https:{}", href))
                .ok()
                .and_then(|u| u.host_str().map(str::to_lowercase));
        }
        Url::parse(href)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .and_then(|u| u.host_str().map(str::to_lowercase))
    }
}

/// Last two labels of a host: `www.journal.org` → `journal.org`.
pub fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.trim_end_matches('.').split('.').collect();
    let start = labels.len().saturating_sub(2);
    labels[start..].join(".").to_lowercase()
}

pub fn is_academic_host(host: &str) -> bool {
    ACADEMIC_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

fn significant_words(text: &str) -> std::collections::HashSet<String> {
    text.split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Points for the element's text against the description's text.
fn text_score(label: &str, wanted: &str) -> i32 {
    let mut score = 0;
    let label_lower = label.to_lowercase();
    let wanted_lower = wanted.to_lowercase();

    if !wanted.is_empty() {
        if label == wanted {
            score += 100;
        } else if label_lower == wanted_lower {
            score += 95;
        } else if label_lower.contains(&wanted_lower) {
            score += 60;
        }
    }

    let wanted_words = significant_words(wanted);
    let label_words = significant_words(label);
    if !wanted_words.is_empty() && !label_words.is_empty() {
        let shared = wanted_words.intersection(&label_words).count();
        if shared as f64 / wanted_words.len() as f64 > 0.5 {
            score += 40;
        }
    }

    if wanted_lower.contains("pdf") && label_lower.contains("pdf") {
        score += 30;
    }
    if wanted_lower.contains("download") && label_lower.contains("download") {
        score += 25;
    }
    score
}

fn position_score(center: Point, hint: &str) -> i32 {
    let Point { x, y } = center;
    let has = |w: &str| hint.contains(w);

    let mut score = 0;
    if (has("top") || has("above")) && y < 0.3
        || (has("bottom") || has("below")) && y > 0.7
        || has("right") && x > 0.7
        || has("left") && x < 0.3
        || (has("center") || has("middle")) && (0.3..0.7).contains(&x) && (0.3..0.7).contains(&y)
    {
        score += 40;
    }
    if (has("toolbar") || has("header") || has("below title")) && y < 0.2 {
        score += 50;
    }
    if (has("below title") || has("near title")) && y < 0.3 {
        score += 45;
    }
    if score > 30 {
        score += 30;
    }
    score
}

/// Score one element. `page_host` is the host of the page it was found on.
pub fn score(element: &CandidateElement, description: &VisionDescription, page_host: Option<&str>) -> i32 {
    let label = element.label();
    let label_lower = label.to_lowercase();
    let href = element.href.trim().to_lowercase();
    let classes = element.classes.to_lowercase();
    let title = element.title.to_lowercase();

    let mut score = text_score(label, description.element_text.trim());

    if href.contains("pdf") {
        score += 20;
    }

    if !href.is_empty() {
        if let Some(page_host) = page_host {
            let page_base = registrable_domain(page_host);
            match element.target_host() {
                Some(host) if registrable_domain(&host) != page_base => {
                    if !is_academic_host(&host) {
                        return score + EXTERNAL_DOMAIN_PENALTY;
                    }
                    score += 5;
                }
                _ => score += 30,
            }
        }

        if href.contains("/article/") || href.contains("/doi/") || href.contains("/pdf") {
            score += 25;
        }
    }

    for feature in &description.distinctive_features {
        let feature = feature.trim().to_lowercase();
        if feature.is_empty() {
            continue;
        }
        if classes.contains(&feature) {
            score += 15;
        }
        if href.contains(&feature) {
            score += 15;
        }
        if title.contains(&feature) {
            score += 10;
        }
        if feature.contains("pdf") && label_lower.contains("pdf") {
            score += 10;
        }
    }

    let hint = description.position.trim().to_lowercase();
    if let (false, Some(center)) = (hint.is_empty(), element.center) {
        score += position_score(center, &hint);
    }

    score
}

/// Candidates worth trying, best first. Equal scores keep page order.
pub fn rank<'a>(
    candidates: &'a [CandidateElement],
    description: &VisionDescription,
    page_host: Option<&str>,
) -> Vec<(i32, &'a CandidateElement)> {
    let mut ranked: Vec<(i32, &CandidateElement)> = candidates
        .iter()
        .map(|c| (score(c, description, page_host), c))
        .filter(|(s, _)| *s > MIN_SCORE)
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked
}
