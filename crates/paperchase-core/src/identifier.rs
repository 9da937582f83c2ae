//! Canonical identifier extraction from reference URLs.
//!
//! Rules are tried in a fixed order and the first match wins. The same
//! identifier is used as the artifact filename component and as the
//! duplicate-registry key.

use once_cell::sync::Lazy;
use regex::Regex;

/// Which rule produced an [`Identifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Doi,
    Pmc,
    Ieee,
    Arxiv,
    ArticlePath,
    Slug,
}

/// A normalized key recognizing "the same publication".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    pub fn new(kind: IdentifierKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The DOI, if this identifier is one.
    pub fn doi(&self) -> Option<&str> {
        match self.kind {
            IdentifierKind::Doi => Some(&self.value),
            _ => None,
        }
    }

    /// The arXiv id, if this identifier is one.
    pub fn arxiv_id(&self) -> Option<&str> {
        match self.kind {
            IdentifierKind::Arxiv => Some(&self.value),
            _ => None,
        }
    }

    /// Filename-safe form (`/` → `_`). Also the deduplication key.
    pub fn file_component(&self) -> String {
        self.value.replace('/', "_")
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

static NATURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)nature\.com/articles/([a-z0-9\-]+)").unwrap());

static SSRN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ssrn\.com/(?:abstract=|sol3/papers\.cfm\?abstract_id=)(\d+)").unwrap()
});

// The registrant may be any number of digits, but the DOI must start a path
// segment or follow `:`/`=` so dotted version strings never match.
static DOI_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)doi[:/]+(10\.\d+/[^\s/]+/[^\s/]+)").unwrap(),
        Regex::new(r"(?i)(?:^|[/:=])(10\.\d+/[^\s/]+/[^\s/]+)").unwrap(),
        Regex::new(r"(?i)(?:^|[/:=])(10\.\d+/[^\s/]+)").unwrap(),
    ]
});

static DOI_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\.pdf|/pdf|/full|/abstract)$").unwrap());

static PMC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:pmc\.ncbi\.nlm\.nih\.gov|ncbi\.nlm\.nih\.gov/pmc)/articles/(PMC\d+)")
        .unwrap()
});

static IEEE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ieeexplore\.ieee\.org/(?:abstract/)?document/(\d+)").unwrap()
});

static ARXIV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)arxiv\.org/(?:abs|pdf)/(\d+\.\d+)").unwrap());

static ARTICLE_PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/article/([\d/]+)").unwrap());

static EXTENSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.(pdf|html?)$").unwrap());

static UNSAFE_CHARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-.]").unwrap());

/// Maximum length of a slug-derived identifier or filename fallback.
pub const MAX_SLUG_LEN: usize = 80;

/// Drop `?query` and `#fragment` so they never leak into a DOI match.
fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Extract a DOI from a URL, if one is present.
///
/// Publisher-specific reconstruction runs first (Nature article slugs, SSRN
/// abstract ids), then
/// the generic patterns. Suffixes that only select a different view of the
/// same paper (`.pdf`, `/pdf`, `/full`, `/abstract`) are removed.
pub fn extract_doi(url: &str) -> Option<String> {
    if let Some(caps) = NATURE_RE.captures(url) {
        return Some(format!("10.1038/{}", &caps[1]));
    }
    if let Some(caps) = SSRN_RE.captures(url) {
        return Some(format!("10.2139/ssrn.{}", &caps[1]));
    }

    let url = strip_query(url);
    for re in DOI_RES.iter() {
        if let Some(caps) = re.captures(url) {
            let mut doi = caps[1].to_string();
            while let Some(m) = DOI_SUFFIX_RE.find(&doi) {
                doi.truncate(m.start());
            }
            if doi.is_empty() {
                return None;
            }
            return Some(doi);
        }
    }
    None
}

/// Extract an arXiv id (without version suffix) from an arXiv URL.
pub fn extract_arxiv_id(url: &str) -> Option<String> {
    ARXIV_RE.captures(url).map(|c| c[1].to_string())
}

/// Sanitize a path segment into `[A-Za-z0-9_.-]`, truncated to [`MAX_SLUG_LEN`].
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned = UNSAFE_CHARS_RE.replace_all(segment, "_");
    cleaned.chars().take(MAX_SLUG_LEN).collect()
}

/// Derive the canonical identifier for a reference URL.
///
/// Pure and deterministic. Returns `None` only when no rule applies and the
/// final URL segment is too short to be meaningful.
pub fn extract(url: &str) -> Option<Identifier> {
    if let Some(doi) = extract_doi(url) {
        return Some(Identifier::new(IdentifierKind::Doi, doi));
    }
    if let Some(caps) = PMC_RE.captures(url) {
        return Some(Identifier::new(IdentifierKind::Pmc, caps[1].to_uppercase()));
    }
    if let Some(caps) = IEEE_RE.captures(url) {
        return Some(Identifier::new(IdentifierKind::Ieee, &caps[1]));
    }
    if let Some(id) = extract_arxiv_id(url) {
        return Some(Identifier::new(IdentifierKind::Arxiv, id));
    }
    if let Some(caps) = ARTICLE_PATH_RE.captures(strip_query(url)) {
        let path = caps[1].trim_matches('/');
        if !path.is_empty() {
            return Some(Identifier::new(
                IdentifierKind::ArticlePath,
                path.replace('/', "_"),
            ));
        }
    }

    let last = strip_query(url)
        .trim_end_matches('/')
        .split('/')
        .filter(|p| !p.is_empty() && *p != "http:" && *p != "https:")
        .next_back()?;
    let last = EXTENSION_RE.replace(last, "");
    if last.len() > 2 {
        return Some(Identifier::new(IdentifierKind::Slug, sanitize_segment(&last)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nature_article_reconstructs_doi() {
        let id = extract("https://www.nature.com/articles/s44160-023-00424-1").unwrap();
        assert_eq!(id.kind, IdentifierKind::Doi);
        assert_eq!(id.as_str(), "10.1038/s44160-023-00424-1");
    }

    #[test]
    fn arxiv_abs_and_pdf_agree() {
        let abs = extract("https://arxiv.org/abs/2301.00001").unwrap();
        let pdf = extract("https://arxiv.org/pdf/2301.00001v2").unwrap();
        assert_eq!(abs.kind, IdentifierKind::Arxiv);
        assert_eq!(abs.as_str(), "2301.00001");
        assert_eq!(abs, pdf);
    }

    #[test]
    fn doi_view_suffixes_normalize() {
        let plain = extract("https://pubs.acs.org/doi/10.1021/jacs.3c01234").unwrap();
        let full = extract("https://pubs.acs.org/doi/full/10.1021/jacs.3c01234").unwrap();
        let pdf = extract("https://pubs.acs.org/doi/pdf/10.1021/jacs.3c01234").unwrap();
        let abs = extract("https://onlinelibrary.wiley.com/doi/10.1021/jacs.3c01234/abstract")
            .unwrap();
        assert_eq!(plain.as_str(), "10.1021/jacs.3c01234");
        assert_eq!(plain, full);
        assert_eq!(plain, pdf);
        assert_eq!(plain, abs);
    }

    #[test]
    fn doi_pdf_extension_stripped() {
        let id = extract("https://example.org/content/10.5555/abcd.pdf").unwrap();
        assert_eq!(id.as_str(), "10.5555/abcd");
    }

    #[test]
    fn doi_query_string_ignored() {
        let id = extract("https://pubs.rsc.org/en/content/10.1039/D3TA01234A?page=search").unwrap();
        assert_eq!(id.as_str(), "10.1039/D3TA01234A");
    }

    #[test]
    fn doi_with_two_segments() {
        let id = extract("https://doi.org/10.1002/anie/202301234").unwrap();
        assert_eq!(id.as_str(), "10.1002/anie/202301234");
        assert_eq!(id.file_component(), "10.1002_anie_202301234");
    }

    #[test]
    fn arxiv_number_is_not_mistaken_for_doi() {
        let id = extract("https://arxiv.org/abs/2310.12345").unwrap();
        assert_eq!(id.kind, IdentifierKind::Arxiv);
    }

    #[test]
    fn pmc_id() {
        let id = extract("https://pmc.ncbi.nlm.nih.gov/articles/PMC11755691/").unwrap();
        assert_eq!(id.kind, IdentifierKind::Pmc);
        assert_eq!(id.as_str(), "PMC11755691");
        let legacy = extract("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC11755691/").unwrap();
        assert_eq!(id, legacy);
    }

    #[test]
    fn ieee_document_id() {
        let id = extract("https://ieeexplore.ieee.org/document/10480223/").unwrap();
        assert_eq!(id.kind, IdentifierKind::Ieee);
        assert_eq!(id.as_str(), "10480223");
    }

    #[test]
    fn article_path_slug() {
        let id = extract("https://www.example-journal.org/article/5/478/").unwrap();
        assert_eq!(id.kind, IdentifierKind::ArticlePath);
        assert_eq!(id.as_str(), "5_478");
    }

    #[test]
    fn last_segment_fallback() {
        let id = extract("https://repository.example.edu/items/solar-storage-review.html?x=1")
            .unwrap();
        assert_eq!(id.kind, IdentifierKind::Slug);
        assert_eq!(id.as_str(), "solar-storage-review");
    }

    #[test]
    fn fallback_is_sanitized_and_bounded() {
        let long = format!("https://example.com/{}", "a b".repeat(60));
        let id = extract(&long).unwrap();
        assert!(!id.as_str().contains(' '));
        assert_eq!(id.as_str().len(), MAX_SLUG_LEN);
    }

    #[test]
    fn too_short_segment_gives_none() {
        assert!(extract("https://example.com/ab").is_none());
    }

    #[test]
    fn deterministic() {
        let url = "https://www.science.org/doi/10.1126/science.abq1234";
        assert_eq!(extract(url), extract(url));
    }

    #[test]
    fn short_registrant_doi() {
        let a = extract("https://doi.org/10.1/a").unwrap();
        assert_eq!(a.kind, IdentifierKind::Doi);
        assert_eq!(a.as_str(), "10.1/a");
        assert_eq!(a.file_component(), "10.1_a");
        assert_eq!(extract("https://journal.org/doi/pdf/10.1/x").unwrap().as_str(), "10.1/x");
        assert_eq!(extract_doi("doi:10.12/xyz"), Some("10.12/xyz".into()));
    }

    #[test]
    fn dotted_version_is_not_a_doi() {
        assert_eq!(extract_doi("https://example.com/release-v2.10.3/notes"), None);
        assert_eq!(extract_doi("https://example.com/docs/3.10.1/guide"), None);
    }

    #[test]
    fn ssrn_abstract_reconstructs_doi() {
        let id = extract("https://papers.ssrn.com/sol3/papers.cfm?abstract_id=4412345").unwrap();
        assert_eq!(id.as_str(), "10.2139/ssrn.4412345");
        assert_eq!(extract("https://ssrn.com/abstract=4412345").unwrap(), id);
    }

    #[test]
    fn doi_accessor_only_for_doi_kind() {
        assert!(extract("https://arxiv.org/abs/2301.00001").unwrap().doi().is_none());
        assert_eq!(
            extract("https://doi.org/10.1038/nature12373").unwrap().doi(),
            Some("10.1038/nature12373")
        );
    }
}
