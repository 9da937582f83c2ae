//! On-disk naming conventions for artifacts, duplicate stubs and screenshots.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::identifier::{Identifier, sanitize_segment};

static ARTIFACT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^item(\d+)_(.+)\.pdf$").unwrap());

/// Sanitized last URL segment, used when no identifier could be extracted.
pub fn sanitize_url_name(url: &str) -> String {
    let name = url.rsplit('/').next().unwrap_or("");
    let name = if name.to_ascii_lowercase().ends_with(".pdf") {
        &name[..name.len() - 4]
    } else {
        name
    };
    sanitize_segment(name)
}

/// `item{index:03}_{identifier}.pdf`, falling back to a URL-derived name and
/// finally to `item{index:03}.pdf`.
pub fn artifact_file_name(index: usize, url: &str, identifier: Option<&Identifier>) -> String {
    if let Some(id) = identifier {
        return format!("item{:03}_{}.pdf", index, id.file_component());
    }
    let sanitized = sanitize_url_name(url);
    if !sanitized.is_empty() {
        return format!("item{:03}_{}.pdf", index, sanitized);
    }
    format!("item{:03}.pdf", index)
}

pub fn artifact_path(
    output_dir: &Path,
    index: usize,
    url: &str,
    identifier: Option<&Identifier>,
) -> PathBuf {
    output_dir.join(artifact_file_name(index, url, identifier))
}

pub fn stub_file_name(index: usize, original: usize) -> String {
    format!("item{:03}_duplicate_of_item{:03}", index, original)
}

/// Write the marker recorded in place of a duplicate download.
pub fn write_stub(
    output_dir: &Path,
    index: usize,
    original: usize,
    identifier: &Identifier,
) -> std::io::Result<PathBuf> {
    let path = output_dir.join(stub_file_name(index, original));
    std::fs::write(
        &path,
        format!("Duplicate of item {:03}\nIdentifier: {}\n", original, identifier),
    )?;
    Ok(path)
}

/// Which part of the page a screenshot was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotRegion {
    Top,
    Bottom,
}

impl ScreenshotRegion {
    pub fn as_str(self) -> &'static str {
        match self {
            ScreenshotRegion::Top => "top",
            ScreenshotRegion::Bottom => "bottom",
        }
    }
}

pub fn screenshot_path(output_dir: &Path, index: usize, region: ScreenshotRegion) -> PathBuf {
    output_dir.join(format!("item{:03}_vision_{}.png", index, region.as_str()))
}

/// True when both diagnostic screenshots for `index` are already on disk.
pub fn has_screenshots(output_dir: &Path, index: usize) -> bool {
    screenshot_path(output_dir, index, ScreenshotRegion::Top).exists()
        && screenshot_path(output_dir, index, ScreenshotRegion::Bottom).exists()
}

/// Parse `item{index}_{key}.pdf` back into `(index, key)`.
pub fn parse_artifact_name(file_name: &str) -> Option<(usize, String)> {
    let caps = ARTIFACT_NAME_RE.captures(file_name)?;
    let index = caps[1].parse().ok()?;
    Some((index, caps[2].to_string()))
}
