//! The human-editable checklist ledger.
//!
//! Each row looks like `12. [ ] https://...` (or `[x]` once resolved).
//! Other lines (headings, notes, blank lines) are carried through untouched.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::ReferenceItem;

static ROW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+)\.\s*\[\s*(x?)\s*\]\s*(https?://\S+)").unwrap());

static UNCHECKED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\.\s*(\[\s*\])").unwrap());

#[derive(Error, Debug)]
pub enum ChecklistError {
    #[error("checklist not found: {0}")]
    NotFound(PathBuf),
    #[error("checklist {path} has no parseable rows")]
    Empty { path: PathBuf },
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse one line into a row, if it is one.
pub fn parse_line(line: &str) -> Option<ReferenceItem> {
    let caps = ROW_RE.captures(line.trim())?;
    Some(ReferenceItem {
        index: caps[1].parse().ok()?,
        checked: caps[2].eq_ignore_ascii_case("x"),
        url: caps[3].to_string(),
    })
}

pub fn parse_str(content: &str) -> Vec<ReferenceItem> {
    content.lines().filter_map(parse_line).collect()
}

/// Check the box on the row numbered `index` when it is empty. Returns the
/// new content when a row changed. Every other byte is preserved.
pub fn mark_in_str(content: &str, index: usize) -> Option<String> {
    let mut changed = false;
    let mut out = String::with_capacity(content.len() + 1);
    for line in content.split_inclusive('\n') {
        if !changed
            && let Some(caps) = UNCHECKED_RE.captures(line)
            && caps[1].parse::<usize>().ok() == Some(index)
        {
            let bracket = caps.get(2).map(|m| m.range()).unwrap_or(0..0);
            out.push_str(&line[..bracket.start]);
            out.push_str("[x]");
            out.push_str(&line[bracket.end..]);
            changed = true;
            continue;
        }
        out.push_str(line);
    }
    changed.then_some(out)
}

/// Checklist file plus the lock every writer goes through.
pub struct ChecklistStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ChecklistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> ChecklistError {
        ChecklistError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read every row. A missing file or a file without rows is an error.
    pub fn parse(&self) -> Result<Vec<ReferenceItem>, ChecklistError> {
        if !self.path.exists() {
            return Err(ChecklistError::NotFound(self.path.clone()));
        }
        let content = {
            let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            std::fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?
        };
        let items = parse_str(&content);
        if items.is_empty() {
            return Err(ChecklistError::Empty {
                path: self.path.clone(),
            });
        }
        Ok(items)
    }

    /// Mark row `index` as checked. Returns `false` if the row was already
    /// checked or does not exist.
    ///
    /// The whole read-modify-write happens under the store lock and the new
    /// content replaces the file through a rename, so readers see either the
    /// old or the new file, never a torn one.
    pub fn mark_checked(&self, index: usize) -> Result<bool, ChecklistError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        let Some(updated) = mark_in_str(&content, index) else {
            return Ok(false);
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(updated.as_bytes())
            .and_then(|_| tmp.flush())
            .map_err(|e| self.io_err(e))?;
        // The temp file is created 0600; keep the checklist's own mode.
        let permissions = std::fs::metadata(&self.path)
            .map_err(|e| self.io_err(e))?
            .permissions();
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        tracing::debug!(index, path = %self.path.display(), "checklist row marked");
        Ok(true)
    }
}
