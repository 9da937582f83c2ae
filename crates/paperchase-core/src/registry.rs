//! Process-wide map from identifier to the item that owns its artifact.
//!
//! An identifier is either resolved (an artifact exists, owned by the first
//! item that produced it) or claimed by an item that is currently running
//! sources for it. A second item with the same identifier is stubbed in the
//! first case and waits for the claim to settle in the second, so two items
//! can never both become the original.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::watch;

use crate::artifact::{parse_artifact_name, write_stub};
use crate::identifier::Identifier;
use crate::validator::ArtifactValidator;

enum Slot {
    Resolved(usize),
    InFlight {
        owner: usize,
        done: watch::Receiver<bool>,
        notify: watch::Sender<bool>,
    },
}

/// What [`DuplicateRegistry::claim`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Caller now owns the identifier and should resolve it.
    Owner,
    /// Caller already owned it (resumed or re-entered).
    AlreadyOwner,
    /// Another item resolved it first.
    DuplicateOf(usize),
}

pub struct DuplicateRegistry {
    output_dir: PathBuf,
    entries: Mutex<HashMap<String, Slot>>,
}

impl DuplicateRegistry {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Build a registry from `item{N}_{key}.pdf` files already in `output_dir`.
    ///
    /// Only files the validator accepts count; anything else is a leftover
    /// of an interrupted run and is deleted. When several files share a key
    /// the lowest index wins. Unreadable directories yield an empty registry.
    pub async fn scan(output_dir: impl Into<PathBuf>, validator: &ArtifactValidator) -> Self {
        let registry = Self::new(output_dir);
        let mut names: Vec<String> = match std::fs::read_dir(&registry.output_dir) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) => {
                tracing::debug!(dir = %registry.output_dir.display(), error = %e, "no output directory to scan");
                Vec::new()
            }
        };
        names.sort();

        let mut found = Vec::new();
        for name in &names {
            let Some((index, key)) = parse_artifact_name(name) else {
                continue;
            };
            let path = registry.output_dir.join(name);
            match validator.accept_or_remove(&path).await {
                Ok(()) => found.push((index, key)),
                Err(reason) => {
                    tracing::warn!(file = %name, %reason, "discarded invalid artifact from an earlier run");
                }
            }
        }

        {
            let mut entries = registry.lock();
            for (index, key) in found {
                let lower_known = matches!(
                    entries.get(&key),
                    Some(Slot::Resolved(existing)) if *existing <= index
                );
                if !lower_known {
                    entries.insert(key, Slot::Resolved(index));
                }
            }
            tracing::debug!(count = entries.len(), "registry initialized from disk");
        }
        registry
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(identifier: &Identifier) -> String {
        identifier.file_component()
    }

    /// The item recorded as the resolved original for `identifier`, if any.
    pub fn original_of(&self, identifier: &Identifier) -> Option<usize> {
        match self.lock().get(&Self::key(identifier)) {
            Some(Slot::Resolved(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically decide whether `index` resolves `identifier` or is a
    /// duplicate, waiting while another item holds the claim.
    pub async fn claim(&self, identifier: &Identifier, index: usize) -> Claim {
        let key = Self::key(identifier);
        loop {
            let mut waiter = {
                let mut entries = self.lock();
                match entries.get(&key) {
                    Some(Slot::Resolved(orig)) if *orig == index => return Claim::AlreadyOwner,
                    Some(Slot::Resolved(orig)) => return Claim::DuplicateOf(*orig),
                    Some(Slot::InFlight { owner, .. }) if *owner == index => {
                        return Claim::AlreadyOwner;
                    }
                    Some(Slot::InFlight { done, .. }) => done.clone(),
                    None => {
                        let (notify, done) = watch::channel(false);
                        entries.insert(
                            key,
                            Slot::InFlight {
                                owner: index,
                                done,
                                notify,
                            },
                        );
                        return Claim::Owner;
                    }
                }
            };
            tracing::debug!(index, identifier = %identifier, "waiting for in-flight claim");
            // Sender dropped means the claim was released or resolved.
            let _ = waiter.wait_for(|done| *done).await;
        }
    }

    /// Returns `true` when `index` is a duplicate; a stub referencing the
    /// original has then been written and the caller must skip all sources.
    /// Otherwise the caller now owns the identifier and must eventually call
    /// [`register`](Self::register) or [`release`](Self::release).
    pub async fn check_and_stub(&self, identifier: &Identifier, index: usize) -> std::io::Result<bool> {
        match self.claim(identifier, index).await {
            Claim::Owner | Claim::AlreadyOwner => Ok(false),
            Claim::DuplicateOf(original) => {
                let path = write_stub(&self.output_dir, index, original, identifier)?;
                tracing::info!(index, original, identifier = %identifier, stub = %path.display(), "duplicate");
                Ok(true)
            }
        }
    }

    /// Record `index` as the original for `identifier`. No-op when already
    /// resolved by some item; wakes any waiters.
    pub fn register(&self, identifier: &Identifier, index: usize) {
        let key = Self::key(identifier);
        let mut entries = self.lock();
        match entries.get(&key) {
            Some(Slot::Resolved(_)) => {}
            Some(Slot::InFlight { notify, .. }) => {
                let _ = notify.send(true);
                entries.insert(key, Slot::Resolved(index));
            }
            None => {
                entries.insert(key, Slot::Resolved(index));
            }
        }
    }

    /// Drop an in-flight claim held by `index` after its resolution failed,
    /// letting the next waiter try its own sources.
    pub fn release(&self, identifier: &Identifier, index: usize) {
        let key = Self::key(identifier);
        let mut entries = self.lock();
        if let Some(Slot::InFlight { owner, notify, .. }) = entries.get(&key)
            && *owner == index
        {
            let _ = notify.send(true);
            entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::extract;
    use crate::source::mock::fake_pdf_bytes;
    use crate::validator::tests::FixedPages;
    use std::sync::Arc;

    fn doi(s: &str) -> Identifier {
        extract(&format!("https://doi.org/{}", s)).unwrap()
    }

    #[tokio::test]
    async fn first_claim_owns_then_duplicates_are_stubbed() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DuplicateRegistry::new(dir.path());
        let id = doi("10.1/a");

        assert!(!reg.check_and_stub(&id, 1).await.unwrap());
        reg.register(&id, 1);
        assert!(reg.check_and_stub(&id, 2).await.unwrap());

        let stub = dir.path().join("item002_duplicate_of_item001");
        let body = std::fs::read_to_string(stub).unwrap();
        assert!(body.contains("item 001"));
        assert!(body.contains("10.1/a"));
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DuplicateRegistry::new(dir.path());
        let id = doi("10.1/a");
        reg.register(&id, 4);
        reg.register(&id, 9);
        assert_eq!(reg.original_of(&id), Some(4));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn owner_rechecking_is_not_a_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DuplicateRegistry::new(dir.path());
        let id = doi("10.1/a");
        reg.register(&id, 3);
        assert!(!reg.check_and_stub(&id, 3).await.unwrap());
    }

    #[tokio::test]
    async fn waiter_becomes_duplicate_when_owner_registers() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Arc::new(DuplicateRegistry::new(dir.path()));
        let id = doi("10.1/a");
        assert_eq!(reg.claim(&id, 1).await, Claim::Owner);

        let waiter = {
            let reg = reg.clone();
            let id = id.clone();
            tokio::spawn(async move { reg.claim(&id, 2).await })
        };
        tokio::task::yield_now().await;
        reg.register(&id, 1);
        assert_eq!(waiter.await.unwrap(), Claim::DuplicateOf(1));
    }

    #[tokio::test]
    async fn waiter_takes_over_when_owner_releases() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Arc::new(DuplicateRegistry::new(dir.path()));
        let id = doi("10.1/a");
        assert_eq!(reg.claim(&id, 1).await, Claim::Owner);

        let waiter = {
            let reg = reg.clone();
            let id = id.clone();
            tokio::spawn(async move { reg.claim(&id, 2).await })
        };
        tokio::task::yield_now().await;
        reg.release(&id, 1);
        assert_eq!(waiter.await.unwrap(), Claim::Owner);
    }

    #[tokio::test]
    async fn release_by_non_owner_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DuplicateRegistry::new(dir.path());
        let id = doi("10.1/a");
        assert_eq!(reg.claim(&id, 1).await, Claim::Owner);
        reg.release(&id, 7);
        assert_eq!(reg.claim(&id, 1).await, Claim::AlreadyOwner);
    }

    #[tokio::test]
    async fn concurrent_claims_produce_exactly_one_owner() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Arc::new(DuplicateRegistry::new(dir.path()));
        let id = doi("10.1/shared");

        let mut handles = Vec::new();
        for index in 1..=8 {
            let reg = reg.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let dup = reg.check_and_stub(&id, index).await.unwrap();
                if !dup {
                    tokio::task::yield_now().await;
                    reg.register(&id, index);
                }
                dup
            }));
        }
        let mut originals = 0;
        for h in handles {
            if !h.await.unwrap() {
                originals += 1;
            }
        }
        assert_eq!(originals, 1);
    }

    fn validator() -> ArtifactValidator {
        ArtifactValidator::new(Arc::new(FixedPages(Some(2))))
    }

    #[tokio::test]
    async fn scan_reconstructs_lowest_index_per_key() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "item012_10.1038_s44160-023-00424-1.pdf",
            "item004_10.1038_s44160-023-00424-1.pdf",
            "item007_2301.00001.pdf",
        ] {
            std::fs::write(dir.path().join(name), fake_pdf_bytes(60_000)).unwrap();
        }
        for name in ["item009_duplicate_of_item004", "item003_vision_top.png", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let reg = DuplicateRegistry::scan(dir.path(), &validator()).await;
        assert_eq!(reg.len(), 2);
        let nature = extract("https://www.nature.com/articles/s44160-023-00424-1").unwrap();
        assert_eq!(reg.original_of(&nature), Some(4));
        let arxiv = extract("https://arxiv.org/abs/2301.00001").unwrap();
        assert_eq!(reg.original_of(&arxiv), Some(7));
        // non-artifact files are left alone
        assert!(dir.path().join("item009_duplicate_of_item004").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn scan_discards_truncated_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("item001_10.1_a.pdf");
        std::fs::write(&partial, fake_pdf_bytes(4_000)).unwrap();
        std::fs::write(dir.path().join("item002_10.1_a.pdf"), fake_pdf_bytes(60_000)).unwrap();

        let reg = DuplicateRegistry::scan(dir.path(), &validator()).await;

        assert!(!partial.exists());
        // the valid copy owns the identifier, not the truncated lower index
        assert_eq!(reg.original_of(&doi("10.1/a")), Some(2));
    }

    #[tokio::test]
    async fn scan_of_missing_dir_is_empty() {
        let reg = DuplicateRegistry::scan("/nonexistent/paperchase/output", &validator()).await;
        assert!(reg.is_empty());
    }
}
