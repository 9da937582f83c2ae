//! Two-phase driver: every pending row through the fast sources, then the
//! leftovers through the browser with a smaller pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::artifact::{artifact_path, has_screenshots};
use crate::chain::SourceChain;
use crate::checklist::ChecklistStore;
use crate::identifier::Identifier;
use crate::pool::WorkerPool;
use crate::registry::DuplicateRegistry;
use crate::{Config, CoreError, Phase, ProgressEvent, ProgressFn, ReferenceItem, ResolutionAttempt};

/// Totals for one run. Every pending row lands in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Unchecked rows inside the requested range.
    pub pending: usize,
    pub phase1_resolved: usize,
    pub phase2_resolved: usize,
    /// Rows stubbed as duplicates of another row.
    pub duplicates: usize,
    /// Rows whose valid artifact was already on disk.
    pub existing: usize,
    /// Rows whose screenshots were captured (or already present) in
    /// screenshots-only mode.
    pub screenshots: usize,
    /// Still unchecked after both phases, ascending.
    pub unresolved: Vec<usize>,
    pub cancelled: bool,
}

impl RunReport {
    /// Rows checked off during this run, stubs included.
    pub fn resolved(&self) -> usize {
        self.phase1_resolved + self.phase2_resolved + self.duplicates + self.existing
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    Resolved { source: String, path: PathBuf },
    Duplicate(usize),
    Existing,
    Screenshots,
    Unresolved,
    Cancelled,
}

struct ItemJob {
    item: ReferenceItem,
    phase: Phase,
    progress: ProgressFn,
    reply: oneshot::Sender<ItemOutcome>,
}

/// Releases an in-flight claim when the item's task ends without
/// registering, including by panic. A no-op after `register`.
struct ClaimGuard<'a> {
    registry: &'a DuplicateRegistry,
    identifier: Identifier,
    index: usize,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.identifier, self.index);
    }
}

struct Shared {
    config: Config,
    checklist: ChecklistStore,
    registry: DuplicateRegistry,
    chain: SourceChain,
}

impl Shared {
    fn mark(&self, index: usize, progress: &ProgressFn) {
        match self.checklist.mark_checked(index) {
            Ok(true) => {}
            Ok(false) => tracing::debug!(index, "row already checked"),
            Err(e) => {
                tracing::warn!(index, error = %e, "could not update checklist");
                progress(ProgressEvent::Warning {
                    index,
                    message: format!("checklist not updated: {}", e),
                });
            }
        }
    }

    async fn process(&self, item: ReferenceItem, phase: Phase, progress: &ProgressFn) -> ItemOutcome {
        let index = item.index;
        let output_dir = &self.config.output_dir;
        let mut attempt = ResolutionAttempt::new(item);
        progress(ProgressEvent::Started {
            index,
            url: attempt.url().to_string(),
            phase,
        });

        if phase == Phase::Browser && self.config.screenshots_only && has_screenshots(output_dir, index) {
            progress(ProgressEvent::ScreenshotsExist { index });
            return ItemOutcome::Screenshots;
        }

        let output = artifact_path(output_dir, index, attempt.url(), attempt.identifier.as_ref());

        let _claim = match attempt.identifier.clone() {
            Some(identifier) => match self.registry.check_and_stub(&identifier, index).await {
                Ok(true) => {
                    let original = self.registry.original_of(&identifier).unwrap_or_default();
                    self.mark(index, progress);
                    progress(ProgressEvent::Duplicate { index, original });
                    return ItemOutcome::Duplicate(original);
                }
                Ok(false) => Some(ClaimGuard {
                    registry: &self.registry,
                    identifier,
                    index,
                }),
                Err(e) => {
                    tracing::warn!(index, error = %e, "could not write duplicate stub");
                    progress(ProgressEvent::Warning {
                        index,
                        message: format!("duplicate stub not written: {}", e),
                    });
                    return ItemOutcome::Unresolved;
                }
            },
            None => None,
        };

        if self.chain.validator().is_valid(&output).await {
            tracing::debug!(index, path = %output.display(), "artifact already on disk");
            if let Some(id) = &attempt.identifier {
                self.registry.register(id, index);
            }
            self.mark(index, progress);
            progress(ProgressEvent::Existing { index });
            return ItemOutcome::Existing;
        }

        let result = self
            .chain
            .resolve(&mut attempt, &output, phase, Some(progress))
            .await;

        if result.success {
            if let Some(id) = &attempt.identifier {
                self.registry.register(id, index);
            }
            self.mark(index, progress);
            let source = result.source_name.unwrap_or_default();
            let path = result.artifact_path.unwrap_or(output);
            tracing::info!(index, source = %source, path = %path.display(), "resolved");
            progress(ProgressEvent::Resolved {
                index,
                source: source.clone(),
                path: path.clone(),
                phase,
            });
            return ItemOutcome::Resolved { source, path };
        }

        if phase == Phase::Browser && self.config.screenshots_only && has_screenshots(output_dir, index) {
            progress(ProgressEvent::ScreenshotsCaptured { index });
            return ItemOutcome::Screenshots;
        }

        progress(ProgressEvent::Unresolved { index, phase });
        ItemOutcome::Unresolved
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: Config,
        checklist: ChecklistStore,
        registry: DuplicateRegistry,
        chain: SourceChain,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                checklist,
                registry,
                chain,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop submitting rows once `cancel` fires; running rows finish their
    /// current source.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Parse the checklist and resolve every unchecked row in range.
    ///
    /// Only the fatal class escapes: a missing, unreadable or empty
    /// checklist. Everything else is absorbed per row.
    pub async fn run(&self, progress: ProgressFn) -> Result<RunReport, CoreError> {
        let config = &self.shared.config;
        let items = self.shared.checklist.parse()?;
        let pending: Vec<ReferenceItem> = items
            .into_iter()
            .filter(|i| !i.checked && config.in_range(i.index))
            .collect();
        tracing::info!(pending = pending.len(), "rows to resolve");

        let mut report = RunReport {
            pending: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let mut retry = Vec::new();
        for (item, outcome) in self.run_phase(Phase::Fast, pending, &progress).await {
            match outcome {
                ItemOutcome::Resolved { .. } => report.phase1_resolved += 1,
                ItemOutcome::Duplicate(_) => report.duplicates += 1,
                ItemOutcome::Existing => report.existing += 1,
                ItemOutcome::Screenshots => report.screenshots += 1,
                ItemOutcome::Unresolved => retry.push(item),
                ItemOutcome::Cancelled => report.unresolved.push(item.index),
            }
        }

        let browser_phase = !retry.is_empty()
            && !config.skip_browser
            && self.shared.chain.has_phase(Phase::Browser)
            && !self.cancel.is_cancelled();

        if browser_phase {
            for (item, outcome) in self.run_phase(Phase::Browser, retry, &progress).await {
                match outcome {
                    ItemOutcome::Resolved { .. } => report.phase2_resolved += 1,
                    ItemOutcome::Duplicate(_) => report.duplicates += 1,
                    ItemOutcome::Existing => report.existing += 1,
                    ItemOutcome::Screenshots => {
                        report.screenshots += 1;
                        report.unresolved.push(item.index);
                    }
                    ItemOutcome::Unresolved | ItemOutcome::Cancelled => {
                        report.unresolved.push(item.index)
                    }
                }
            }
        } else {
            report.unresolved.extend(retry.iter().map(|i| i.index));
        }

        report.unresolved.sort_unstable();
        report.cancelled = self.cancel.is_cancelled();
        Ok(report)
    }

    async fn run_phase(
        &self,
        phase: Phase,
        items: Vec<ReferenceItem>,
        progress: &ProgressFn,
    ) -> Vec<(ReferenceItem, ItemOutcome)> {
        let config = &self.shared.config;
        let (workers, delay) = match phase {
            Phase::Fast => (config.num_workers, config.submit_delay),
            Phase::Browser => (config.browser_workers, config.browser_submit_delay),
        };
        progress(ProgressEvent::PhaseStarted {
            phase,
            items: items.len(),
        });
        tracing::info!(%phase, items = items.len(), workers, "phase started");

        let shared = self.shared.clone();
        let pool = WorkerPool::new(workers, self.cancel.clone(), move |job: ItemJob| {
            let shared = shared.clone();
            async move {
                let outcome = shared.process(job.item, job.phase, &job.progress).await;
                let _ = job.reply.send(outcome);
            }
        });

        let mut waiting = Vec::with_capacity(items.len());
        for (n, item) in items.into_iter().enumerate() {
            if n > 0 {
                pace(delay, &self.cancel).await;
            }
            if self.cancel.is_cancelled() {
                waiting.push((item, None));
                continue;
            }
            let (reply, rx) = oneshot::channel();
            pool.submit(ItemJob {
                item: item.clone(),
                phase,
                progress: progress.clone(),
                reply,
            })
            .await;
            waiting.push((item, Some(rx)));
        }
        pool.shutdown().await;

        let mut outcomes = Vec::with_capacity(waiting.len());
        for (item, rx) in waiting {
            let outcome = match rx {
                Some(rx) => match rx.await {
                    Ok(outcome) => outcome,
                    // Dropped by a cancelled worker, or the item's task panicked
                    Err(_) if self.cancel.is_cancelled() => ItemOutcome::Cancelled,
                    Err(_) => {
                        tracing::warn!(index = item.index, "item task ended without a result");
                        ItemOutcome::Unresolved
                    }
                },
                None => ItemOutcome::Cancelled,
            };
            outcomes.push((item, outcome));
        }
        outcomes
    }
}

/// Politeness gap between submissions; cut short by cancellation.
async fn pace(delay: Duration, cancel: &CancellationToken) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => {}
    }
}
