//! Batch coordination: pre-flight checks, estimation and bounded fan-out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ferrofile_core::{BatchError, CancellationToken, EngineConfig, PoolError, ResourcePools, UnitError};
use tokio::sync::{mpsc, Semaphore};

use crate::conflict::{check_self_containment, scan_conflicts, ConflictEntry, ConflictPolicy};
use crate::fs::{FileSystem, OsFileSystem};
use crate::operation::{unit_destination, OperationDescriptor, OperationError, OperationKind};
use crate::progress::{BatchEvent, BatchOutcome, BatchReport, ProgressSnapshot, ProgressState};
use crate::size::estimate_source;
use crate::unit::{UnitContext, UnitOperation, UnitOutcome};

/// How often a running batch publishes a progress event.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Runs operation batches on the I/O pool.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    pools: Arc<ResourcePools>,
    config: EngineConfig,
    fs: Arc<dyn FileSystem>,
}

impl BatchCoordinator {
    /// Create a coordinator working on the real filesystem.
    pub fn new(pools: Arc<ResourcePools>, config: EngineConfig) -> Self {
        Self {
            pools,
            config,
            fs: Arc::new(OsFileSystem),
        }
    }

    /// Replace the filesystem units operate on.
    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Run the pre-flight checks without touching anything.
    ///
    /// Detects destination conflicts and rejects batches that would copy or
    /// move a directory into itself.
    pub async fn prepare(&self, descriptor: OperationDescriptor) -> Result<PreparedBatch, BatchError> {
        let kind = descriptor.kind();
        let target_dir = match (kind.needs_target(), descriptor.target_dir()) {
            (true, None) => {
                return Err(BatchError::MissingTarget {
                    kind: kind.to_string(),
                });
            }
            (true, Some(target)) => Some(target.to_path_buf()),
            (false, _) => None,
        };

        let sources = descriptor.sources().to_vec();
        let fs = Arc::clone(&self.fs);
        let target = target_dir.clone();
        let (sources, conflicts) = self
            .pools
            .io()
            .submit(move || {
                preflight(fs.as_ref(), kind, &sources, target.as_deref()).map(|c| (sources, c))
            })?
            .await??;

        if !conflicts.is_empty() {
            tracing::debug!(%kind, conflicts = conflicts.len(), "batch has destination conflicts");
        }

        Ok(PreparedBatch {
            coordinator: self.clone(),
            kind,
            sources,
            target_dir,
            conflicts,
        })
    }

    /// Blocking form of [`prepare`](Self::prepare) for callers outside any
    /// async runtime.
    pub fn prepare_blocking(&self, descriptor: OperationDescriptor) -> Result<PreparedBatch, BatchError> {
        self.pools.io().block_on(self.prepare(descriptor))
    }

    /// Prepare and start a batch in one step.
    pub async fn execute(
        &self,
        descriptor: OperationDescriptor,
        policy: Option<ConflictPolicy>,
    ) -> Result<BatchHandle, BatchError> {
        self.prepare(descriptor).await?.start(policy)
    }

    /// Blocking form of [`execute`](Self::execute).
    pub fn execute_blocking(
        &self,
        descriptor: OperationDescriptor,
        policy: Option<ConflictPolicy>,
    ) -> Result<BatchHandle, BatchError> {
        self.prepare_blocking(descriptor)?.start(policy)
    }
}

fn preflight(
    fs: &dyn FileSystem,
    kind: OperationKind,
    sources: &[PathBuf],
    target_dir: Option<&Path>,
) -> Result<Vec<ConflictEntry>, BatchError> {
    let Some(target) = target_dir else {
        return Ok(Vec::new());
    };

    if let Ok(metadata) = fs.symlink_metadata(target) {
        if !metadata.is_dir() {
            return Err(BatchError::TargetNotADirectory {
                path: target.to_path_buf(),
            });
        }
    }

    let conflicts = scan_conflicts(fs, kind, sources, target);
    if kind.checks_conflicts() {
        check_self_containment(fs, sources, target)?;
    }
    Ok(conflicts)
}

/// A batch that passed pre-flight and waits for its conflict decision.
#[derive(Debug)]
pub struct PreparedBatch {
    coordinator: BatchCoordinator,
    kind: OperationKind,
    sources: Vec<PathBuf>,
    target_dir: Option<PathBuf>,
    conflicts: Vec<ConflictEntry>,
}

impl PreparedBatch {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Destinations that already existed when the batch was prepared.
    pub fn conflicts(&self) -> &[ConflictEntry] {
        &self.conflicts
    }

    /// Start executing.
    ///
    /// A policy is required when conflicts were found. `SkipAll` drops the
    /// conflicting sources; `Abort` returns [`BatchError::Aborted`].
    pub fn start(self, policy: Option<ConflictPolicy>) -> Result<BatchHandle, BatchError> {
        let mut sources = self.sources;
        let mut skipped = 0u32;

        if !self.conflicts.is_empty() {
            match policy {
                None => {
                    return Err(BatchError::UnresolvedConflicts {
                        count: self.conflicts.len(),
                    });
                }
                Some(ConflictPolicy::Abort) => {
                    tracing::info!(kind = %self.kind, "batch aborted on conflicts");
                    return Err(BatchError::Aborted);
                }
                Some(ConflictPolicy::SkipAll) => {
                    let before = sources.len();
                    sources.retain(|s| !self.conflicts.iter().any(|c| &c.source == s));
                    skipped = u32::try_from(before - sources.len()).unwrap_or(u32::MAX);
                }
                Some(ConflictPolicy::OverwriteAll) => {}
            }
        }

        let coordinator = self.coordinator;
        let progress = Arc::new(ProgressState::new(self.kind, sources.len()));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(coordinator.config.channel_size);

        let job = BatchJob {
            pools: Arc::clone(&coordinator.pools),
            fs: Arc::clone(&coordinator.fs),
            kind: self.kind,
            concurrency: coordinator.config.unit_concurrency(sources.len()),
            sources,
            target_dir: self.target_dir,
            skipped,
            progress: Arc::clone(&progress),
            cancel: cancel.clone(),
            events: tx,
        };
        coordinator.pools.io().spawn(job.run())?;

        Ok(BatchHandle {
            kind: self.kind,
            progress,
            cancel,
            events: rx,
            skipped,
        })
    }
}

/// Caller's view of a running batch.
#[derive(Debug)]
pub struct BatchHandle {
    kind: OperationKind,
    progress: Arc<ProgressState>,
    cancel: CancellationToken,
    events: mpsc::Receiver<BatchEvent>,
    skipped: u32,
}

impl BatchHandle {
    /// Current progress, independent of the event channel.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Request cancellation. Running units stop at their next check-point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` once the batch has finished and the channel drained.
    pub async fn recv(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// Blocking form of [`recv`](Self::recv). Panics inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<BatchEvent> {
        self.events.blocking_recv()
    }

    /// Wait for the terminal report, discarding progress events.
    pub async fn wait(mut self) -> BatchReport {
        while let Some(event) = self.events.recv().await {
            if let BatchEvent::Complete(report) = event {
                return report;
            }
        }
        self.lost_report()
    }

    /// Blocking form of [`wait`](Self::wait). Panics inside an async runtime.
    pub fn wait_blocking(mut self) -> BatchReport {
        while let Some(event) = self.events.blocking_recv() {
            if let BatchEvent::Complete(report) = event {
                return report;
            }
        }
        self.lost_report()
    }

    /// Report for a batch whose coordinator went away without reporting,
    /// which only happens when the pools were shut down underneath it.
    fn lost_report(&self) -> BatchReport {
        let snapshot = self.progress.snapshot();
        BatchReport {
            operation_kind: self.kind,
            outcome: BatchOutcome::Failed("batch stopped before completing".to_string()),
            completed: snapshot.completed,
            failed: snapshot.failed,
            skipped: self.skipped,
            processed_bytes: snapshot.processed_bytes,
            total_bytes: snapshot.total_bytes,
            errors: Vec::new(),
        }
    }
}

/// Everything the coordinator task owns for one batch.
struct BatchJob {
    pools: Arc<ResourcePools>,
    fs: Arc<dyn FileSystem>,
    kind: OperationKind,
    concurrency: usize,
    sources: Vec<PathBuf>,
    target_dir: Option<PathBuf>,
    skipped: u32,
    progress: Arc<ProgressState>,
    cancel: CancellationToken,
    events: mpsc::Sender<BatchEvent>,
}

impl BatchJob {
    async fn run(self) {
        let report = self.execute().await;

        tracing::info!(
            kind = %report.operation_kind,
            outcome = %report.outcome,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            "batch finished"
        );

        // The terminal event is never dropped; only a vanished receiver loses it.
        let _ = self.events.send(BatchEvent::Complete(report)).await;
    }

    async fn execute(&self) -> BatchReport {
        if self.sources.is_empty() {
            return self.report(BatchOutcome::Succeeded, Vec::new());
        }

        if let Some(target) = &self.target_dir {
            if let Err(reason) = self.create_target(target).await {
                tracing::warn!(target = %target.display(), %reason, "cannot create target directory");
                return self.report(BatchOutcome::Failed(reason), Vec::new());
            }
        }

        let estimates = match self.estimate().await {
            Some(estimates) => estimates,
            None => return self.report(BatchOutcome::Cancelled, Vec::new()),
        };

        let ticker_done = self.cancel.child_token();
        self.spawn_ticker(ticker_done.clone());
        let errors = self.fan_out(estimates).await;
        ticker_done.cancel();

        // A unit that returned cancelled or never ran is counted in neither.
        let finished = (self.progress.completed() + self.progress.failed()) as usize;
        let outcome = if self.cancel.is_cancelled() && finished < self.sources.len() {
            BatchOutcome::Cancelled
        } else if self.progress.failed() > 0 {
            BatchOutcome::PartiallyFailed
        } else {
            BatchOutcome::Succeeded
        };
        self.report(outcome, errors)
    }

    async fn create_target(&self, target: &Path) -> Result<(), String> {
        let fs = Arc::clone(&self.fs);
        let dir = target.to_path_buf();
        match self.pools.io().submit(move || fs.create_dir_all(&dir)) {
            Ok(task) => match task.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        }
    }

    /// Estimate every source in parallel and publish the total.
    ///
    /// Returns `None` when cancelled during estimation.
    async fn estimate(&self) -> Option<Vec<u64>> {
        let mut tasks = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let fs = Arc::clone(&self.fs);
            let cancel = self.cancel.clone();
            let kind = self.kind;
            let source = source.clone();
            tasks.push(
                self.pools
                    .io()
                    .submit(move || estimate_source(fs.as_ref(), kind, &source, &cancel)),
            );
        }

        let mut estimates = Vec::with_capacity(tasks.len());
        let mut cancelled = false;
        for task in tasks {
            let estimate = match task {
                Ok(task) => task.await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "size estimation did not run");
                    Default::default()
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "size estimation not scheduled");
                    Default::default()
                }
            };
            cancelled |= estimate.cancelled;
            estimates.push(estimate.bytes);
        }

        let total: u64 = estimates.iter().fold(0u64, |acc, b| acc.saturating_add(*b));
        self.progress.set_total_bytes(total);
        tracing::debug!(kind = %self.kind, total, "batch size estimated");
        self.publish();

        if cancelled || self.cancel.is_cancelled() {
            None
        } else {
            Some(estimates)
        }
    }

    /// Dispatch one unit per source, bounded by the unit concurrency.
    async fn fan_out(&self, estimates: Vec<u64>) -> Vec<OperationError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut running = Vec::with_capacity(self.sources.len());
        let mut errors = Vec::new();

        for (source, estimate) in self.sources.iter().zip(estimates) {
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.cancel.cancelled() => break,
            };
            if self.cancel.is_cancelled() {
                break;
            }

            let destination = self
                .target_dir
                .as_deref()
                .map(|target| unit_destination(self.kind, source, target));
            let unit = UnitOperation::new(self.kind, source.clone(), destination).with_estimate(estimate);
            let fs = Arc::clone(&self.fs);
            let cancel = self.cancel.clone();
            let progress = Arc::clone(&self.progress);
            let events = self.events.clone();

            let submitted = self.pools.io().submit(move || {
                let _permit = permit;
                let result = unit.execute(UnitContext {
                    fs: fs.as_ref(),
                    cancel: &cancel,
                    progress: &progress,
                });
                match &result {
                    Ok(UnitOutcome::Completed) => progress.record_completed(),
                    Ok(UnitOutcome::Cancelled) => {}
                    Err(e) => {
                        tracing::warn!(source = %unit.source().display(), error = %e, "unit failed");
                        progress.record_failed();
                    }
                }
                let _ = events.try_send(BatchEvent::Progress(progress.snapshot()));
                result
            });

            match submitted {
                Ok(task) => running.push((source.clone(), task)),
                Err(e) => {
                    self.record_lost_unit(source, &e, &mut errors);
                    break;
                }
            }
        }

        for (source, task) in running {
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => errors.push(unit_error(&source, &e)),
                Err(e) => self.record_lost_unit(&source, &e, &mut errors),
            }
        }
        errors
    }

    fn record_lost_unit(&self, source: &Path, error: &PoolError, errors: &mut Vec<OperationError>) {
        tracing::warn!(source = %source.display(), %error, "unit did not run to completion");
        self.progress.record_failed();
        errors.push(OperationError::new(source.to_path_buf(), error.to_string()));
    }

    fn spawn_ticker(&self, done: CancellationToken) {
        let progress = Arc::clone(&self.progress);
        let events = self.events.clone();
        let ticker = async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let _ = events.try_send(BatchEvent::Progress(progress.snapshot()));
                    }
                    _ = done.cancelled() => break,
                }
            }
        };
        if let Err(e) = self.pools.io().spawn(ticker) {
            tracing::debug!(error = %e, "progress ticker not started");
        }
    }

    fn publish(&self) {
        let _ = self.events.try_send(BatchEvent::Progress(self.progress.snapshot()));
    }

    fn report(&self, outcome: BatchOutcome, errors: Vec<OperationError>) -> BatchReport {
        let snapshot = self.progress.snapshot();
        BatchReport {
            operation_kind: self.kind,
            outcome,
            completed: snapshot.completed,
            failed: snapshot.failed,
            skipped: self.skipped,
            processed_bytes: snapshot.processed_bytes,
            total_bytes: snapshot.total_bytes,
            errors,
        }
    }
}

fn unit_error(source: &Path, error: &UnitError) -> OperationError {
    OperationError::new(source.to_path_buf(), error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn coordinator() -> BatchCoordinator {
        let config = EngineConfig::default();
        let pools = Arc::new(ResourcePools::new(&config).unwrap());
        BatchCoordinator::new(pools, config)
    }

    #[test]
    fn test_missing_target_rejected() {
        let coordinator = coordinator();
        let descriptor = OperationDescriptor::new(OperationKind::Copy, vec![PathBuf::from("/x")], None);

        assert!(matches!(
            coordinator.prepare_blocking(descriptor),
            Err(BatchError::MissingTarget { .. })
        ));
    }

    #[test]
    fn test_target_not_a_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();

        let result = coordinator()
            .prepare_blocking(OperationDescriptor::copy(vec![temp.path().join("a.txt")], &file));
        assert!(matches!(result, Err(BatchError::TargetNotADirectory { .. })));
    }

    #[test]
    fn test_empty_batch_succeeds() {
        let temp = TempDir::new().unwrap();
        let handle = coordinator()
            .execute_blocking(OperationDescriptor::copy(vec![], temp.path()), None)
            .unwrap();

        let report = handle.wait_blocking();
        assert_eq!(report.outcome, BatchOutcome::Succeeded);
        assert_eq!(report.completed, 0);
    }

    #[test]
    fn test_conflicts_need_policy() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("a.txt"), "new").unwrap();
        fs::write(dst.join("a.txt"), "old").unwrap();

        let coordinator = coordinator();
        let descriptor = OperationDescriptor::copy(vec![src.join("a.txt")], &dst);

        let prepared = coordinator.prepare_blocking(descriptor.clone()).unwrap();
        assert_eq!(prepared.conflicts().len(), 1);
        assert!(matches!(
            prepared.start(None),
            Err(BatchError::UnresolvedConflicts { count: 1 })
        ));

        let prepared = coordinator.prepare_blocking(descriptor.clone()).unwrap();
        assert!(matches!(
            prepared.start(Some(ConflictPolicy::Abort)),
            Err(BatchError::Aborted)
        ));
        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "old");

        let report = coordinator
            .execute_blocking(descriptor, Some(ConflictPolicy::OverwriteAll))
            .unwrap()
            .wait_blocking();
        assert!(report.is_success());
        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "new");
    }

    #[test]
    fn test_delete_batch() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.txt");
        let b = temp.path().join("b");
        fs::write(&a, vec![0u8; 40]).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(b.join("c.txt"), vec![0u8; 60]).unwrap();

        let report = coordinator()
            .execute_blocking(OperationDescriptor::delete(vec![a.clone(), b.clone()]), None)
            .unwrap()
            .wait_blocking();

        assert_eq!(report.outcome, BatchOutcome::Succeeded);
        assert_eq!(report.completed, 2);
        assert_eq!(report.processed_bytes, 100);
        assert_eq!(report.total_bytes, 100);
        assert!(!a.exists());
        assert!(!b.exists());
    }
}
