//! Search execution on the CPU pool.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use ferrofile_core::{CancellationToken, EngineConfig, ResourcePools};
use jwalk::{Parallelism, WalkDir};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SearchError;
use crate::matcher::{build_matcher, Candidate, FileMatcher};
use crate::query::SearchQuery;

/// A file that matched a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Final result of a search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchReport {
    /// Matches in discovery order.
    pub results: Vec<FoundFile>,
    /// The result cap was reached and the walks were stopped early.
    pub truncated: bool,
    /// The caller cancelled the search.
    pub cancelled: bool,
    /// Entries that could not be read and were skipped.
    pub errors_skipped: u64,
    /// Entries the walks visited.
    pub entries_visited: u64,
}

/// Event sent through a search's channel.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// A new match. Dropped when the receiver lags; see [`SearchHandle::results`].
    Match(FoundFile),
    /// The search terminated.
    Complete(SearchReport),
}

/// State shared by the walks of one search.
#[derive(Debug)]
struct SearchState {
    cap: usize,
    results: Mutex<Vec<FoundFile>>,
    truncated: AtomicBool,
    errors_skipped: AtomicU64,
    visited: AtomicU64,
    /// Stops every walk; cancelled by the caller or when the cap is reached.
    stop: CancellationToken,
}

impl SearchState {
    fn new(cap: usize, stop: CancellationToken) -> Self {
        Self {
            cap,
            results: Mutex::new(Vec::new()),
            truncated: AtomicBool::new(false),
            errors_skipped: AtomicU64::new(0),
            visited: AtomicU64::new(0),
            stop,
        }
    }

    fn results(&self) -> Vec<FoundFile> {
        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Add a match, stopping the search once the cap is reached.
    fn push(&self, found: FoundFile, events: &mpsc::Sender<SearchEvent>) {
        let mut results = self
            .results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if results.len() >= self.cap {
            return;
        }

        results.push(found.clone());
        if results.len() >= self.cap {
            self.truncated.store(true, Ordering::Release);
            self.stop.cancel();
        }
        drop(results);

        let _ = events.try_send(SearchEvent::Match(found));
    }

    fn record_error(&self, path: Option<&Path>, error: &jwalk::Error) {
        self.errors_skipped.fetch_add(1, Ordering::Relaxed);
        let denied = error
            .io_error()
            .is_some_and(|e| e.kind() == ErrorKind::PermissionDenied);
        if !denied {
            tracing::warn!(path = ?path, %error, "search skipped entry");
        }
    }

    fn report(&self, cancelled: bool) -> SearchReport {
        SearchReport {
            results: self.results(),
            truncated: self.truncated.load(Ordering::Acquire),
            cancelled,
            errors_skipped: self.errors_skipped.load(Ordering::Relaxed),
            entries_visited: self.visited.load(Ordering::Relaxed),
        }
    }
}

/// Runs searches on the CPU pool, one walk per root.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    pools: Arc<ResourcePools>,
    config: EngineConfig,
}

/// Drop roots that repeat, or sit inside, another root.
///
/// Paths are compared canonicalized when they exist; the walk keeps the
/// path as given. Order of the surviving roots is preserved.
fn distinct_roots(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let keyed: Vec<(PathBuf, PathBuf)> = roots
        .into_iter()
        .map(|root| {
            let key = std::fs::canonicalize(&root).unwrap_or_else(|_| root.clone());
            (key, root)
        })
        .collect();

    let mut kept = Vec::with_capacity(keyed.len());
    for (index, (key, root)) in keyed.iter().enumerate() {
        let covered = keyed.iter().enumerate().any(|(other, (other_key, _))| {
            if other == index || !key.starts_with(other_key) {
                return false;
            }
            // Identical roots keep the first occurrence.
            key != other_key || other < index
        });
        if covered {
            tracing::debug!(root = %root.display(), "skipping root nested in another root");
        } else {
            kept.push(root.clone());
        }
    }
    kept
}

impl SearchEngine {
    pub fn new(pools: Arc<ResourcePools>, config: EngineConfig) -> Self {
        Self { pools, config }
    }

    /// Start a search for `query`.
    ///
    /// A blank pattern completes immediately with no results, without walking.
    pub fn search(&self, query: &SearchQuery) -> Result<SearchHandle, SearchError> {
        if !query.has_pattern() {
            tracing::debug!("blank search pattern, nothing to do");
            return Ok(SearchHandle::finished(self.config.channel_size));
        }

        let matcher = build_matcher(query, &self.config)?;
        self.search_with(query.roots.clone(), matcher)
    }

    /// Walk `roots` and collect every regular file `matcher` accepts.
    pub fn search_with(
        &self,
        roots: Vec<PathBuf>,
        matcher: Arc<dyn FileMatcher>,
    ) -> Result<SearchHandle, SearchError> {
        let cancel = CancellationToken::new();
        let state = Arc::new(SearchState::new(
            self.config.max_search_results,
            cancel.child_token(),
        ));
        let (tx, rx) = mpsc::channel(self.config.channel_size);

        let roots = distinct_roots(roots);
        let mut walks = Vec::with_capacity(roots.len());
        for root in roots {
            let state = Arc::clone(&state);
            let matcher = Arc::clone(&matcher);
            let events = tx.clone();
            walks.push(
                self.pools
                    .cpu()
                    .submit(move || walk_root(&root, matcher.as_ref(), &state, &events))?,
            );
        }

        let finish_state = Arc::clone(&state);
        let user_cancel = cancel.clone();
        self.pools.cpu().spawn(async move {
            for walk in walks {
                if let Err(e) = walk.await {
                    tracing::warn!(error = %e, "search walk did not complete");
                }
            }

            let report = finish_state.report(user_cancel.is_cancelled());
            tracing::info!(
                results = report.results.len(),
                truncated = report.truncated,
                cancelled = report.cancelled,
                visited = report.entries_visited,
                "search finished"
            );
            let _ = tx.send(SearchEvent::Complete(report)).await;
        })?;

        Ok(SearchHandle {
            cancel,
            state,
            events: rx,
        })
    }
}

fn walk_root(
    root: &Path,
    matcher: &dyn FileMatcher,
    state: &SearchState,
    events: &mpsc::Sender<SearchEvent>,
) {
    if let Err(e) = std::fs::metadata(root) {
        tracing::warn!(root = %root.display(), error = %e, "search root skipped");
        return;
    }

    let walker = WalkDir::new(root)
        .parallelism(Parallelism::Serial)
        .skip_hidden(false)
        .follow_links(false);

    for entry_result in walker {
        if state.stop.is_cancelled() {
            break;
        }

        let entry = match entry_result {
            Ok(e) => e,
            Err(err) => {
                state.record_error(err.path(), &err);
                continue;
            }
        };
        state.visited.fetch_add(1, Ordering::Relaxed);

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                state.record_error(Some(&path), &err);
                continue;
            }
        };

        let name = entry.file_name().to_string_lossy();
        let candidate = Candidate {
            path: &path,
            name: &name,
            size: metadata.len(),
        };
        if matcher.matches(&candidate) {
            let found = FoundFile {
                name: name.to_string(),
                size: metadata.len(),
                modified: metadata.modified().ok(),
                path,
            };
            state.push(found, events);
        }
    }
}

/// Caller's view of a running search.
#[derive(Debug)]
pub struct SearchHandle {
    cancel: CancellationToken,
    state: Arc<SearchState>,
    events: mpsc::Receiver<SearchEvent>,
}

impl SearchHandle {
    /// A handle whose search already completed with nothing found.
    fn finished(channel_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(channel_size.max(1));
        let _ = tx.try_send(SearchEvent::Complete(SearchReport::default()));
        let cancel = CancellationToken::new();
        Self {
            state: Arc::new(SearchState::new(0, cancel.child_token())),
            cancel,
            events: rx,
        }
    }

    /// Matches found so far.
    pub fn results(&self) -> Vec<FoundFile> {
        self.state.results()
    }

    /// Stop all walks at their next entry.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn recv(&mut self) -> Option<SearchEvent> {
        self.events.recv().await
    }

    /// Blocking form of [`recv`](Self::recv). Panics inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<SearchEvent> {
        self.events.blocking_recv()
    }

    /// Wait for the final report.
    pub async fn wait(mut self) -> SearchReport {
        while let Some(event) = self.events.recv().await {
            if let SearchEvent::Complete(report) = event {
                return report;
            }
        }
        self.state.report(self.cancel.is_cancelled())
    }

    /// Blocking form of [`wait`](Self::wait). Panics inside an async runtime.
    pub fn wait_blocking(mut self) -> SearchReport {
        while let Some(event) = self.events.blocking_recv() {
            if let SearchEvent::Complete(report) = event {
                return report;
            }
        }
        self.state.report(self.cancel.is_cancelled())
    }
}
