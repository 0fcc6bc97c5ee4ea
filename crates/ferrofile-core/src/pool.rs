//! Bounded worker pools sized by workload class.
//!
//! Each [`WorkerPool`] owns a small multi-threaded tokio runtime. Blocking
//! work runs on the runtime's blocking threads, whose number is capped at the
//! pool size; async coordination (semaphores, channels) runs on a couple of
//! worker threads. [`ResourcePools`] bundles the I/O pool and the CPU pool
//! and is passed explicitly to the engines that need them.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::PoolError;

/// Runtime worker threads dedicated to async coordination in each pool.
const COORDINATOR_THREADS: usize = 2;

/// A named, bounded pool of worker threads.
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    grace: Duration,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    closing: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool running at most `size` blocking tasks at once.
    pub fn new(name: &'static str, size: usize, grace: Duration) -> Result<Self, PoolError> {
        let size = size.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(COORDINATOR_THREADS)
            .max_blocking_threads(size)
            .thread_name(format!("ferro-{name}"))
            .enable_time()
            .build()
            .map_err(|source| PoolError::Build { pool: name, source })?;
        let handle = runtime.handle().clone();

        tracing::debug!(pool = name, size, "worker pool started");

        Ok(Self {
            name,
            size,
            grace,
            runtime: Mutex::new(Some(runtime)),
            handle,
            closing: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The pool's name, used in thread names and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Maximum number of blocking tasks running at once.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of submitted blocking tasks that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the pool has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Submit blocking work to the pool.
    ///
    /// Work that has not started when the pool shuts down is dropped and its
    /// task resolves to [`PoolError::Closed`].
    pub fn submit<F, T>(&self, work: F) -> Result<PoolTask<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::Closed { pool: self.name });
        }

        let closing = self.closing.clone();
        let guard = ActiveGuard::new(Arc::clone(&self.active));
        let inner = self.handle.spawn_blocking(move || {
            let _guard = guard;
            if closing.is_cancelled() {
                return None;
            }
            Some(work())
        });

        Ok(PoolTask {
            pool: self.name,
            inner,
        })
    }

    /// Spawn an async coordination task on the pool's runtime.
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::Closed { pool: self.name });
        }
        Ok(self.handle.spawn(future))
    }

    /// Drive `future` to completion on this pool's runtime.
    ///
    /// Must be called from a thread that is not itself running async code.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Shut the pool down.
    ///
    /// Pending work is cancelled; in-flight work gets the grace period before
    /// the runtime stops waiting for it. Calling this more than once is a no-op.
    ///
    /// Inside an async context the wait happens on a helper thread, which
    /// still blocks the caller for at most the grace period.
    pub fn shutdown(&self) {
        self.closing.cancel();

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(runtime) = runtime else {
            return;
        };

        tracing::debug!(
            pool = self.name,
            active = self.active_tasks(),
            "shutting down worker pool"
        );

        // A runtime cannot be shut down with a timeout from inside a runtime.
        if Handle::try_current().is_ok() {
            let grace = self.grace;
            let waiter = std::thread::Builder::new()
                .name(format!("ferro-{}-shutdown", self.name))
                .spawn(move || runtime.shutdown_timeout(grace));
            match waiter {
                Ok(waiter) => {
                    if waiter.join().is_err() {
                        tracing::warn!(pool = self.name, "worker pool shutdown panicked");
                    }
                }
                Err(e) => {
                    tracing::warn!(pool = self.name, error = %e, "cannot spawn shutdown thread");
                }
            }
        } else {
            runtime.shutdown_timeout(self.grace);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("active", &self.active_tasks())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Decrements the active-task counter when the work finishes or is dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to blocking work submitted to a [`WorkerPool`].
#[derive(Debug)]
pub struct PoolTask<T> {
    pool: &'static str,
    inner: JoinHandle<Option<T>>,
}

impl<T> Future for PoolTask<T> {
    type Output = Result<T, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pool = self.pool;
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Some(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(None)) => Poll::Ready(Err(PoolError::Closed { pool })),
            Poll::Ready(Err(e)) if e.is_panic() => Poll::Ready(Err(PoolError::Panicked { pool })),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::Closed { pool })),
        }
    }
}

/// The process's two worker pools.
#[derive(Debug)]
pub struct ResourcePools {
    io: WorkerPool,
    cpu: WorkerPool,
}

impl ResourcePools {
    /// Create both pools sized from the configuration.
    pub fn new(config: &EngineConfig) -> Result<Self, PoolError> {
        let grace = config.shutdown_grace();
        Ok(Self {
            io: WorkerPool::new("io", config.io_pool_size(), grace)?,
            cpu: WorkerPool::new("cpu", config.cpu_pool_size(), grace)?,
        })
    }

    /// Pool for filesystem-bound work.
    pub fn io(&self) -> &WorkerPool {
        &self.io
    }

    /// Pool for computation-bound work.
    pub fn cpu(&self) -> &WorkerPool {
        &self.cpu
    }

    /// Shut down both pools.
    pub fn shutdown(&self) {
        self.io.shutdown();
        self.cpu.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn small_pool() -> WorkerPool {
        WorkerPool::new("test", 2, Duration::from_millis(500)).unwrap()
    }

    #[test]
    fn test_submit_returns_value() {
        let pool = small_pool();
        let task = pool.submit(|| 21 * 2).unwrap();
        assert_eq!(pool.block_on(task).unwrap(), 42);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = small_pool();
        pool.shutdown();

        assert!(pool.is_closed());
        assert!(matches!(
            pool.submit(|| ()),
            Err(PoolError::Closed { pool: "test" })
        ));
        assert!(pool.spawn(async {}).is_err());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = small_pool();
        pool.shutdown();
        pool.shutdown();
        assert!(pool.is_closed());
    }

    #[test]
    fn test_shutdown_drops_queued_work_within_grace() {
        let pool = WorkerPool::new("test", 1, Duration::from_millis(200)).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let mut tasks: Vec<_> = (0..5)
            .map(|_| {
                let ran = Arc::clone(&ran);
                let started_tx = started_tx.clone();
                pool.submit(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    let _ = started_tx.send(());
                    std::thread::sleep(Duration::from_secs(1));
                })
                .unwrap()
            })
            .collect();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let started = std::time::Instant::now();
        pool.shutdown();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(150), "took {elapsed:?}");
        assert!(elapsed < Duration::from_millis(900), "took {elapsed:?}");
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        // The first task is still sleeping on its detached thread.
        drop(tasks.remove(0));
        let poller = tokio::runtime::Builder::new_current_thread().build().unwrap();
        for task in tasks {
            assert!(matches!(
                poller.block_on(task),
                Err(PoolError::Closed { pool: "test" })
            ));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_inside_runtime_waits_for_in_flight_work() {
        let pool = WorkerPool::new("test", 1, Duration::from_secs(5)).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let done = Arc::clone(&finished);
        let _task = pool
            .submit(move || {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_millis(100));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let caller = tokio::runtime::Builder::new_current_thread().build().unwrap();
        caller.block_on(async { pool.shutdown() });

        assert!(pool.is_closed());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_work_is_reported() {
        let pool = small_pool();
        let task = pool.submit(|| panic!("boom")).unwrap();
        assert!(matches!(
            pool.block_on(task),
            Err(PoolError::Panicked { .. })
        ));
    }

    #[test]
    fn test_active_tasks_tracked() {
        let pool = small_pool();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let task = pool
            .submit(move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        assert_eq!(pool.active_tasks(), 1);
        release_tx.send(()).unwrap();
        pool.block_on(task).unwrap();
        assert_eq!(pool.active_tasks(), 0);
    }

    #[test]
    fn test_resource_pools_sizes() {
        let config = EngineConfig::builder()
            .io_threads(3usize)
            .cpu_threads(1usize)
            .build()
            .unwrap();
        let pools = ResourcePools::new(&config).unwrap();

        assert_eq!(pools.io().size(), 3);
        assert_eq!(pools.cpu().size(), 1);
        assert_eq!(pools.io().name(), "io");

        pools.shutdown();
        assert!(pools.io().is_closed());
        assert!(pools.cpu().is_closed());
    }
}
