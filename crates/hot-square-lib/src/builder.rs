//! Parallel build driver
//!
//! Work is split into contiguous ranges up front, one per worker, and run on a dedicated rayon
//! pool of exactly `thread_count` threads. The calling thread polls the per-worker progress
//! counters while the workers run, and the scope joins every worker before results are handed
//! back for the single-threaded merge.

use crate::{DataError, Result};

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Upper bound on how long the monitor sleeps between checks for finished workers
const MONITOR_TICK: Duration = Duration::from_millis(10);

/// Shared flag used to abort a running build
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; workers stop at their next item
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Stage of the square build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Finding the squares within reach of each segment
    Discovery,
    /// Computing the heading ranges of each square
    Materialization,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildPhase::Discovery => write!(f, "discovery"),
            BuildPhase::Materialization => write!(f, "materialization"),
        }
    }
}

/// Snapshot of a running phase, as seen by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildProgress {
    pub phase: BuildPhase,
    /// Items processed so far, all workers combined
    pub done: usize,
    /// Items in this phase
    pub total: usize,
    pub finished_workers: usize,
    pub workers: usize,
}

impl BuildProgress {
    /// Completed fraction in [0, 1]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_workers == self.workers
    }
}

/// Callback receiving progress snapshots on the thread that started the build
pub type ProgressCallback = Arc<dyn Fn(&BuildProgress) + Send + Sync>;

/// Options controlling a parallel build
#[derive(Clone)]
pub struct BuildOptions {
    /// Number of worker threads. Must be at least 1.
    /// Default: available parallelism
    pub thread_count: usize,
    /// How often progress is logged and reported.
    /// Default: 1 second
    pub poll_interval: Duration,
    pub cancel: CancelToken,
    progress: Option<ProgressCallback>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            poll_interval: Duration::from_secs(1),
            cancel: CancelToken::new(),
            progress: None,
        }
    }
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("thread_count", &self.thread_count)
            .field("poll_interval", &self.poll_interval)
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl BuildOptions {
    pub fn with_threads(thread_count: usize) -> Self {
        Self {
            thread_count,
            ..Default::default()
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BuildProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }
}

/// Split `len` items into `workers` contiguous ranges
///
/// Each worker gets the rounded average share; the last worker takes whatever remains. Ranges
/// are clamped so they never run past the end, which leaves trailing workers empty when the
/// rounding overshoots.
pub(crate) fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    if workers == 0 {
        return Vec::new();
    }
    let avg = (len as f64 / workers as f64).round() as usize;
    (0..workers)
        .map(|i| {
            let start = (i * avg).min(len);
            let end = if i + 1 == workers {
                len
            } else {
                ((i + 1) * avg).min(len)
            };
            start..end
        })
        .collect()
}

/// Progress counters owned by one worker
#[derive(Debug)]
pub(crate) struct WorkerProgress {
    done: AtomicUsize,
    finished: AtomicBool,
}

impl WorkerProgress {
    fn new() -> Self {
        Self {
            done: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        }
    }
}

/// Marks a worker finished when dropped, including during a panic
struct FinishGuard<'a>(&'a WorkerProgress);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finished.store(true, Ordering::Release);
    }
}

/// What a worker closure sees of the build
pub(crate) struct WorkerContext<'a> {
    progress: &'a WorkerProgress,
    cancel: &'a CancelToken,
}

impl WorkerContext<'_> {
    /// Record one processed item
    #[inline]
    pub(crate) fn tick(&self) {
        self.progress.done.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Run `work` over `items` split across `options.thread_count` workers
///
/// Returns one result per worker, in partition order. Fails if the pool cannot be created or
/// the build was cancelled.
pub(crate) fn run_partitioned<T, R, F>(
    items: &[T],
    phase: BuildPhase,
    options: &BuildOptions,
    work: F,
) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&[T], &WorkerContext<'_>) -> R + Sync,
{
    if options.thread_count == 0 {
        return Err(DataError::InvalidConfig(
            "thread_count must be at least 1".to_string(),
        ));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.thread_count)
        .thread_name(move |i| format!("hot-square-{phase}-{i}"))
        .build()
        .map_err(|e| DataError::WorkerPool(e.to_string()))?;

    let ranges = partition(items.len(), options.thread_count);
    let progress: Vec<WorkerProgress> = ranges.iter().map(|_| WorkerProgress::new()).collect();
    let mut results: Vec<Option<R>> = ranges.iter().map(|_| None).collect();

    tracing::debug!("{phase}: {} items over {} workers", items.len(), ranges.len());

    pool.in_place_scope(|scope| {
        for ((range, slot), worker) in ranges.iter().zip(results.iter_mut()).zip(&progress) {
            let chunk = &items[range.clone()];
            let work = &work;
            let cancel = &options.cancel;
            scope.spawn(move |_| {
                let _guard = FinishGuard(worker);
                let ctx = WorkerContext {
                    progress: worker,
                    cancel,
                };
                *slot = Some(work(chunk, &ctx));
            });
        }

        monitor(&progress, items.len(), phase, options);
    });

    if options.cancel.is_cancelled() {
        tracing::warn!("{phase}: cancelled");
        return Err(DataError::Cancelled);
    }

    results
        .into_iter()
        .map(|r| r.ok_or_else(|| DataError::WorkerPool(format!("{phase} worker left no result"))))
        .collect()
}

/// Poll worker counters until every worker has finished
fn monitor(progress: &[WorkerProgress], total: usize, phase: BuildPhase, options: &BuildOptions) {
    let snapshot = || {
        // Finished flags first, so a finished worker's count is already final
        let finished_workers = progress
            .iter()
            .filter(|p| p.finished.load(Ordering::Acquire))
            .count();
        BuildProgress {
            phase,
            done: progress
                .iter()
                .map(|p| p.done.load(Ordering::Relaxed))
                .sum(),
            total,
            finished_workers,
            workers: progress.len(),
        }
    };
    let report = |state: &BuildProgress| {
        tracing::info!(
            "{phase}: {:.1}% ({}/{}), {}/{} workers done",
            state.fraction() * 100.0,
            state.done,
            state.total,
            state.finished_workers,
            state.workers
        );
        if let Some(callback) = &options.progress {
            callback(state);
        }
    };

    let tick = options.poll_interval.min(MONITOR_TICK);
    let mut last_report = Instant::now();
    loop {
        let state = snapshot();
        if state.is_finished() {
            report(&state);
            break;
        }
        if last_report.elapsed() >= options.poll_interval {
            report(&state);
            last_report = Instant::now();
        }
        std::thread::sleep(tick);
    }
}
