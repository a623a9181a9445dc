//! Bounded task pools and the handles they hand out.
//!
//! Every piece of background work runs through a [`Pool`]: API calls in one,
//! dispatch chains in the other. A pool enforces two invariants:
//!
//! - tasks start in strict submission order (FIFO)
//! - at most `limit` tasks run at once
//!
//! [`Pool::submit`] returns a [`TaskHandle`] immediately; the caller may
//! await it (any number of times), cancel it, or drop it. A dropped handle
//! does not detach the task: the pool still runs it and still logs and
//! counts a failure, so fire-and-forget calls cannot fail silently.
//!
//! # Example
//!
//! ```rust,ignore
//! let pool: Pool<i64> = Pool::new("calls", 8);
//! let handle = pool.submit("fetch", async { Ok(42) });
//! assert_eq!(handle.await, Ok(42));
//! pool.shutdown(Duration::from_secs(5)).await;
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::Shared;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::dispatcher::DispatchOutcome;
use crate::error::TaskError;
use crate::BoxFuture;

/// Default cap on concurrently running API calls.
pub const DEFAULT_CALL_LIMIT: usize = 50;

/// Default cap on concurrently running dispatch chains.
pub const DEFAULT_HANDLER_LIMIT: usize = 8;

/// The result a task resolves to.
pub type TaskResult<T> = Result<T, TaskError>;

type SharedResult<T> = Shared<BoxFuture<'static, TaskResult<T>>>;

// ============================================================================
// Task State
// ============================================================================

/// Lifecycle of a submitted task.
///
/// `Pending -> Running -> {Completed, Failed, Cancelled}`. A task cancelled
/// while still queued goes straight from `Pending` to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    /// True once the task can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

// ============================================================================
// TaskHandle
// ============================================================================

/// Handle to a task submitted to a [`Pool`].
///
/// Clones share the same underlying task. The result is cached: awaiting a
/// handle twice (or awaiting two clones) yields the same value without
/// re-running anything.
#[derive(Clone)]
pub struct TaskHandle<T> {
    id: u64,
    name: Arc<str>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    result: SharedResult<T>,
}

impl<T> TaskHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Waits for the task to finish and returns its (cached) result.
    pub async fn wait(&self) -> TaskResult<T> {
        self.result.clone().await
    }

    /// Requests cancellation. Queued tasks resolve immediately; running
    /// tasks are dropped at their next await point. Already finished tasks
    /// are unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The task's current lifecycle state.
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once the task reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Pool-local task id, unique per pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The name given at submission.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> IntoFuture for TaskHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = TaskResult<T>;
    type IntoFuture = SharedResult<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.result
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &TaskState::from_u8(self.state.load(Ordering::Acquire)))
            .finish()
    }
}

// ============================================================================
// Pool
// ============================================================================

struct QueuedTask<T> {
    id: u64,
    name: Arc<str>,
    future: BoxFuture<'static, TaskResult<T>>,
    done: oneshot::Sender<TaskResult<T>>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
}

impl<T> QueuedTask<T> {
    /// Resolves a task that never got to run.
    fn resolve_cancelled(self, pool: &'static str, metrics: &PoolMetrics) {
        self.state
            .store(TaskState::Cancelled as u8, Ordering::Release);
        metrics.task_rejected();
        debug!(pool, task = %self.name, id = self.id, "task cancelled before start");
        let _ = self.done.send(Err(TaskError::Cancelled));
    }
}

struct PoolInner<T> {
    name: &'static str,
    limit: usize,
    queue: Mutex<Option<mpsc::UnboundedSender<QueuedTask<T>>>>,
    metrics: Arc<PoolMetrics>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    next_id: AtomicU64,
}

/// A FIFO task pool with a concurrency limit.
///
/// Cloning is cheap and shares the pool.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Pool<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a pool running at most `limit` tasks at once.
    ///
    /// Must be called from within a Tokio runtime; the pool spawns its
    /// queue runner immediately.
    pub fn new(name: &'static str, limit: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            name,
            limit,
            queue: Mutex::new(Some(tx)),
            metrics: Arc::new(PoolMetrics::default()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_id: AtomicU64::new(0),
        });
        let ctx = RunnerContext {
            name,
            limit,
            metrics: Arc::clone(&inner.metrics),
            cancel: inner.cancel.clone(),
            tracker: inner.tracker.clone(),
        };
        inner.tracker.spawn(run_queue(ctx, rx));
        Self { inner }
    }

    /// Queues `future` and returns a handle to its eventual result.
    ///
    /// Submitting to a closed pool yields a handle that is already
    /// `Cancelled`.
    pub fn submit<F>(&self, name: impl Into<String>, future: F) -> TaskHandle<T>
    where
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(AtomicU8::new(TaskState::Pending as u8));
        let cancel = self.inner.cancel.child_token();
        let (done_tx, done_rx) = oneshot::channel();
        let result: SharedResult<T> = async move {
            match done_rx.await {
                Ok(result) => result,
                Err(_) => Err(TaskError::Lost),
            }
        }
        .boxed()
        .shared();

        let handle = TaskHandle {
            id,
            name: Arc::clone(&name),
            state: Arc::clone(&state),
            cancel: cancel.clone(),
            result,
        };
        let task = QueuedTask {
            id,
            name,
            future: future.boxed(),
            done: done_tx,
            state,
            cancel,
        };

        self.inner.metrics.task_submitted();
        let sender = self.inner.queue.lock().clone();
        match sender {
            Some(tx) => {
                if let Err(mpsc::error::SendError(task)) = tx.send(task) {
                    task.resolve_cancelled(self.inner.name, &self.inner.metrics);
                }
            }
            None => {
                debug!(
                    pool = self.inner.name,
                    task = %handle.name,
                    "pool is closed, rejecting task"
                );
                task.resolve_cancelled(self.inner.name, &self.inner.metrics);
            }
        }
        handle
    }

    /// Stops accepting tasks and waits up to `grace` for queued and running
    /// tasks to finish. Whatever is still alive after the grace period is
    /// cancelled and awaited.
    pub async fn shutdown(&self, grace: Duration) {
        drop(self.inner.queue.lock().take());
        self.inner.tracker.close();
        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                pool = self.inner.name,
                grace_secs = grace.as_secs(),
                "grace period elapsed, cancelling remaining tasks"
            );
            self.inner.cancel.cancel();
            self.inner.tracker.wait().await;
        }
    }

    /// True once [`Pool::shutdown`] has begun.
    pub fn is_closed(&self) -> bool {
        self.inner.queue.lock().is_none()
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.inner.metrics
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("limit", &self.inner.limit)
            .field("closed", &self.inner.queue.lock().is_none())
            .finish()
    }
}

// ============================================================================
// Queue Runner
// ============================================================================

struct RunnerContext {
    name: &'static str,
    limit: usize,
    metrics: Arc<PoolMetrics>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Single consumer of the submission queue. Pulling one task at a time and
/// blocking on the semaphore before pulling the next is what makes start
/// order strictly FIFO.
async fn run_queue<T>(ctx: RunnerContext, mut queue: mpsc::UnboundedReceiver<QueuedTask<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(ctx.limit));
    loop {
        let task = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(task) => task,
                None => break,
            },
        };
        if task.cancel.is_cancelled() {
            task.resolve_cancelled(ctx.name, &ctx.metrics);
            continue;
        }
        let permit = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                task.resolve_cancelled(ctx.name, &ctx.metrics);
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        ctx.tracker
            .spawn(execute(task, permit, ctx.name, Arc::clone(&ctx.metrics)));
    }
    // Resolve anything still queued so no handle is left dangling.
    queue.close();
    while let Ok(task) = queue.try_recv() {
        task.resolve_cancelled(ctx.name, &ctx.metrics);
    }
}

async fn execute<T>(
    task: QueuedTask<T>,
    permit: OwnedSemaphorePermit,
    pool: &'static str,
    metrics: Arc<PoolMetrics>,
) where
    T: Clone + Send + Sync + 'static,
{
    let _permit = permit;
    let QueuedTask {
        id,
        name,
        future,
        done,
        state,
        cancel,
    } = task;

    state.store(TaskState::Running as u8, Ordering::Release);
    metrics.task_started();

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TaskError::Cancelled),
        result = future => result,
    };

    let final_state = match &result {
        Ok(_) => TaskState::Completed,
        Err(TaskError::Cancelled) => TaskState::Cancelled,
        Err(_) => TaskState::Failed,
    };
    state.store(final_state as u8, Ordering::Release);
    metrics.task_finished(&result);

    match &result {
        Ok(_) => trace!(pool, task = %name, id, "task completed"),
        Err(TaskError::Cancelled) => debug!(pool, task = %name, id, "task cancelled"),
        Err(err) => warn!(pool, task = %name, id, error = %err, "task failed"),
    }

    // The handle may be gone; the result was already logged and counted.
    let _ = done.send(result);
}

// ============================================================================
// Metrics
// ============================================================================

/// Per-pool task counters.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    submitted: AtomicU64,
    running: AtomicU64,
    peak_running: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl PoolMetrics {
    fn task_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn task_started(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
    }

    fn task_finished<T>(&self, result: &TaskResult<T>) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        let bucket = match result {
            Ok(_) => &self.completed,
            Err(TaskError::Cancelled) => &self.cancelled,
            Err(_) => &self.failed,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    fn task_rejected(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn running(&self) -> u64 {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak_running(&self) -> u64 {
        self.peak_running.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }
}

// ============================================================================
// TaskScheduler
// ============================================================================

struct SchedulerInner {
    calls: Pool<Value>,
    chains: Pool<DispatchOutcome>,
}

/// The two pools every bot runs on: API calls and dispatch chains.
///
/// Keeping them separate means a burst of slow handlers cannot starve
/// outgoing API calls, and vice versa.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    /// Creates both pools. Must be called from within a Tokio runtime.
    pub fn new(max_calls: usize, max_chains: usize) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                calls: Pool::new("calls", max_calls),
                chains: Pool::new("chains", max_chains),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CALL_LIMIT, DEFAULT_HANDLER_LIMIT)
    }

    /// The pool outgoing API calls run on.
    pub fn calls(&self) -> &Pool<Value> {
        &self.inner.calls
    }

    /// The pool dispatch chains run on.
    pub fn chains(&self) -> &Pool<DispatchOutcome> {
        &self.inner.chains
    }

    /// Drains both pools, sharing the same grace period.
    pub async fn shutdown(&self, grace: Duration) {
        tokio::join!(
            self.inner.calls.shutdown(grace),
            self.inner.chains.shutdown(grace),
        );
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("calls", &self.inner.calls)
            .field("chains", &self.inner.chains)
            .finish()
    }
}
