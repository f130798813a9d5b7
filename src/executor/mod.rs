//! Bounded, FIFO admission of expensive operations.
//!
//! A [`BoundedExecutor`] runs at most `max_concurrency` operations at once on
//! the blocking pool and parks the rest in a queue of at most
//! `max_queue_depth` entries. Submissions beyond that are refused on the
//! spot. When a running operation settles, the head of the queue is started
//! before the slot is handed to anyone else, so start order always matches
//! submission order. Queued work whose caller has stopped waiting is skipped.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::thread;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::mutex_lock;

const SOURCE: &str = "executor";
const METRIC_ACTIVE: &str = "kirie_executor_active";
const METRIC_QUEUE_LEN: &str = "kirie_executor_queue_len";
const METRIC_REJECTED: &str = "kirie_executor_rejected_total";
const METRIC_QUEUE_WAIT: &str = "kirie_executor_queue_wait_ms";

/// A unit of work the executor can run without knowing what it does.
///
/// `execute` runs on a blocking thread and must not assume a runtime
/// context.
pub trait Operation: Send + 'static {
    type Output: Send + 'static;
    type Error: Send + 'static;

    /// Short label used in logs.
    fn kind(&self) -> &'static str;

    fn execute(self) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorLimits {
    pub max_concurrency: NonZeroUsize,
    pub max_queue_depth: usize,
}

impl ExecutorLimits {
    pub fn new(max_concurrency: NonZeroUsize, max_queue_depth: usize) -> Self {
        Self {
            max_concurrency,
            max_queue_depth,
        }
    }
}

/// Available processing units minus one, never below one.
pub fn default_concurrency() -> NonZeroUsize {
    let units = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    NonZeroUsize::new(units.saturating_sub(1)).unwrap_or(NonZeroUsize::MIN)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("executor `{executor}` queue is full ({depth} waiting)")]
    QueueFull { executor: &'static str, depth: usize },
}

/// Why a submitted operation produced no output.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    #[error("operation failed: {0}")]
    Failed(#[source] E),
    #[error("operation panicked: {0}")]
    Panicked(String),
    #[error("operation was cancelled before it reported a result")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrency: usize,
    pub max_queue_depth: usize,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Queued operations dropped because their caller stopped waiting.
    pub abandoned: u64,
}

type Outcome<O> = Result<<O as Operation>::Output, TaskError<<O as Operation>::Error>>;

struct Task<O: Operation> {
    id: Uuid,
    op: O,
    submitted_at: Instant,
    done: oneshot::Sender<Outcome<O>>,
}

struct ExecutorState<O: Operation> {
    queue: VecDeque<Task<O>>,
    active: usize,
}

struct Shared<O: Operation> {
    name: &'static str,
    limits: ExecutorLimits,
    state: Mutex<ExecutorState<O>>,
    runtime: Handle,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
}

pub struct BoundedExecutor<O: Operation> {
    shared: Arc<Shared<O>>,
}

impl<O: Operation> Clone for BoundedExecutor<O> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<O: Operation> BoundedExecutor<O> {
    /// Create an executor bound to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(name: &'static str, limits: ExecutorLimits) -> Self {
        Self::with_runtime(name, limits, Handle::current())
    }

    pub fn with_runtime(name: &'static str, limits: ExecutorLimits, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                limits,
                state: Mutex::new(ExecutorState {
                    queue: VecDeque::new(),
                    active: 0,
                }),
                runtime,
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                abandoned: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn limits(&self) -> ExecutorLimits {
        self.shared.limits
    }

    /// Admit `op`. Returns immediately: either a handle that resolves once
    /// the operation settles, or a rejection when the queue is full.
    pub fn submit(&self, op: O) -> Result<Completion<O::Output, O::Error>, SubmitError> {
        let shared = &self.shared;
        let (done, rx) = oneshot::channel();
        let task = Task {
            id: Uuid::new_v4(),
            op,
            submitted_at: Instant::now(),
            done,
        };

        let mut state = mutex_lock(&shared.state, SOURCE, "submit");
        if state.active < shared.limits.max_concurrency.get() && state.queue.is_empty() {
            state.active += 1;
            let active = state.active;
            drop(state);
            gauge!(METRIC_ACTIVE, "executor" => shared.name).set(active as f64);
            Shared::start(shared, task);
        } else if state.queue.len() >= shared.limits.max_queue_depth {
            let depth = state.queue.len();
            drop(state);
            shared.rejected.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_REJECTED, "executor" => shared.name).increment(1);
            warn!(
                target = "kirie::executor",
                executor = shared.name,
                kind = task.op.kind(),
                depth,
                "Executor queue full; submission rejected"
            );
            return Err(SubmitError::QueueFull {
                executor: shared.name,
                depth,
            });
        } else {
            debug!(
                target = "kirie::executor",
                executor = shared.name,
                task_id = %task.id,
                kind = task.op.kind(),
                "Operation queued"
            );
            state.queue.push_back(task);
            let queued = state.queue.len();
            drop(state);
            gauge!(METRIC_QUEUE_LEN, "executor" => shared.name).set(queued as f64);
        }

        Ok(Completion { rx })
    }

    pub fn queue_len(&self) -> usize {
        mutex_lock(&self.shared.state, SOURCE, "queue_len")
            .queue
            .len()
    }

    pub fn active_count(&self) -> usize {
        mutex_lock(&self.shared.state, SOURCE, "active_count").active
    }

    pub fn stats(&self) -> ExecutorStats {
        let shared = &self.shared;
        let (active, queued) = {
            let state = mutex_lock(&shared.state, SOURCE, "stats");
            (state.active, state.queue.len())
        };
        ExecutorStats {
            active,
            queued,
            max_concurrency: shared.limits.max_concurrency.get(),
            max_queue_depth: shared.limits.max_queue_depth,
            completed: shared.completed.load(Ordering::Relaxed),
            failed: shared.failed.load(Ordering::Relaxed),
            rejected: shared.rejected.load(Ordering::Relaxed),
            abandoned: shared.abandoned.load(Ordering::Relaxed),
        }
    }
}

impl<O: Operation> Shared<O> {
    /// Run a task that already owns an active slot.
    fn start(this: &Arc<Self>, task: Task<O>) {
        let Task {
            id,
            op,
            submitted_at,
            done,
        } = task;
        let waited = submitted_at.elapsed();
        histogram!(METRIC_QUEUE_WAIT, "executor" => this.name).record(waited.as_secs_f64() * 1000.0);
        let kind = op.kind();
        debug!(
            target = "kirie::executor",
            executor = this.name,
            task_id = %id,
            kind,
            waited_ms = waited.as_millis() as u64,
            "Operation started"
        );

        let slot = SlotGuard {
            shared: Arc::clone(this),
        };
        let shared = Arc::clone(this);
        this.runtime.spawn(async move {
            let outcome = match tokio::task::spawn_blocking(move || op.execute()).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(err)) => Err(TaskError::Failed(err)),
                Err(join) if join.is_panic() => {
                    Err(TaskError::Panicked(panic_message(join.into_panic())))
                }
                Err(_) => Err(TaskError::Cancelled),
            };

            match &outcome {
                Ok(_) => {
                    shared.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target = "kirie::executor",
                        executor = shared.name,
                        task_id = %id,
                        kind,
                        failure = task_failure_label(err),
                        "Operation failed"
                    );
                }
            }

            // Promote the next task before waking the caller.
            drop(slot);
            let _ = done.send(outcome);
        });
    }

    /// Release one active slot and hand it straight to the oldest queued
    /// task whose caller is still waiting.
    fn finish(this: &Arc<Self>) {
        let mut state = mutex_lock(&this.state, SOURCE, "finish");
        let mut skipped = Vec::new();
        let next = loop {
            match state.queue.pop_front() {
                Some(task) if task.done.is_closed() => skipped.push(task),
                other => break other,
            }
        };
        if next.is_none() {
            state.active = state.active.saturating_sub(1);
        }
        let (active, queued) = (state.active, state.queue.len());
        drop(state);

        if !skipped.is_empty() {
            this.abandoned
                .fetch_add(skipped.len() as u64, Ordering::Relaxed);
            for task in skipped {
                debug!(
                    target = "kirie::executor",
                    executor = this.name,
                    task_id = %task.id,
                    kind = task.op.kind(),
                    "Caller gone; queued operation skipped"
                );
            }
        }

        gauge!(METRIC_ACTIVE, "executor" => this.name).set(active as f64);
        gauge!(METRIC_QUEUE_LEN, "executor" => this.name).set(queued as f64);
        if let Some(task) = next {
            Self::start(this, task);
        }
    }
}

/// Returns the active slot when the running task ends, however it ends.
struct SlotGuard<O: Operation> {
    shared: Arc<Shared<O>>,
}

impl<O: Operation> Drop for SlotGuard<O> {
    fn drop(&mut self) {
        Shared::finish(&self.shared);
    }
}

fn task_failure_label<E>(err: &TaskError<E>) -> &'static str {
    match err {
        TaskError::Failed(_) => "failed",
        TaskError::Panicked(_) => "panicked",
        TaskError::Cancelled => "cancelled",
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Resolves with the result of one submitted operation.
///
/// Dropping it while the operation is still queued means it never starts.
/// Once running, the operation finishes and its result is discarded.
pub struct Completion<T, E> {
    rx: oneshot::Receiver<Result<T, TaskError<E>>>,
}

impl<T, E> Future for Completion<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Cancelled)))
    }
}
