//! Background task registry.
//!
//! Every submitted work item runs on its own tokio task and owns the only
//! writer of its status (a `watch` sender). Readers take snapshots with
//! [`TaskRegistry::get`] or wait for completion with [`TaskRegistry::wait`];
//! neither can race the writer.
//!
//! Concurrency is bounded: at most `max_concurrent` work items execute at a
//! time and at most `max_pending` tasks (running plus queued) are admitted.
//! Submissions beyond that fail with `TaskQueueFull` instead of piling up.

use crate::config::Config;
use crate::error::{Result, VpoolError};
use crate::types::{Task, TaskStatus};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tracing::{debug, info, instrument, warn};

/// Message of a task that is waiting for a free worker slot.
pub const QUEUED_MESSAGE: &str = "queued";

/// Message of a task whose worker started and has not reported yet.
pub const RUNNING_MESSAGE: &str = "running";

/// Registry of background tasks.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    next_id: AtomicU64,
    tasks: RwLock<BTreeMap<u64, watch::Receiver<Task>>>,
    permits: Arc<Semaphore>,
    pending: AtomicUsize,
    max_pending: usize,
}

impl TaskRegistry {
    /// Create a registry running at most `max_concurrent` work items at once
    /// and admitting at most `max_pending` unfinished tasks.
    pub fn new(max_concurrent: usize, max_pending: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(0),
                tasks: RwLock::new(BTreeMap::new()),
                permits: Arc::new(Semaphore::new(max_concurrent)),
                pending: AtomicUsize::new(0),
                max_pending: max_pending.max(max_concurrent),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_concurrent_tasks, config.max_pending_tasks)
    }

    /// Schedule `work` on a background worker and return its task id.
    ///
    /// `work` receives a [`ProgressReporter`]. The task fails with the
    /// error's text if `work` returns `Err` or panics; returning `Ok` without
    /// reporting completion finishes it with the last message.
    #[instrument(skip(self, work))]
    pub async fn submit<F, Fut, E>(&self, target: Option<String>, work: F) -> Result<String>
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.admit()?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let task_id = id.to_string();
        let (tx, rx) = watch::channel(Task {
            id: task_id.clone(),
            target,
            status: TaskStatus::Running,
            message: QUEUED_MESSAGE.to_string(),
        });
        self.inner.tasks.write().await.insert(id, rx);

        let reporter = ProgressReporter { tx: Arc::new(tx) };
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let _slot = PendingSlot(inner.clone());

            let _permit = match inner.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    reporter.fail("task registry is shut down");
                    return;
                }
            };
            reporter.progress(RUNNING_MESSAGE);

            // The work item runs in its own task so a panic is caught here
            let worker_reporter = reporter.clone();
            let worker = tokio::spawn(async move { work(worker_reporter).await });

            match worker.await {
                Ok(Ok(())) => reporter.finish_if_running(),
                Ok(Err(e)) => reporter.fail(e.to_string()),
                Err(e) if e.is_panic() => {
                    reporter.fail(format!("task panicked: {}", panic_message(e.into_panic())))
                }
                Err(e) => reporter.fail(e.to_string()),
            }
        });

        metrics::counter!("vpool_tasks_submitted_total").increment(1);
        info!(task_id = %task_id, "Task submitted");
        Ok(task_id)
    }

    /// Snapshot of a task.
    pub async fn get(&self, task_id: &str) -> Result<Task> {
        let id = parse_id(task_id)?;
        let tasks = self.inner.tasks.read().await;
        tasks
            .get(&id)
            .map(|rx| rx.borrow().clone())
            .ok_or_else(|| VpoolError::TaskNotFound { task_id: task_id.to_string() })
    }

    /// Ids of all known tasks in submission order.
    pub async fn list(&self) -> Vec<String> {
        self.inner.tasks.read().await.keys().map(ToString::to_string).collect()
    }

    /// Wait until the task reaches a terminal status and return it.
    pub async fn wait(&self, task_id: &str) -> Result<Task> {
        let id = parse_id(task_id)?;
        let mut rx = self
            .inner
            .tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| VpoolError::TaskNotFound { task_id: task_id.to_string() })?;

        if let Ok(task) = rx.wait_for(|task| task.status.is_terminal()).await {
            return Ok(task.clone());
        }
        // Sender gone without a terminal report
        let task = rx.borrow().clone();
        Ok(task)
    }

    /// Forget a terminal task. Running tasks cannot be evicted.
    #[instrument(skip(self))]
    pub async fn evict(&self, task_id: &str) -> Result<Task> {
        let id = parse_id(task_id)?;
        let mut tasks = self.inner.tasks.write().await;
        let task = tasks
            .get(&id)
            .map(|rx| rx.borrow().clone())
            .ok_or_else(|| VpoolError::TaskNotFound { task_id: task_id.to_string() })?;

        if !task.status.is_terminal() {
            return Err(VpoolError::invalid(format!("task {} is still running", task_id)));
        }
        tasks.remove(&id);
        debug!(task_id, "Task evicted");
        Ok(task)
    }

    /// Tasks admitted and not yet terminal.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    fn admit(&self) -> Result<()> {
        let limit = self.inner.max_pending;
        self.inner
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .map_err(|pending| {
                warn!(pending, limit, "Task queue full, rejecting submission");
                metrics::counter!("vpool_tasks_rejected_total").increment(1);
                VpoolError::TaskQueueFull { pending, limit }
            })?;
        metrics::gauge!("vpool_tasks_pending").increment(1.0);
        Ok(())
    }
}

/// Releases an admission slot when the task's supervisor ends.
struct PendingSlot(Arc<Inner>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!("vpool_tasks_pending").decrement(1.0);
    }
}

/// Progress callback handed to a task's work item.
///
/// Reports after the task reached a terminal status are ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<Task>>,
}

impl ProgressReporter {
    pub fn task_id(&self) -> String {
        self.tx.borrow().id.clone()
    }

    /// Record `message`; `done` marks the task finished.
    ///
    /// Returns false when the task was already terminal.
    pub fn update(&self, message: impl Into<String>, done: bool) -> bool {
        let message = message.into();
        let applied = self.tx.send_if_modified(|task| {
            if task.status.is_terminal() {
                return false;
            }
            task.message = message;
            if done {
                task.status = TaskStatus::Finished;
            }
            true
        });
        if applied && done {
            metrics::counter!("vpool_tasks_finished_total").increment(1);
            info!(task_id = %self.task_id(), "Task finished");
        }
        applied
    }

    pub fn progress(&self, message: impl Into<String>) -> bool {
        self.update(message, false)
    }

    pub fn finish(&self, message: impl Into<String>) -> bool {
        self.update(message, true)
    }

    fn finish_if_running(&self) {
        let message = self.tx.borrow().message.clone();
        self.update(message, true);
    }

    fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        let applied = self.tx.send_if_modified(|task| {
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Failed;
            task.message = message.clone();
            true
        });
        if applied {
            metrics::counter!("vpool_tasks_failed_total").increment(1);
            warn!(task_id = %self.task_id(), error = %message, "Task failed");
        }
    }
}

fn parse_id(task_id: &str) -> Result<u64> {
    task_id.parse().map_err(|_| VpoolError::TaskNotFound { task_id: task_id.to_string() })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
