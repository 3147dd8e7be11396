//! Per-file task bookkeeping: status records, the shared status table, and
//! the event sink collaborators subscribe to.
//!
//! Every discovered PDF gets exactly one [`ProcessingTask`] for the lifetime
//! of the run. Records are never deleted — a status-table collaborator (UI,
//! log stream) can always render the full history of the run. The table is
//! the only state shared between workers; everything else a worker touches
//! is owned by that worker.
//!
//! # Why a callback sink instead of a channel?
//!
//! The sink trait is the least-invasive integration point: callers can
//! forward events to a broadcast channel, a WebSocket, a database row, or a
//! terminal log line without the library knowing anything about how the
//! host application communicates. The trait is `Send + Sync` because
//! workers emit events concurrently.

use crate::error::TaskError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Opaque task identifier, unique within one run.
pub type TaskId = u64;

/// Lifecycle of one discovered file.
///
/// `Queued → Processing → Success | Error`. The two terminal states are
/// final: a task is never retried automatically and a file is never moved
/// twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Success,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error)
    }
}

/// One unit of work: a single discovered PDF moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: TaskId,
    /// Original path in the input directory.
    pub source: PathBuf,
    /// When the watcher first saw the file.
    pub discovered_at: DateTime<Utc>,
    pub status: TaskStatus,
    /// Human-readable failure reason, set for `Error` tasks.
    pub error: Option<String>,
    /// Final path in the output directory, set once the file was moved
    /// (including fallback-named rescue moves).
    pub destination: Option<PathBuf>,
}

/// Status-transition event delivered to the [`TaskEventSink`].
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub path: PathBuf,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<String>,
    pub destination: Option<PathBuf>,
}

/// Receives an event on every task status transition.
///
/// Implementations must be `Send + Sync`; workers emit concurrently. The
/// default implementation is a no-op so callers only override what they
/// care about.
pub trait TaskEventSink: Send + Sync {
    fn on_task_event(&self, event: &TaskEvent) {
        let _ = event;
    }
}

/// Sink that drops every event. Used when no sink is configured.
pub struct NoopSink;

impl TaskEventSink for NoopSink {}

#[derive(Default)]
struct TableInner {
    tasks: Vec<ProcessingTask>,
    by_path: HashMap<PathBuf, usize>,
    next_id: TaskId,
}

/// Shared table of every task in the run, in discovery order.
///
/// Mutated concurrently by workers, read concurrently by status reporters.
/// All critical sections are short field updates; events are emitted after
/// the lock is released so a slow sink cannot stall a worker holding it.
pub struct StatusTable {
    inner: Mutex<TableInner>,
    sink: Arc<dyn TaskEventSink>,
}

impl StatusTable {
    pub fn new(sink: Arc<dyn TaskEventSink>) -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
            sink,
        }
    }

    /// Register a newly discovered file in `Queued` state.
    ///
    /// Returns `None` when the path is already tracked in this run — the
    /// at-most-one-task-per-path invariant lives here, as the last line of
    /// defence behind the watcher's seen-set.
    pub fn admit(&self, source: &Path, discovered_at: DateTime<Utc>) -> Option<TaskId> {
        let event;
        let id;
        {
            let mut inner = self.lock();
            if inner.by_path.contains_key(source) {
                warn!("Ignoring duplicate discovery of {}", source.display());
                return None;
            }
            id = inner.next_id;
            inner.next_id += 1;
            let task = ProcessingTask {
                id,
                source: source.to_path_buf(),
                discovered_at,
                status: TaskStatus::Queued,
                error: None,
                destination: None,
            };
            event = self.event_for(&task);
            let idx = inner.tasks.len();
            inner.tasks.push(task);
            inner.by_path.insert(source.to_path_buf(), idx);
        }
        self.sink.on_task_event(&event);
        Some(id)
    }

    /// Move a task to `Processing`.
    pub fn mark_processing(&self, id: TaskId) {
        self.transition(id, TaskStatus::Processing, None, None);
    }

    /// Terminal success: the file now lives at `destination`.
    pub fn mark_success(&self, id: TaskId, destination: PathBuf) {
        self.transition(id, TaskStatus::Success, None, Some(destination));
    }

    /// Terminal failure. `destination` is set when the file was still
    /// rescued into the output directory under a fallback name.
    pub fn mark_error(&self, id: TaskId, error: &TaskError, destination: Option<PathBuf>) {
        self.transition(id, TaskStatus::Error, Some(error.to_string()), destination);
    }

    /// Snapshot of all tasks in discovery order.
    pub fn snapshot(&self) -> Vec<ProcessingTask> {
        self.lock().tasks.clone()
    }

    /// Number of tasks currently in `Processing`.
    pub fn processing_count(&self) -> usize {
        self.lock()
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Processing)
            .count()
    }

    /// Number of tasks in a terminal state.
    pub fn terminal_count(&self) -> usize {
        self.lock()
            .tasks
            .iter()
            .filter(|t| t.status.is_terminal())
            .count()
    }

    fn transition(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<String>,
        destination: Option<PathBuf>,
    ) {
        let event;
        {
            let mut inner = self.lock();
            let Some(task) = inner.tasks.iter_mut().find(|t| t.id == id) else {
                warn!("Status transition for unknown task {id}");
                return;
            };
            if task.status.is_terminal() {
                // Terminal states are final; a late transition is a bug in
                // the caller, not something to paper over silently.
                warn!(
                    "Ignoring transition of terminal task {} ({:?} -> {:?})",
                    id, task.status, status
                );
                return;
            }
            task.status = status;
            task.error = error;
            if destination.is_some() {
                task.destination = destination;
            }
            event = self.event_for(task);
        }
        self.sink.on_task_event(&event);
    }

    fn event_for(&self, task: &ProcessingTask) -> TaskEvent {
        TaskEvent {
            path: task.source.clone(),
            status: task.status,
            timestamp: Utc::now(),
            detail: task.error.clone(),
            destination: task.destination.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
