//! Processing orchestrator: the pipeline context object that ties watcher,
//! queue, worker pool, and status table together for one run.
//!
//! ## Scheduling model
//!
//! One watcher feeds a bounded discovery queue; a dispatcher task admits
//! each discovery into the status table and hands it to the worker pool.
//! The pool is a `Semaphore` with `concurrency` permits gating a `JoinSet`:
//! a file's pipeline only spawns once a permit is free, so no more than N
//! files are ever in `Processing` at once, and a burst of discoveries waits
//! in the queue instead of fanning out into unbounded tasks.
//!
//! ## Shutdown
//!
//! [`Pipeline::stop`] stops the watcher first, which drops the queue's
//! only sender. The dispatcher drains what is already queued, waits for
//! in-flight workers to reach their terminal status, and exits. There is no
//! mid-pipeline cancellation: a file that started processing finishes (or
//! fails) on its own terms.

use crate::config::RenameConfig;
use crate::error::RenameError;
use crate::pipeline::classify::{Classifier, LlmClassifier};
use crate::pipeline::extract::{ContentExtractor, PdfiumExtractor};
use crate::pipeline::resolve::CollisionResolver;
use crate::pipeline::run_task;
use crate::task::{NoopSink, ProcessingTask, StatusTable};
use crate::watcher::{DirectoryWatcher, DiscoveredFile, WatcherPhase};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Everything the dispatcher and workers share for one run. Immutable
/// after start, except for the interior-mutable status table and resolver
/// lock.
struct Shared {
    config: RenameConfig,
    table: StatusTable,
    resolver: CollisionResolver,
    extractor: Arc<dyn ContentExtractor>,
    classifier: Arc<dyn Classifier>,
}

/// A running ingestion-to-rename pipeline.
///
/// Created by [`Pipeline::start`]; torn down by [`Pipeline::stop`] (or by
/// dropping it, which abandons the run without waiting for in-flight
/// files).
///
/// # Example
/// ```rust,no_run
/// use pdf_renamer::{Pipeline, RenameConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = RenameConfig::builder("/tmp/pdf-inbox", "/tmp/pdf-filed")
///         .model("gpt-4.1-nano")
///         .build()?;
///     let mut pipeline = Pipeline::start(config).await?;
///     tokio::signal::ctrl_c().await?;
///     pipeline.stop().await;
///     for task in pipeline.status() {
///         println!("{:?} {}", task.status, task.source.display());
///     }
///     Ok(())
/// }
/// ```
pub struct Pipeline {
    shared: Arc<Shared>,
    watcher: Option<DirectoryWatcher>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Validate the configuration against the filesystem, resolve the
    /// extractor and classifier, and bring the watcher to `Running`.
    ///
    /// Fails fatally — without processing anything — when the input
    /// directory is unusable, the output directory cannot be created, or
    /// no classifier can be built.
    pub async fn start(config: RenameConfig) -> Result<Self, RenameError> {
        let input_dir = config.input_dir.canonicalize().map_err(|e| {
            RenameError::ConfigurationInvalid {
                path: config.input_dir.clone(),
                detail: e.to_string(),
            }
        })?;

        // The original inbox tool creates its output directory on start;
        // keep that convenience.
        std::fs::create_dir_all(&config.output_dir).map_err(|e| {
            RenameError::ConfigurationInvalid {
                path: config.output_dir.clone(),
                detail: format!("cannot create output directory: {e}"),
            }
        })?;
        let output_dir = config.output_dir.canonicalize().map_err(|e| {
            RenameError::ConfigurationInvalid {
                path: config.output_dir.clone(),
                detail: e.to_string(),
            }
        })?;

        if input_dir == output_dir {
            return Err(RenameError::SameInputOutput { path: input_dir });
        }

        let extractor: Arc<dyn ContentExtractor> = match config.extractor.clone() {
            Some(extractor) => extractor,
            None => Arc::new(PdfiumExtractor::from_config(&config)),
        };
        let classifier: Arc<dyn Classifier> = match config.classifier.clone() {
            Some(classifier) => classifier,
            None => Arc::new(LlmClassifier::from_env(&config)?),
        };
        let sink = config
            .event_sink
            .clone()
            .unwrap_or_else(|| Arc::new(NoopSink));

        let shared = Arc::new(Shared {
            table: StatusTable::new(sink),
            resolver: CollisionResolver::new(&output_dir),
            extractor,
            classifier,
            config,
        });

        let (tx, rx) = mpsc::channel(shared.config.queue_capacity);
        let watcher = DirectoryWatcher::start(&input_dir, shared.config.scan_on_start, tx)?;

        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), rx));

        info!(
            "Pipeline running: {} → {} ({} workers)",
            input_dir.display(),
            output_dir.display(),
            shared.config.concurrency
        );

        Ok(Self {
            shared,
            watcher: Some(watcher),
            dispatcher: Some(dispatcher),
        })
    }

    /// Stop accepting new files and wait for in-flight ones to finish.
    ///
    /// Idempotent: a second call returns immediately.
    pub async fn stop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            // Releasing the subscription joins the notify thread, which may
            // be parked on a full discovery queue; run it off the runtime so
            // the dispatcher keeps draining the queue meanwhile.
            if tokio::task::spawn_blocking(move || watcher.stop()).await.is_err() {
                warn!("Watcher teardown panicked");
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.await.is_err() {
                warn!("Dispatcher task panicked during shutdown");
            }
        }
        info!("Pipeline stopped");
    }

    /// Current snapshot of every task, in discovery order.
    pub fn status(&self) -> Vec<ProcessingTask> {
        self.shared.table.snapshot()
    }

    /// Watcher phase, mainly for diagnostics.
    pub fn watcher_phase(&self) -> WatcherPhase {
        self.watcher
            .as_ref()
            .map(|w| w.phase())
            .unwrap_or(WatcherPhase::Stopped)
    }

    /// The resolved output directory for this run.
    pub fn output_dir(&self) -> PathBuf {
        self.shared.resolver.dest_dir().to_path_buf()
    }
}

// Trait-object fields and the dispatcher handle have no useful Debug.
impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("input_dir", &self.shared.config.input_dir)
            .field("output_dir", &self.shared.resolver.dest_dir())
            .field("watcher_phase", &self.watcher_phase())
            .finish_non_exhaustive()
    }
}

/// Receive discoveries until the watcher hangs up, gating each file's
/// pipeline behind a worker-pool permit.
async fn dispatch(shared: Arc<Shared>, mut rx: mpsc::Receiver<DiscoveredFile>) {
    let semaphore = Arc::new(Semaphore::new(shared.config.concurrency));
    let mut workers: JoinSet<()> = JoinSet::new();

    while let Some(discovered) = rx.recv().await {
        // Admission enforces at-most-one-task-per-path.
        let Some(id) = shared.table.admit(&discovered.path, discovered.discovered_at) else {
            continue;
        };

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        // Reap finished workers so the set does not grow with the run.
        while workers.try_join_next().is_some() {}

        let shared = Arc::clone(&shared);
        workers.spawn(async move {
            let _permit = permit;
            run_task(
                &shared.extractor,
                &shared.classifier,
                &shared.resolver,
                &shared.table,
                &shared.config,
                id,
                &discovered.path,
                discovered.discovered_at,
            )
            .await;
        });
    }

    debug!("Discovery queue closed, draining {} in-flight worker(s)", workers.len());
    while workers.join_next().await.is_some() {}
}
