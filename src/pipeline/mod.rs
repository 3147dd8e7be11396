//! Pipeline stages for the ingestion-to-rename run.
//!
//! Each submodule implements exactly one transformation step. Keeping the
//! stages separate makes each independently testable and lets us swap an
//! implementation (extractor, classifier) behind its trait without touching
//! the others.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ classify ──▶ resolve ──▶ move
//! (pdfium)     (VLM)      (collision)  (rename)
//! ```
//!
//! 1. [`extract`]  — probe readability, pull the text layer, rasterise
//!    pages; runs in `spawn_blocking` because pdfium is not async-safe
//! 2. [`classify`] — drive the vision-model call with retry/backoff; the
//!    only stage with network I/O
//! 3. [`resolve`]  — pick a collision-free destination name, serialised per
//!    destination directory
//! 4. [`move_file`] — claim the name with an atomic rename
//!
//! [`run_task`] sequences the four stages for one file. Stages are strictly
//! sequential per file; parallelism exists only across files, bounded by
//! the orchestrator.

pub mod classify;
pub mod extract;
pub mod move_file;
pub mod resolve;

use crate::config::RenameConfig;
use crate::error::TaskError;
use crate::task::{StatusTable, TaskId};
use chrono::{DateTime, Utc};
use classify::Classifier;
use extract::{ContentExtractor, ExtractedContent};
use resolve::CollisionResolver;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Run the full per-file pipeline for one discovered PDF.
///
/// Every outcome ends in a terminal status on the task: `Success` with the
/// destination, or `Error` with the reason — and, whenever the file could
/// still be rescued into the output directory under a fallback name, the
/// rescue destination too. Errors never escape to the caller; the worker
/// pool must survive any single file.
pub(crate) async fn run_task(
    extractor: &Arc<dyn ContentExtractor>,
    classifier: &Arc<dyn Classifier>,
    resolver: &CollisionResolver,
    table: &StatusTable,
    config: &RenameConfig,
    id: TaskId,
    source: &Path,
    discovered_at: DateTime<Utc>,
) {
    table.mark_processing(id);

    let proposed = match extract_stable(extractor, source, config).await {
        Ok(content) => classifier.classify(&content).await,
        Err(e) => Err(e),
    };

    match proposed {
        Ok(base) => match resolver.resolve_and_move(&base, source).await {
            Ok(dest) => {
                info!("Filed {} → {}", source.display(), dest.display());
                table.mark_success(id, dest);
            }
            Err(e) => {
                warn!("{e}");
                table.mark_error(id, &e, None);
            }
        },
        Err(stage_err) => {
            warn!(
                "Pipeline failed for {}, rescuing under fallback name: {stage_err}",
                source.display()
            );
            let fallback = CollisionResolver::fallback_base(source, discovered_at);
            match resolver.resolve_and_move(&fallback, source).await {
                Ok(dest) => {
                    info!("Rescued {} → {}", source.display(), dest.display());
                    table.mark_error(id, &stage_err, Some(dest));
                }
                Err(move_err) => {
                    // The file stays in the inbox; record the move failure
                    // (it names both paths) and log the original cause.
                    warn!("Fallback move also failed ({stage_err}): {move_err}");
                    table.mark_error(id, &move_err, None);
                }
            }
        }
    }
}

/// Extraction with bounded stability retries.
///
/// A "created" event often precedes the writer's final flush; an unreadable
/// file is re-probed `stability_retries` times with a constant
/// `stability_delay_ms` pause before the failure becomes terminal.
async fn extract_stable(
    extractor: &Arc<dyn ContentExtractor>,
    source: &Path,
    config: &RenameConfig,
) -> Result<ExtractedContent, TaskError> {
    let mut last: Option<TaskError> = None;

    for attempt in 0..=config.stability_retries {
        if attempt > 0 {
            debug!(
                "Re-probing {} (attempt {}/{})",
                source.display(),
                attempt,
                config.stability_retries
            );
            sleep(Duration::from_millis(config.stability_delay_ms)).await;
        }

        match extractor.extract(source).await {
            Ok(content) => return Ok(content),
            Err(e) if e.is_transient() => last = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last.unwrap_or_else(|| TaskError::UnreadableDocument {
        path: source.to_path_buf(),
        detail: "unknown extraction failure".into(),
    }))
}
