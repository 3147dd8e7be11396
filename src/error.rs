//! Error types for the pdf-renamer library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RenameError`] — **Fatal**: the pipeline cannot start or keep running
//!   at all (missing input directory, watch subscription failed, no
//!   classifier configured). Returned as `Err(RenameError)` from
//!   [`crate::orchestrator::Pipeline::start`].
//!
//! * [`TaskError`] — **Per-file**: one discovered PDF failed a pipeline
//!   stage (partial file, classifier outage, destination write fault).
//!   Recorded on the owning [`crate::task::ProcessingTask`] so the watcher
//!   and the other workers keep running; a single bad scan never takes the
//!   run down.
//!
//! The separation lets callers decide their own tolerance: inspect the
//! status table for `Error` entries after a run, or react to each failure
//! live through a [`crate::task::TaskEventSink`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-renamer library.
///
/// Failures scoped to a single discovered file use [`TaskError`] and are
/// stored on the task record rather than propagated here.
#[derive(Debug, Error)]
pub enum RenameError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// The input directory is missing, not a directory, or not readable.
    #[error("Input directory '{path}' is not usable: {detail}\nThe watcher refuses to start against a directory it cannot read.")]
    ConfigurationInvalid { path: PathBuf, detail: String },

    /// Input and output resolve to the same directory.
    ///
    /// Renamed files would immediately re-trigger the watcher, so this is
    /// rejected at start rather than guarded per-event.
    #[error("Input and output directory are the same: '{path}'\nPoint --output at a different directory.")]
    SameInputOutput { path: PathBuf },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Startup errors ────────────────────────────────────────────────────
    /// The filesystem-notification subscription could not be established.
    #[error("Failed to watch '{path}': {detail}")]
    WatchFailed { path: PathBuf, detail: String },

    /// No classifier was injected and none could be built from the environment.
    #[error("No classifier available: {hint}\nSet OPENAI_API_KEY (or another provider key), or inject a classifier via RenameConfig.")]
    ClassifierUnavailable { hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single discovered file.
///
/// Stored on the [`crate::task::ProcessingTask`] when its pipeline run
/// fails. The watcher and all other workers continue unaffected.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum TaskError {
    /// The file is not a readable PDF: missing, zero-length, truncated, or
    /// not a PDF at all. Fires after the bounded stability retries, so a
    /// writer that was still flushing has had its chance.
    #[error("'{path}' is not a readable PDF: {detail}")]
    UnreadableDocument { path: PathBuf, detail: String },

    /// The classifier could not be reached, timed out, or refused the
    /// request. `auth: true` marks 401/403-class failures, which are never
    /// retried.
    #[error("Classifier unavailable after {attempts} attempt(s): {detail}")]
    ClassificationUnavailable {
        attempts: u32,
        detail: String,
        auth: bool,
    },

    /// The classifier answered, but the response could not be sanitised
    /// into a usable filename (empty, multi-line, or nothing left after
    /// stripping illegal characters).
    #[error("Classifier response unusable: {detail}")]
    ClassificationInvalid { detail: String },

    /// The move to the destination failed. The source file is untouched at
    /// its original path.
    // The field cannot be called `source` — thiserror reserves that name
    // for the error-cause chain.
    #[error("Failed to move '{src}' to '{dest}': {detail}")]
    MoveFailed {
        src: PathBuf,
        dest: PathBuf,
        detail: String,
    },
}

impl TaskError {
    /// Whether another attempt at the same stage could plausibly succeed.
    ///
    /// Drives the retry loops: unreadable documents are re-probed (writer
    /// may still be flushing) and transient classifier faults are re-sent
    /// with backoff. Auth failures and filesystem faults are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            TaskError::UnreadableDocument { .. } => true,
            TaskError::ClassificationUnavailable { auth, .. } => !auth,
            TaskError::ClassificationInvalid { .. } => false,
            TaskError::MoveFailed { .. } => false,
        }
    }
}
