//! # pdf-renamer
//!
//! Watch a directory for incoming PDFs and file each one away under a
//! content-derived name, classified by a vision language model (VLM).
//!
//! ## Why this crate?
//!
//! Scanner inboxes fill up with `scan_0001.pdf`, `Dokument (3).pdf`, and
//! friends. The information needed for a useful name — issue date, issuing
//! company, document type — is sitting right there on the first page, but
//! nobody renames by hand. This crate reads the page the way a human would
//! (rendered image plus extracted text, sent to a VLM) and moves the file
//! into an archive directory as `2024-05-01_AcmeCorp_Invoice_998.pdf`.
//!
//! ## Pipeline Overview
//!
//! ```text
//! inbox/*.pdf
//!  │
//!  ├─ 1. Watch     filesystem creation events, bounded discovery queue
//!  ├─ 2. Admit     status table entry, at most one task per path
//!  ├─ 3. Extract   rasterise + text via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 4. Classify  VLM proposes YYYY-MM-DD_Entity_DocType_Id (retry/backoff)
//!  ├─ 5. Resolve   collision-free destination (suffix _1, _2, …)
//!  └─ 6. Move      atomic rename into the output directory
//! ```
//!
//! Every file reaches exactly one terminal status, `Success` or `Error`.
//! Files the classifier cannot name are still moved out of the inbox, under
//! a fallback name built from the original stem and discovery time, so the
//! watched directory always drains.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_renamer::{Pipeline, RenameConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = RenameConfig::builder("~/Scans/inbox", "~/Scans/filed")
//!         .scan_on_start(true)
//!         .build()?;
//!     let mut pipeline = Pipeline::start(config).await?;
//!     tokio::signal::ctrl_c().await?;
//!     pipeline.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfrename` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdf-renamer = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod task;
pub mod watcher;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{RenameConfig, RenameConfigBuilder};
pub use error::{RenameError, TaskError};
pub use orchestrator::Pipeline;
pub use pipeline::classify::{Classifier, LlmClassifier};
pub use pipeline::extract::{ContentExtractor, ExtractedContent, PageImage, PdfiumExtractor};
pub use task::{ProcessingTask, TaskEvent, TaskEventSink, TaskId, TaskStatus};
pub use watcher::WatcherPhase;
