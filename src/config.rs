//! Configuration for an ingestion-to-rename run.
//!
//! All pipeline behaviour is controlled through [`RenameConfig`], built via
//! its [`RenameConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to hand a snapshot to the watcher and every worker, and to diff
//! two runs to understand why their outcomes differ.
//!
//! A config is immutable for the lifetime of a pipeline: changing the
//! directories or the model means stopping the pipeline and starting a new
//! one with a new config. Nothing here is mutated while the watcher is live.

use crate::error::RenameError;
use crate::pipeline::classify::Classifier;
use crate::pipeline::extract::ContentExtractor;
use crate::task::TaskEventSink;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration for one pipeline run.
///
/// Built via [`RenameConfig::builder()`].
///
/// # Example
/// ```rust
/// use pdf_renamer::RenameConfig;
///
/// let config = RenameConfig::builder("/tmp/pdf-inbox", "/tmp/pdf-filed")
///     .model("gpt-4.1-nano")
///     .concurrency(4)
///     .scan_on_start(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RenameConfig {
    /// Directory watched for newly arrived PDFs.
    pub input_dir: PathBuf,

    /// Directory renamed files are moved into. Created at start if missing.
    /// Must differ from `input_dir`.
    pub output_dir: PathBuf,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses the
    /// provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `classifier`, the provider factory auto-detects
    /// one from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed classifier. Takes precedence over `provider_name` /
    /// `model`. This is also the injection point for tests.
    pub classifier: Option<Arc<dyn Classifier>>,

    /// Pre-constructed content extractor. Defaults to the pdfium-backed
    /// extractor when None.
    pub extractor: Option<Arc<dyn ContentExtractor>>,

    /// Sink receiving a `(path, status, timestamp, detail)` event on every
    /// task transition. Defaults to a no-op.
    pub event_sink: Option<Arc<dyn TaskEventSink>>,

    /// Number of files processed concurrently. Default: 4.
    ///
    /// Each worker runs one file's pipeline end-to-end; only the classifier
    /// call suspends for long. Raising this mostly raises pressure on the
    /// classifier API, not on the CPU.
    pub concurrency: usize,

    /// Capacity of the discovery queue between watcher and workers.
    /// Default: 64.
    ///
    /// A bounded queue keeps a bulk drop of thousands of files from turning
    /// into thousands of in-flight tasks. When the queue is full, the
    /// watcher's producer thread blocks until a worker frees a slot; no
    /// discovery is ever lost to a burst.
    pub queue_capacity: usize,

    /// Maximum retry attempts on a transient classifier failure. Default: 3.
    ///
    /// Timeouts and 5xx-class faults are usually short-lived. Auth errors
    /// are never retried regardless of this setting.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s, so N concurrent
    /// workers do not hammer a recovering API endpoint in lockstep.
    pub retry_backoff_ms: u64,

    /// Per-classifier-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// How many times an unreadable file is re-probed before giving up.
    /// Default: 3.
    ///
    /// Filesystem "created" events routinely fire before the writer has
    /// finished flushing; a zero-length or truncated PDF a moment after the
    /// event is normal, not fatal.
    pub stability_retries: u32,

    /// Delay between stability probes in milliseconds. Default: 500.
    pub stability_delay_ms: u64,

    /// Maximum number of page images sent to the classifier. Default: 4.
    ///
    /// The filename is almost always determined by the first page; later
    /// pages add tokens, cost, and latency for marginal signal.
    pub max_classify_pages: usize,

    /// Maximum rendered page dimension (width or height) in pixels.
    /// Default: 1600.
    ///
    /// A cap independent of page size: an A0 scan would otherwise produce
    /// an image beyond typical API upload limits.
    pub max_rendered_pixels: u32,

    /// Include extracted page text alongside the page images in the
    /// classification request. Default: true.
    pub include_page_text: bool,

    /// Enqueue PDFs already present in the input directory at start.
    /// Default: false — pre-existing entries are otherwise never
    /// retroactively processed.
    pub scan_on_start: bool,
}

impl fmt::Debug for RenameConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenameConfig")
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("classifier", &self.classifier.as_ref().map(|_| "<dyn Classifier>"))
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn ContentExtractor>"))
            .field("concurrency", &self.concurrency)
            .field("queue_capacity", &self.queue_capacity)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("stability_retries", &self.stability_retries)
            .field("stability_delay_ms", &self.stability_delay_ms)
            .field("max_classify_pages", &self.max_classify_pages)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("include_page_text", &self.include_page_text)
            .field("scan_on_start", &self.scan_on_start)
            .finish()
    }
}

impl RenameConfig {
    /// Create a new builder with the two mandatory paths.
    pub fn builder(input_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> RenameConfigBuilder {
        RenameConfigBuilder {
            config: RenameConfig {
                input_dir: input_dir.as_ref().to_path_buf(),
                output_dir: output_dir.as_ref().to_path_buf(),
                model: None,
                provider_name: None,
                classifier: None,
                extractor: None,
                event_sink: None,
                concurrency: 4,
                queue_capacity: 64,
                max_retries: 3,
                retry_backoff_ms: 500,
                api_timeout_secs: 60,
                stability_retries: 3,
                stability_delay_ms: 500,
                max_classify_pages: 4,
                max_rendered_pixels: 1600,
                include_page_text: true,
                scan_on_start: false,
            },
        }
    }
}

/// Builder for [`RenameConfig`].
#[derive(Debug)]
pub struct RenameConfigBuilder {
    config: RenameConfig,
}

impl RenameConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.config.classifier = Some(classifier);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn TaskEventSink>) -> Self {
        self.config.event_sink = Some(sink);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn stability_retries(mut self, n: u32) -> Self {
        self.config.stability_retries = n;
        self
    }

    pub fn stability_delay_ms(mut self, ms: u64) -> Self {
        self.config.stability_delay_ms = ms;
        self
    }

    pub fn max_classify_pages(mut self, n: usize) -> Self {
        self.config.max_classify_pages = n.max(1);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn include_page_text(mut self, v: bool) -> Self {
        self.config.include_page_text = v;
        self
    }

    pub fn scan_on_start(mut self, v: bool) -> Self {
        self.config.scan_on_start = v;
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Directory existence is deliberately *not* checked here — that happens
    /// at [`crate::orchestrator::Pipeline::start`], against the filesystem
    /// state at start time.
    pub fn build(self) -> Result<RenameConfig, RenameError> {
        let c = &self.config;
        if c.input_dir.as_os_str().is_empty() || c.output_dir.as_os_str().is_empty() {
            return Err(RenameError::InvalidConfig(
                "input and output directories must be non-empty paths".into(),
            ));
        }
        if c.input_dir == c.output_dir {
            return Err(RenameError::SameInputOutput {
                path: c.input_dir.clone(),
            });
        }
        if c.concurrency == 0 {
            return Err(RenameError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}
