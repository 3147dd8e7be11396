//! Integration tests for the full watch → classify → move pipeline.
//!
//! These run against real directories and real filesystem events, with the
//! extractor and classifier stubbed out so no pdfium library and no API key
//! is needed. One live test at the bottom exercises the real stack and is
//! gated behind `E2E_ENABLED`.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use pdf_renamer::pipeline::extract::ExtractedContent;
use pdf_renamer::{
    Classifier, ContentExtractor, Pipeline, RenameConfig, RenameConfigBuilder, TaskError,
    TaskStatus,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Extractor that accepts any file with the PDF magic and returns canned
/// first-page text, skipping pdfium entirely.
struct StubExtractor;

#[async_trait]
impl ContentExtractor for StubExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedContent, TaskError> {
        let bytes = std::fs::read(path).map_err(|e| TaskError::UnreadableDocument {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        if !bytes.starts_with(b"%PDF") {
            return Err(TaskError::UnreadableDocument {
                path: path.to_path_buf(),
                detail: "not a PDF".into(),
            });
        }
        Ok(ExtractedContent {
            source: path.to_path_buf(),
            pages_text: vec!["Invoice 998, Acme Corp, 2024-05-01".into()],
            page_images: Vec::new(),
        })
    }
}

/// Classifier returning a fixed name, counting concurrent calls.
struct SleepyClassifier {
    name: String,
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl SleepyClassifier {
    fn new(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Classifier for SleepyClassifier {
    async fn classify(&self, _content: &ExtractedContent) -> Result<String, TaskError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(self.name.clone())
    }
}

/// Classifier whose API is permanently down.
struct DownClassifier;

#[async_trait]
impl Classifier for DownClassifier {
    async fn classify(&self, _content: &ExtractedContent) -> Result<String, TaskError> {
        Err(TaskError::ClassificationUnavailable {
            attempts: 1,
            detail: "connection refused".into(),
            auth: false,
        })
    }
}

struct Dirs {
    _root: tempfile::TempDir,
    inbox: PathBuf,
    filed: PathBuf,
}

fn dirs() -> Dirs {
    let root = tempfile::tempdir().unwrap();
    let inbox = root.path().join("inbox");
    let filed = root.path().join("filed");
    std::fs::create_dir(&inbox).unwrap();
    Dirs {
        _root: root,
        inbox,
        filed,
    }
}

fn test_builder(dirs: &Dirs, classifier: Arc<dyn Classifier>) -> RenameConfigBuilder {
    RenameConfig::builder(&dirs.inbox, &dirs.filed)
        .classifier(classifier)
        .extractor(Arc::new(StubExtractor))
        .stability_retries(1)
        .stability_delay_ms(10)
        .max_retries(0)
        .retry_backoff_ms(1)
}

fn drop_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4\nfake body for tests\n%%EOF\n").unwrap();
    path
}

/// Poll until `pred` holds or five seconds elapse.
async fn wait_until(mut pred: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !pred() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn terminal_count(pipeline: &Pipeline) -> usize {
    pipeline
        .status()
        .iter()
        .filter(|t| t.status.is_terminal())
        .count()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn renames_a_dropped_file_end_to_end() {
    let d = dirs();
    let classifier = SleepyClassifier::new("2024-05-01_AcmeCorp_Invoice_998", Duration::ZERO);
    let config = test_builder(&d, classifier).build().unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    let source = drop_pdf(&d.inbox, "scan_0047.pdf");
    wait_until(|| terminal_count(&pipeline) == 1).await;
    pipeline.stop().await;

    let tasks = pipeline.status();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Success);
    assert_eq!(tasks[0].source, source);

    let dest = d.filed.join("2024-05-01_AcmeCorp_Invoice_998.pdf");
    assert_eq!(tasks[0].destination.as_deref(), Some(dest.as_path()));
    assert!(dest.is_file());
    assert!(!source.exists(), "source must leave the inbox");
}

#[tokio::test]
async fn colliding_names_get_numeric_suffixes() {
    let d = dirs();
    let classifier = SleepyClassifier::new("2024-05-01_AcmeCorp_Invoice_998", Duration::ZERO);
    let config = test_builder(&d, classifier).build().unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    drop_pdf(&d.inbox, "first.pdf");
    wait_until(|| terminal_count(&pipeline) == 1).await;
    drop_pdf(&d.inbox, "second.pdf");
    wait_until(|| terminal_count(&pipeline) == 2).await;
    pipeline.stop().await;

    assert!(d.filed.join("2024-05-01_AcmeCorp_Invoice_998.pdf").is_file());
    assert!(d
        .filed
        .join("2024-05-01_AcmeCorp_Invoice_998_1.pdf")
        .is_file());
    assert!(pipeline
        .status()
        .iter()
        .all(|t| t.status == TaskStatus::Success));
}

#[tokio::test]
async fn worker_pool_never_exceeds_configured_concurrency() {
    let d = dirs();
    for i in 0..6 {
        drop_pdf(&d.inbox, &format!("scan_{i}.pdf"));
    }

    let classifier = SleepyClassifier::new("2024-05-01_AcmeCorp_Invoice_998", Duration::from_millis(100));
    let config = test_builder(&d, Arc::clone(&classifier) as Arc<dyn Classifier>)
        .concurrency(2)
        .scan_on_start(true)
        .build()
        .unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    wait_until(|| terminal_count(&pipeline) == 6).await;
    pipeline.stop().await;

    assert!(
        classifier.peak.load(Ordering::SeqCst) <= 2,
        "at most 2 files may be classified at once, saw {}",
        classifier.peak.load(Ordering::SeqCst)
    );
    assert_eq!(std::fs::read_dir(&d.filed).unwrap().count(), 6);
    assert_eq!(std::fs::read_dir(&d.inbox).unwrap().count(), 0);
}

#[tokio::test]
async fn burst_larger_than_the_queue_loses_no_files() {
    let d = dirs();
    let classifier = SleepyClassifier::new("2024-05-01_AcmeCorp_Invoice_998", Duration::from_millis(20));
    let config = test_builder(&d, classifier)
        .queue_capacity(1)
        .concurrency(1)
        .build()
        .unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    for i in 0..8 {
        drop_pdf(&d.inbox, &format!("burst_{i}.pdf"));
    }
    wait_until(|| terminal_count(&pipeline) == 8).await;
    pipeline.stop().await;

    // Every file got a task and a terminal status; none stuck in the inbox.
    assert_eq!(pipeline.status().len(), 8);
    assert!(pipeline
        .status()
        .iter()
        .all(|t| t.status == TaskStatus::Success));
    assert_eq!(std::fs::read_dir(&d.inbox).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(&d.filed).unwrap().count(), 8);
}

#[tokio::test]
async fn startup_backlog_larger_than_the_queue_is_fully_drained() {
    let d = dirs();
    for i in 0..8 {
        drop_pdf(&d.inbox, &format!("old_{i}.pdf"));
    }

    let classifier = SleepyClassifier::new("2024-05-01_AcmeCorp_Invoice_998", Duration::from_millis(20));
    let config = test_builder(&d, classifier)
        .queue_capacity(1)
        .concurrency(1)
        .scan_on_start(true)
        .build()
        .unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    wait_until(|| terminal_count(&pipeline) == 8).await;
    pipeline.stop().await;

    assert_eq!(pipeline.status().len(), 8);
    assert_eq!(std::fs::read_dir(&d.inbox).unwrap().count(), 0);
}

#[tokio::test]
async fn garbage_file_is_rescued_under_fallback_name() {
    let d = dirs();
    let classifier = SleepyClassifier::new("unused", Duration::ZERO);
    let config = test_builder(&d, classifier).build().unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    let source = d.inbox.join("broken.pdf");
    std::fs::write(&source, b"this is not a pdf at all").unwrap();
    wait_until(|| terminal_count(&pipeline) == 1).await;
    pipeline.stop().await;

    let tasks = pipeline.status();
    assert_eq!(tasks[0].status, TaskStatus::Error);
    assert!(tasks[0].error.is_some());

    // The file still left the inbox, under a fallback name.
    let dest = tasks[0].destination.as_ref().expect("rescue destination");
    assert!(dest.file_name().unwrap().to_str().unwrap().contains("_unclassified_"));
    assert!(dest.is_file());
    assert!(!source.exists());
}

#[tokio::test]
async fn classifier_outage_still_drains_the_inbox() {
    let d = dirs();
    let config = test_builder(&d, Arc::new(DownClassifier)).build().unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    let source = drop_pdf(&d.inbox, "urgent_scan.pdf");
    wait_until(|| terminal_count(&pipeline) == 1).await;
    pipeline.stop().await;

    let tasks = pipeline.status();
    assert_eq!(tasks[0].status, TaskStatus::Error);
    let dest = tasks[0].destination.as_ref().expect("rescue destination");
    let name = dest.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("urgent_scan_unclassified_"), "got {name}");
    assert!(dest.is_file());
    assert!(!source.exists());
}

#[tokio::test]
async fn stop_waits_for_in_flight_files() {
    let d = dirs();
    drop_pdf(&d.inbox, "slow.pdf");

    let classifier = SleepyClassifier::new("2024-05-01_AcmeCorp_Invoice_998", Duration::from_millis(200));
    let config = test_builder(&d, classifier)
        .scan_on_start(true)
        .build()
        .unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    // Give the scan a moment to admit the file, then stop mid-flight.
    wait_until(|| !pipeline.status().is_empty()).await;
    pipeline.stop().await;

    // stop() must not return before the file reached a terminal state.
    let tasks = pipeline.status();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Success);
    assert!(d.filed.join("2024-05-01_AcmeCorp_Invoice_998.pdf").is_file());
}

#[tokio::test]
async fn non_pdf_files_are_ignored() {
    let d = dirs();
    let classifier = SleepyClassifier::new("unused", Duration::ZERO);
    let config = test_builder(&d, classifier).build().unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    std::fs::write(d.inbox.join("notes.txt"), b"hello").unwrap();
    drop_pdf(&d.inbox, "real.pdf");
    wait_until(|| terminal_count(&pipeline) == 1).await;
    pipeline.stop().await;

    // Only the PDF ever became a task.
    assert_eq!(pipeline.status().len(), 1);
    assert!(d.inbox.join("notes.txt").exists());
}

// ── Live test (real pdfium + real LLM API) ───────────────────────────────────

/// Skip unless E2E_ENABLED is set and a real sample PDF is provided.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run the live test");
            return;
        }
        let Ok(sample) = std::env::var("PDFRENAME_E2E_PDF") else {
            println!("SKIP — set PDFRENAME_E2E_PDF to a sample PDF path");
            return;
        };
        let p = PathBuf::from(sample);
        if !p.is_file() {
            println!("SKIP — sample file not found: {}", p.display());
            return;
        }
        p
    }};
}

#[tokio::test]
async fn live_rename_with_real_stack() {
    let sample = e2e_skip_unless_ready!();

    let d = dirs();
    // Real extractor and classifier: no injections at all.
    let config = RenameConfig::builder(&d.inbox, &d.filed)
        .scan_on_start(true)
        .build()
        .unwrap();

    std::fs::copy(&sample, d.inbox.join("sample.pdf")).unwrap();
    let mut pipeline = Pipeline::start(config).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    while terminal_count(&pipeline) < 1 {
        assert!(tokio::time::Instant::now() < deadline, "live run timed out");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    pipeline.stop().await;

    let tasks = pipeline.status();
    assert_eq!(tasks[0].status, TaskStatus::Success, "{:?}", tasks[0].error);
    let dest = tasks[0].destination.as_ref().unwrap();
    println!("renamed to {}", dest.display());
    assert!(dest.is_file());
}
