//! Directory watcher: turns filesystem creation events into discovery
//! messages for the orchestrator.
//!
//! The watcher is a pure producer. It owns the senders of the bounded
//! discovery queue (the subscription callback plus, briefly, a startup-scan
//! thread) and the run's seen-set; nothing else writes either. One `notify`
//! subscription feeds a callback that filters events down to not-yet-seen
//! `*.pdf` files and forwards them; a full queue blocks the producer rather
//! than dropping the discovery, and all heavy work happens on the worker
//! side of the queue.
//!
//! ## Lifecycle
//!
//! `Stopped → Starting → Running → Stopping → Stopped`. `Starting`
//! verifies the input directory actually exists and is readable — a watch
//! on a missing directory would otherwise fail silently much later.
//! Dropping the watcher releases the notify subscription and, with it, the
//! queue sender, which is how the orchestrator learns the run is draining.

use crate::error::RenameError;
use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Watcher lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// One discovery: a PDF the watcher had not seen before in this run.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub discovered_at: DateTime<Utc>,
}

/// Live watch on the input directory.
///
/// Holds the `notify` subscription; dropping the struct unsubscribes and
/// closes the discovery queue.
pub struct DirectoryWatcher {
    phase: Arc<Mutex<WatcherPhase>>,
    input_dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl DirectoryWatcher {
    /// Verify the input directory, optionally scan it, and subscribe to
    /// creation events. On success the watcher is `Running`.
    ///
    /// `tx` is moved into the subscription callback — the watcher owns the
    /// queue's only sender.
    pub fn start(
        input_dir: &Path,
        scan_on_start: bool,
        tx: mpsc::Sender<DiscoveredFile>,
    ) -> Result<Self, RenameError> {
        let phase = Arc::new(Mutex::new(WatcherPhase::Starting));

        // Starting: the directory must exist and be readable now, not at
        // first event.
        let meta = std::fs::metadata(input_dir).map_err(|e| RenameError::ConfigurationInvalid {
            path: input_dir.to_path_buf(),
            detail: e.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(RenameError::ConfigurationInvalid {
                path: input_dir.to_path_buf(),
                detail: "not a directory".into(),
            });
        }
        let entries = std::fs::read_dir(input_dir).map_err(|e| RenameError::ConfigurationInvalid {
            path: input_dir.to_path_buf(),
            detail: format!("cannot list directory: {e}"),
        })?;

        // Entries present at start are enqueued only when explicitly asked;
        // either way they seed the seen-set so a coinciding create event
        // cannot double-enqueue them.
        let mut seen: HashSet<PathBuf> = HashSet::new();
        if scan_on_start {
            let mut backlog = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if !is_pdf_candidate(&path) || !path.is_file() {
                    continue;
                }
                seen.insert(path.clone());
                backlog.push(path);
            }
            info!("Startup scan found {} existing PDF(s)", backlog.len());
            if !backlog.is_empty() {
                // A backlog larger than the queue must not stall start();
                // drain it from a producer thread of its own, under the
                // same backpressure as live events.
                let scan_tx = tx.clone();
                std::thread::spawn(move || {
                    for path in backlog {
                        enqueue(&scan_tx, path);
                    }
                });
            }
        }

        let callback_phase = Arc::clone(&phase);
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("Watch error: {e}");
                    return;
                }
            };
            if !is_creation(&event.kind) {
                return;
            }
            if *lock_phase(&callback_phase) != WatcherPhase::Running {
                return;
            }
            for path in event.paths {
                if !is_pdf_candidate(&path) {
                    continue;
                }
                // Skip directories and symlinks; symlink_metadata does not
                // follow the link.
                match std::fs::symlink_metadata(&path) {
                    Ok(m) if m.is_file() => {}
                    _ => continue,
                }
                if !seen.insert(path.clone()) {
                    debug!("Already seen in this run: {}", path.display());
                    continue;
                }
                enqueue(&tx, path);
            }
        })
        .map_err(|e| RenameError::WatchFailed {
            path: input_dir.to_path_buf(),
            detail: e.to_string(),
        })?;

        watcher
            .watch(input_dir, RecursiveMode::NonRecursive)
            .map_err(|e| RenameError::WatchFailed {
                path: input_dir.to_path_buf(),
                detail: e.to_string(),
            })?;

        *lock_phase(&phase) = WatcherPhase::Running;
        info!("Watching {} for new PDFs", input_dir.display());

        Ok(Self {
            phase,
            input_dir: input_dir.to_path_buf(),
            watcher: Some(watcher),
        })
    }

    pub fn phase(&self) -> WatcherPhase {
        *lock_phase(&self.phase)
    }

    /// Stop enqueueing and release the subscription. In-flight work is the
    /// orchestrator's concern; the watcher only closes the producer side.
    pub fn stop(mut self) {
        *lock_phase(&self.phase) = WatcherPhase::Stopping;
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.input_dir) {
                debug!("Unwatch failed (already gone?): {e}");
            }
            // Dropping the watcher drops the callback and with it its
            // queue sender; the queue closes once any scan thread has
            // drained its backlog too.
        }
        *lock_phase(&self.phase) = WatcherPhase::Stopped;
        info!("Stopped watching {}", self.input_dir.display());
    }
}

// The notify handle has no useful Debug of its own.
impl fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("input_dir", &self.input_dir)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

fn enqueue(tx: &mpsc::Sender<DiscoveredFile>, path: PathBuf) {
    info!("New PDF detected: {}", path.display());
    let file = DiscoveredFile {
        path,
        discovered_at: Utc::now(),
    };
    // Blocks the producer thread while the queue is full. A burst larger
    // than the queue parks here instead of losing discoveries; every
    // forwarded file is guaranteed a task and, with it, a terminal status.
    if tx.blocking_send(file).is_err() {
        debug!("Discovery queue closed, pipeline is shutting down");
    }
}

/// A move into the watched directory is a creation from our point of view.
fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
            | EventKind::Modify(ModifyKind::Name(RenameMode::Both))
    )
}

/// Name-level filter: `.pdf` extension (case-insensitive), not hidden.
fn is_pdf_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn lock_phase(phase: &Arc<Mutex<WatcherPhase>>) -> std::sync::MutexGuard<'_, WatcherPhase> {
    phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const EVENT_WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn candidate_filter() {
        assert!(is_pdf_candidate(Path::new("/in/scan1.pdf")));
        assert!(is_pdf_candidate(Path::new("/in/SCAN1.PDF")));
        assert!(!is_pdf_candidate(Path::new("/in/notes.txt")));
        assert!(!is_pdf_candidate(Path::new("/in/.hidden.pdf")));
        assert!(!is_pdf_candidate(Path::new("/in/archive.pdf.part")));
        assert!(!is_pdf_candidate(Path::new("/in/no_extension")));
    }

    #[tokio::test]
    async fn refuses_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let err = DirectoryWatcher::start(&dir.path().join("missing"), false, tx).unwrap_err();
        assert!(matches!(err, RenameError::ConfigurationInvalid { .. }));
    }

    #[tokio::test]
    async fn refuses_file_as_input_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.pdf");
        std::fs::write(&file, b"%PDF").unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let err = DirectoryWatcher::start(&file, false, tx).unwrap_err();
        assert!(matches!(err, RenameError::ConfigurationInvalid { .. }));
    }

    #[tokio::test]
    async fn forwards_new_pdf_creations() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let watcher = DirectoryWatcher::start(dir.path(), false, tx).unwrap();
        assert_eq!(watcher.phase(), WatcherPhase::Running);

        std::fs::write(dir.path().join("scan1.pdf"), b"%PDF-1.7").unwrap();

        let discovered = timeout(EVENT_WAIT, rx.recv())
            .await
            .expect("watcher should report the new file")
            .unwrap();
        assert_eq!(discovered.path, dir.path().join("scan1.pdf"));

        watcher.stop();
    }

    #[tokio::test]
    async fn ignores_non_pdf_files() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let watcher = DirectoryWatcher::start(dir.path(), false, tx).unwrap();

        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("real.pdf"), b"%PDF-1.7").unwrap();

        // Only the PDF comes through.
        let discovered = timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(discovered.path, dir.path().join("real.pdf"));

        watcher.stop();
    }

    #[tokio::test]
    async fn preexisting_files_need_scan_on_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.pdf"), b"%PDF-1.7").unwrap();

        // Without the scan, nothing is enqueued for pre-existing entries.
        let (tx, mut rx) = mpsc::channel(8);
        let watcher = DirectoryWatcher::start(dir.path(), false, tx).unwrap();
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
        watcher.stop();

        // With it, the backlog is drained.
        let (tx, mut rx) = mpsc::channel(8);
        let watcher = DirectoryWatcher::start(dir.path(), true, tx).unwrap();
        let discovered = timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(discovered.path, dir.path().join("old.pdf"));
        watcher.stop();
    }

    #[tokio::test]
    async fn stop_closes_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let watcher = DirectoryWatcher::start(dir.path(), false, tx).unwrap();
        watcher.stop();

        // Sender dropped with the subscription: recv sees the end of the run.
        assert!(timeout(EVENT_WAIT, rx.recv()).await.unwrap().is_none());
    }
}
