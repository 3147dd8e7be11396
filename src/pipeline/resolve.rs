//! Collision resolution: turn a proposed base name into a destination path
//! that is guaranteed to be unused, and perform the move while that
//! guarantee still holds.
//!
//! ## Why resolve and move under one lock?
//!
//! The destination directory's filename namespace is shared by every
//! worker. Two workers whose documents classify to the same base name would
//! otherwise both probe `X.pdf`, both find it free, and the second move
//! would clobber the first. The resolver therefore serialises the
//! check-then-move pair per destination directory; the probe alone stays
//! public because it is pure and useful for callers that only want to
//! preview a name.

use crate::error::TaskError;
use crate::pipeline::classify::sanitize_filename;
use crate::pipeline::move_file;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Resolves final filenames inside one destination directory and owns the
/// move that claims them.
pub struct CollisionResolver {
    dest_dir: PathBuf,
    // Serialises probe+move per destination directory.
    lock: Mutex<()>,
}

impl CollisionResolver {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// First unused destination path for `base`: `base.pdf`, then
    /// `base_1.pdf`, `base_2.pdf`, …
    ///
    /// Pure with respect to the filesystem — probing twice against an
    /// unchanged directory yields the same path. Racy on its own; use
    /// [`resolve_and_move`](Self::resolve_and_move) to actually claim the
    /// name.
    pub fn probe(&self, base: &str) -> PathBuf {
        let candidate = self.dest_dir.join(format!("{base}.pdf"));
        if !candidate.exists() {
            return candidate;
        }
        let mut counter = 1u32;
        loop {
            let candidate = self.dest_dir.join(format!("{base}_{counter}.pdf"));
            if !candidate.exists() {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Resolve the final name for `base` and move `source` there, as one
    /// atomic unit with respect to other workers of this resolver.
    pub async fn resolve_and_move(&self, base: &str, source: &Path) -> Result<PathBuf, TaskError> {
        let _guard = self.lock.lock().await;
        let dest = self.probe(base);
        debug!("Resolved '{}' → {}", base, dest.display());
        move_file::move_file(source, &dest).await?;
        Ok(dest)
    }

    /// Deterministic fallback base name for a file that could not be
    /// classified: derived from the original file name plus the discovery
    /// timestamp, so nothing is ever silently lost or left stuck in the
    /// inbox.
    pub fn fallback_base(source: &Path, discovered_at: DateTime<Utc>) -> String {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem: String = sanitize_filename(&stem)
            .unwrap_or_else(|_| "document".to_string())
            .chars()
            .take(40)
            .collect();
        format!(
            "{stem}_unclassified_{}",
            discovered_at.format("%Y%m%d-%H%M%S")
        )
    }
}
