//! File relocation: claim the resolved destination path.
//!
//! `rename(2)` is atomic within one filesystem, so it is always tried
//! first. When input and output directories live on different devices the
//! kernel refuses with `EXDEV`; the stage then degrades to copy + remove,
//! deleting the source only after the copy completed and cleaning up a
//! partial destination on failure. In every error path the source file is
//! left intact at its original location — a failed move must never lose
//! data.

use crate::error::TaskError;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Move `source` to `dest`. On success the file exists only at `dest`; on
/// failure it is untouched at `source`.
pub async fn move_file(source: &Path, dest: &Path) -> Result<(), TaskError> {
    match tokio::fs::rename(source, dest).await {
        Ok(()) => {
            debug!("Moved {} → {}", source.display(), dest.display());
            Ok(())
        }
        Err(e) if is_cross_device(&e) => {
            debug!(
                "rename across devices refused, copying {} → {}",
                source.display(),
                dest.display()
            );
            copy_then_remove(source, dest).await
        }
        Err(e) => Err(move_failed(source, dest, e.to_string())),
    }
}

async fn copy_then_remove(source: &Path, dest: &Path) -> Result<(), TaskError> {
    if let Err(e) = tokio::fs::copy(source, dest).await {
        // Drop the partial copy, if the copy got far enough to create one;
        // the source is still complete either way.
        match tokio::fs::remove_file(dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(_) => warn!("Could not clean up partial copy at {}", dest.display()),
        }
        return Err(move_failed(source, dest, format!("copy failed: {e}")));
    }

    if let Err(e) = tokio::fs::remove_file(source).await {
        // The copy is complete but the source lingers. Remove the copy so
        // the invariant "a file is never moved more than once" cannot be
        // violated by a later rediscovery of the source.
        if tokio::fs::remove_file(dest).await.is_err() {
            warn!("Source and copy both present after failed removal of {}", source.display());
        }
        return Err(move_failed(source, dest, format!("could not remove source: {e}")));
    }

    debug!("Copied {} → {} (cross-device)", source.display(), dest.display());
    Ok(())
}

fn move_failed(source: &Path, dest: &Path, detail: String) -> TaskError {
    TaskError::MoveFailed {
        src: source.to_path_buf(),
        dest: dest.to_path_buf(),
        detail,
    }
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    // EXDEV
    e.raw_os_error() == Some(18)
}

#[cfg(windows)]
fn is_cross_device(e: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    e.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}
