//! Content extraction: open a PDF read-only and produce the text and page
//! images the classifier will see.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the blocking
//! thread pool so the watcher and the other workers never stall behind a
//! rasterisation.
//!
//! ## Why probe before opening?
//!
//! Filesystem "created" events routinely fire while the writer is still
//! flushing. A zero-length file or missing `%PDF` magic at that moment is
//! expected; the cheap probe turns it into a retryable
//! [`TaskError::UnreadableDocument`] instead of a pdfium parse failure deep
//! inside the C library.

use crate::config::RenameConfig;
use crate::error::TaskError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A rendered page image, encoded for transport in an API request body.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Base64-encoded PNG bytes.
    pub base64: String,
    /// Always `image/png` today; kept explicit so the classifier never has
    /// to guess.
    pub mime_type: &'static str,
}

/// Everything extracted from one PDF, in page order.
///
/// Owned by the worker processing the task and discarded after
/// classification; nothing here outlives the pipeline run for its file.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// The source file the content came from.
    pub source: PathBuf,
    /// Per-page text, possibly empty strings for image-only scans.
    pub pages_text: Vec<String>,
    /// Rendered page images, capped at `max_classify_pages`.
    pub page_images: Vec<PageImage>,
}

impl ExtractedContent {
    /// Text of the first page, if any was extractable.
    pub fn first_page_text(&self) -> Option<&str> {
        self.pages_text
            .first()
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Boundary the worker calls to turn a path into classifiable content.
///
/// Production uses [`PdfiumExtractor`]; tests inject stubs that answer
/// without touching pdfium.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Extract content from the PDF at `path`. Must not mutate or delete
    /// the source file.
    async fn extract(&self, path: &Path) -> Result<ExtractedContent, TaskError>;
}

/// pdfium-backed extractor: text layer plus rasterised page images.
pub struct PdfiumExtractor {
    max_pages: usize,
    max_pixels: u32,
    include_text: bool,
}

impl PdfiumExtractor {
    pub fn new(max_pages: usize, max_pixels: u32, include_text: bool) -> Self {
        Self {
            max_pages: max_pages.max(1),
            max_pixels,
            include_text,
        }
    }

    pub fn from_config(config: &RenameConfig) -> Self {
        Self::new(
            config.max_classify_pages,
            config.max_rendered_pixels,
            config.include_page_text,
        )
    }
}

#[async_trait]
impl ContentExtractor for PdfiumExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedContent, TaskError> {
        probe_pdf(path)?;

        let owned = path.to_path_buf();
        let source = path.to_path_buf();
        let max_pages = self.max_pages;
        let max_pixels = self.max_pixels;
        let include_text = self.include_text;

        tokio::task::spawn_blocking(move || {
            extract_blocking(&owned, max_pages, max_pixels, include_text)
        })
        .await
        .map_err(|e| TaskError::UnreadableDocument {
            path: source,
            detail: format!("extraction task panicked: {e}"),
        })?
    }
}

/// Cheap readability probe: file exists, is non-empty, and starts with the
/// `%PDF` magic bytes.
pub(crate) fn probe_pdf(path: &Path) -> Result<(), TaskError> {
    let unreadable = |detail: String| TaskError::UnreadableDocument {
        path: path.to_path_buf(),
        detail,
    };

    let metadata = std::fs::metadata(path).map_err(|e| unreadable(e.to_string()))?;
    if metadata.len() == 0 {
        return Err(unreadable("zero-length file (writer may still be flushing)".into()));
    }

    let mut f = std::fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let mut magic = [0u8; 4];
    f.read_exact(&mut magic)
        .map_err(|e| unreadable(format!("could not read header: {e}")))?;
    if &magic != b"%PDF" {
        return Err(unreadable(format!("not a PDF, first bytes: {magic:?}")));
    }

    Ok(())
}

/// Blocking pdfium work: open, pull the text layer, rasterise pages.
fn extract_blocking(
    path: &Path,
    max_pages: usize,
    max_pixels: u32,
    include_text: bool,
) -> Result<ExtractedContent, TaskError> {
    let pdfium = Pdfium::default();

    let document =
        pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| TaskError::UnreadableDocument {
                path: path.to_path_buf(),
                detail: format!("{e:?}"),
            })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut pages_text = Vec::new();
    let mut page_images = Vec::new();

    for (idx, page) in document.pages().iter().take(max_pages).enumerate() {
        if include_text {
            let text = page.text().map(|t| t.all()).unwrap_or_default();
            pages_text.push(text);
        }

        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| TaskError::UnreadableDocument {
                    path: path.to_path_buf(),
                    detail: format!("rasterisation failed on page {}: {e:?}", idx + 1),
                })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} of {} → {}x{} px",
            idx + 1,
            path.display(),
            image.width(),
            image.height()
        );

        page_images.push(encode_page(&image, path, idx)?);
    }

    if page_images.is_empty() {
        return Err(TaskError::UnreadableDocument {
            path: path.to_path_buf(),
            detail: "document has no pages".into(),
        });
    }

    Ok(ExtractedContent {
        source: path.to_path_buf(),
        pages_text,
        page_images,
    })
}

/// Encode a rasterised page as base64 PNG.
///
/// PNG over JPEG: lossless compression keeps small print crisp, and OCR-ish
/// reading by the model degrades quickly with JPEG artefacts.
fn encode_page(img: &DynamicImage, path: &Path, idx: usize) -> Result<PageImage, TaskError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| TaskError::UnreadableDocument {
            path: path.to_path_buf(),
            detail: format!("image encoding failed on page {}: {e}", idx + 1),
        })?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page {} → {} bytes base64", idx + 1, b64.len());

    Ok(PageImage {
        base64: b64,
        mime_type: "image/png",
    })
}
