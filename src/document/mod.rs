//! Document handle boundary
//!
//! The pipelines only talk to documents through two traits:
//! - [`PageSource`]: read-only page geometry and rasterization
//! - [`OutputDocument`]: the mutable accumulator an export writes into
//!
//! `pdf` provides the `lopdf` backed geometry/output implementation and
//! `render` (feature `pdf`) the MuPDF rasterizer.

mod pdf;
#[cfg(feature = "pdf")]
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;

use crate::geometry::PageRect;

pub use pdf::PdfPages;
#[cfg(feature = "pdf")]
pub use render::MupdfDocument;

/// Where an opened document came from
#[derive(Clone, Debug)]
pub enum DocumentSource {
    /// File on disk, can be reopened fresh
    Path(PathBuf),
    /// In-memory stream, cannot be reopened
    Bytes(Arc<[u8]>),
}

impl DocumentSource {
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    #[must_use]
    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Whether a fresh copy can be obtained by opening the source again
    #[must_use]
    pub fn is_reopenable(&self) -> bool {
        matches!(self, Self::Path(_))
    }

    /// Short label for logs and messages
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes in memory>", bytes.len()),
        }
    }
}

/// Errors from document backends
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("cannot open {source_name}: {detail}")]
    Open { source_name: String, detail: String },

    #[error("page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("malformed page {page}: {detail}")]
    Malformed { page: usize, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DocumentError {
    pub fn open(source: &DocumentSource, detail: impl ToString) -> Self {
        Self::Open {
            source_name: source.describe(),
            detail: detail.to_string(),
        }
    }

    pub fn malformed(page: usize, detail: impl Into<String>) -> Self {
        Self::Malformed {
            page,
            detail: detail.into(),
        }
    }
}

/// Rasterization failure for a single page
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("page {page} out of range")]
    PageOutOfRange { page: usize },

    #[error("render backend: {0}")]
    Backend(String),

    #[error("rasterization is not available in this build")]
    Unavailable,
}

/// Read-only view of an opened document
pub trait PageSource {
    /// Number of pages
    fn page_count(&self) -> usize;

    /// Native rectangle of a page (top-left origin, y down)
    fn page_rect(&self, index: usize) -> Result<PageRect, DocumentError>;

    /// Rasterize a page at `scale` pixels per native unit
    fn render_page(&self, index: usize, scale: f32) -> Result<RgbImage, RenderError>;
}

impl<T: PageSource + ?Sized> PageSource for Arc<T> {
    fn page_count(&self) -> usize {
        (**self).page_count()
    }

    fn page_rect(&self, index: usize) -> Result<PageRect, DocumentError> {
        (**self).page_rect(index)
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<RgbImage, RenderError> {
        (**self).render_page(index, scale)
    }
}

impl<T: PageSource + ?Sized> PageSource for Box<T> {
    fn page_count(&self) -> usize {
        (**self).page_count()
    }

    fn page_rect(&self, index: usize) -> Result<PageRect, DocumentError> {
        (**self).page_rect(index)
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<RgbImage, RenderError> {
        (**self).render_page(index, scale)
    }
}

/// Open the rasterizer for `source`: MuPDF when built with the `pdf`
/// feature, otherwise a geometry-only backend whose renders fail.
pub fn open_renderer(source: &DocumentSource) -> Result<Box<dyn PageSource>, DocumentError> {
    #[cfg(feature = "pdf")]
    let renderer = MupdfDocument::open(source)?;
    #[cfg(not(feature = "pdf"))]
    let renderer = PdfPages::open(source)?;
    Ok(Box::new(renderer))
}

/// Mutable copy of a document that an export writes into
pub trait OutputDocument {
    fn page_count(&self) -> usize;

    /// Native rectangle of a page in the copy
    fn page_rect(&self, index: usize) -> Result<PageRect, DocumentError>;

    /// Place `image` opaquely into `rect` (native units) on page `index`
    fn insert_image(
        &mut self,
        index: usize,
        rect: PageRect,
        image: &RgbImage,
    ) -> Result<(), DocumentError>;

    /// Serialize the whole document
    fn write_to(&mut self, out: &mut dyn std::io::Write) -> Result<(), DocumentError>;
}
