//! MuPDF rasterizer
//!
//! `mupdf::Document` is not `Send`: open one per thread that renders.

use image::RgbImage;
use log::debug;
use mupdf::{Colorspace, Document, Matrix, Pixmap};

use super::{DocumentError, DocumentSource, PageSource, RenderError};
use crate::geometry::PageRect;

const PDF_MAGIC: &str = "application/pdf";

pub struct MupdfDocument {
    doc: Document,
    page_count: usize,
}

impl MupdfDocument {
    pub fn open(source: &DocumentSource) -> Result<Self, DocumentError> {
        let doc = match source {
            DocumentSource::Path(path) => Document::open(path.to_string_lossy().as_ref()),
            DocumentSource::Bytes(bytes) => Document::from_bytes(bytes, PDF_MAGIC),
        }
        .map_err(|e| DocumentError::open(source, e))?;

        let page_count = doc
            .page_count()
            .map_err(|e| DocumentError::open(source, e))?;
        let page_count = usize::try_from(page_count).unwrap_or(0);
        debug!("MuPDF opened {} ({page_count} pages)", source.describe());

        Ok(Self { doc, page_count })
    }

    fn page_index(&self, index: usize) -> Option<i32> {
        (index < self.page_count)
            .then(|| i32::try_from(index).ok())
            .flatten()
    }
}

impl PageSource for MupdfDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_rect(&self, index: usize) -> Result<PageRect, DocumentError> {
        let number = self.page_index(index).ok_or(DocumentError::PageOutOfRange {
            page: index,
            count: self.page_count,
        })?;
        let bounds = self
            .doc
            .load_page(number)
            .and_then(|page| page.bounds())
            .map_err(|e| DocumentError::malformed(index, e.to_string()))?;

        Ok(PageRect::new(
            0.0,
            0.0,
            f64::from(bounds.x1 - bounds.x0),
            f64::from(bounds.y1 - bounds.y0),
        ))
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<RgbImage, RenderError> {
        let number = self
            .page_index(index)
            .ok_or(RenderError::PageOutOfRange { page: index })?;
        let backend = |e: mupdf::error::Error| RenderError::Backend(e.to_string());

        let page = self.doc.load_page(number).map_err(backend)?;
        let pixmap = page
            .to_pixmap(
                &Matrix::new_scale(scale, scale),
                &Colorspace::device_rgb(),
                false,
                false,
            )
            .map_err(backend)?;

        pixmap_to_image(&pixmap)
    }
}

fn pixmap_to_image(pixmap: &Pixmap) -> Result<RgbImage, RenderError> {
    let rgb = samples_to_rgb(
        pixmap.samples(),
        pixmap.width() as usize,
        pixmap.height() as usize,
        pixmap.stride() as usize,
        pixmap.n() as usize,
    )?;
    RgbImage::from_raw(pixmap.width(), pixmap.height(), rgb)
        .ok_or_else(|| RenderError::Backend("pixmap dimensions do not match samples".into()))
}

/// Strip row padding and any alpha channel off raw MuPDF samples
fn samples_to_rgb(
    samples: &[u8],
    width: usize,
    height: usize,
    stride: usize,
    n: usize,
) -> Result<Vec<u8>, RenderError> {
    if n < 3 {
        return Err(RenderError::Backend(format!(
            "unsupported pixmap format: {n} channels"
        )));
    }

    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(RenderError::Backend("pixmap buffer size mismatch".into()));
    }

    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row_start = y * stride;
        let row = &samples[row_start..row_start + row_bytes];
        if n == 3 {
            rgb.extend_from_slice(row);
        } else {
            for px in row.chunks_exact(n) {
                rgb.extend_from_slice(&px[..3]);
            }
        }
    }

    Ok(rgb)
}
