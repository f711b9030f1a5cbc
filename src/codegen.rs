//! Link parsing and QR code image generation

use image::{Rgb, RgbImage};
use log::{debug, info};
use qrcode::types::QrError;
use qrcode::{Color, QrCode};
use rayon::prelude::*;

/// Module edge length in pixels
pub const DEFAULT_MODULE_SIZE: u32 = 10;

/// Light border around the symbol, in modules, as the QR standard recommends
pub const QUIET_ZONE_MODULES: u32 = 4;

const DARK: Rgb<u8> = Rgb([0, 0, 0]);
const LIGHT: Rgb<u8> = Rgb([255, 255, 255]);

/// A link that cannot be represented as a QR code
#[derive(Debug, thiserror::Error)]
#[error("link {index} cannot be encoded ({link:?}): {source}")]
pub struct EncodingError {
    /// Position of the link in the pasted list
    pub index: usize,
    pub link: String,
    #[source]
    pub source: QrError,
}

/// One generated code, tied to the link it encodes.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeImage {
    pub link: String,
    pub image: RgbImage,
}

/// Text to square bitmap
pub trait CodeGenerator: Sync {
    fn encode(&self, text: &str) -> Result<RgbImage, QrError>;
}

/// Plain black-on-white QR renderer
#[derive(Clone, Copy, Debug)]
pub struct QrCodeGenerator {
    module_size: u32,
}

impl Default for QrCodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MODULE_SIZE)
    }
}

impl QrCodeGenerator {
    #[must_use]
    pub fn new(module_size: u32) -> Self {
        Self {
            module_size: module_size.max(1),
        }
    }
}

impl CodeGenerator for QrCodeGenerator {
    fn encode(&self, text: &str) -> Result<RgbImage, QrError> {
        let code = QrCode::new(text.as_bytes())?;
        let width = code.width() as u32;
        let side = (width + 2 * QUIET_ZONE_MODULES) * self.module_size;

        let mut image = RgbImage::from_pixel(side, side, LIGHT);
        for y in 0..width {
            for x in 0..width {
                if code[(x as usize, y as usize)] != Color::Dark {
                    continue;
                }
                let x0 = (x + QUIET_ZONE_MODULES) * self.module_size;
                let y0 = (y + QUIET_ZONE_MODULES) * self.module_size;
                for py in y0..y0 + self.module_size {
                    for px in x0..x0 + self.module_size {
                        image.put_pixel(px, py, DARK);
                    }
                }
            }
        }
        Ok(image)
    }
}

/// Split pasted text into links: one per line, trimmed, blanks dropped.
#[must_use]
pub fn parse_links(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Number of pages that will receive a code
#[must_use]
pub fn stamp_count(links: usize, pages: usize) -> usize {
    links.min(pages)
}

/// Encode the first `min(links, page_count)` links, in order.
///
/// Links past the page count are never encoded. Any encoding failure aborts
/// the whole batch and names the lowest failing index.
pub fn bulk_create(
    generator: &impl CodeGenerator,
    links: &[String],
    page_count: usize,
) -> Result<Vec<CodeImage>, EncodingError> {
    let count = stamp_count(links.len(), page_count);
    if count < links.len() {
        info!(
            "Ignoring {} links beyond the document's {page_count} pages",
            links.len() - count
        );
    }

    let encoded: Vec<Result<RgbImage, QrError>> = links[..count]
        .par_iter()
        .map(|link| generator.encode(link))
        .collect();

    let codes = encoded
        .into_iter()
        .zip(&links[..count])
        .enumerate()
        .map(|(index, (result, link))| {
            result
                .map(|image| CodeImage {
                    link: link.clone(),
                    image,
                })
                .map_err(|source| EncodingError {
                    index,
                    link: link.clone(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!("Generated {} code images", codes.len());
    Ok(codes)
}
