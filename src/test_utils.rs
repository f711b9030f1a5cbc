//! Fixtures shared by unit and integration tests

use std::collections::HashSet;
use std::path::Path;

use flume::{Receiver, Sender};
use image::{Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

use crate::document::{DocumentError, PageSource, RenderError};
use crate::geometry::{BitmapSize, PageRect};

/// One page of a generated PDF fixture
#[derive(Clone, Copy, Debug)]
pub struct SamplePage {
    pub width: f64,
    pub height: f64,
    pub rotate: i64,
    pub crop: Option<[f64; 4]>,
}

impl SamplePage {
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            rotate: 0,
            crop: None,
        }
    }

    #[must_use]
    pub fn rotated(mut self, degrees: i64) -> Self {
        self.rotate = degrees;
        self
    }

    #[must_use]
    pub fn cropped(mut self, crop: [f64; 4]) -> Self {
        self.crop = Some(crop);
        self
    }
}

fn rect_object(values: [f64; 4]) -> Object {
    Object::Array(values.iter().map(|v| Object::Real(*v as f32)).collect())
}

fn label_stream(index: usize) -> Stream {
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
            Operation::new("Td", vec![Object::Integer(10), Object::Integer(10)]),
            Operation::new("Tj", vec![Object::string_literal(format!("Page {index}"))]),
            Operation::new("ET", vec![]),
        ],
    };
    Stream::new(
        dictionary! {},
        content.encode().expect("fixture content encodes"),
    )
}

fn build(pages: &[SamplePage], inherited_box: Option<[f64; 4]>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let kids: Vec<Object> = pages
        .iter()
        .enumerate()
        .map(|(index, page)| {
            let content_id = doc.add_object(label_stream(index));
            let mut dict = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if inherited_box.is_none() {
                dict.set("MediaBox", rect_object([0.0, 0.0, page.width, page.height]));
            }
            if page.rotate != 0 {
                dict.set("Rotate", page.rotate);
            }
            if let Some(crop) = page.crop {
                dict.set("CropBox", rect_object(crop));
            }
            doc.add_object(dict).into()
        })
        .collect();

    let mut tree = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        },
    };
    if let Some(media_box) = inherited_box {
        tree.set("MediaBox", rect_object(media_box));
    }
    doc.objects.insert(pages_id, Object::Dictionary(tree));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture serializes");
    bytes
}

/// A small PDF with one labelled page per entry; fonts are inherited from
/// the page tree root.
#[must_use]
pub fn sample_pdf(pages: &[SamplePage]) -> Vec<u8> {
    build(pages, None)
}

/// `count` pages that all inherit a `width` x `height` MediaBox
#[must_use]
pub fn sample_pdf_with_inherited_box(count: usize, width: f64, height: f64) -> Vec<u8> {
    let pages = vec![SamplePage::new(width, height); count];
    build(&pages, Some([0.0, 0.0, width, height]))
}

pub fn write_sample_pdf(path: &Path, pages: &[SamplePage]) {
    std::fs::write(path, sample_pdf(pages)).expect("fixture written");
}

/// Scripted [`PageSource`]: fixed page sizes, optional failing pages, and an
/// optional gate that holds every render until the test releases it.
pub struct MockDocument {
    pages: Vec<PageRect>,
    failing: HashSet<usize>,
    gate: Option<Receiver<()>>,
}

impl MockDocument {
    #[must_use]
    pub fn new(sizes: &[(f64, f64)]) -> Self {
        Self {
            pages: sizes
                .iter()
                .map(|&(width, height)| PageRect::new(0.0, 0.0, width, height))
                .collect(),
            failing: HashSet::new(),
            gate: None,
        }
    }

    #[must_use]
    pub fn uniform(count: usize, width: f64, height: f64) -> Self {
        Self::new(&vec![(width, height); count])
    }

    #[must_use]
    pub fn failing_on(mut self, page: usize) -> Self {
        self.failing.insert(page);
        self
    }

    /// Each render waits for one `()` on the returned sender. Dropping the
    /// sender opens the gate for good.
    #[must_use]
    pub fn gated(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = flume::unbounded();
        self.gate = Some(rx);
        (self, tx)
    }
}

impl PageSource for MockDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_rect(&self, index: usize) -> Result<PageRect, DocumentError> {
        self.pages
            .get(index)
            .copied()
            .ok_or(DocumentError::PageOutOfRange {
                page: index,
                count: self.pages.len(),
            })
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<RgbImage, RenderError> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        if self.failing.contains(&index) {
            return Err(RenderError::Backend(format!("scripted failure on page {index}")));
        }
        let rect = self
            .pages
            .get(index)
            .ok_or(RenderError::PageOutOfRange { page: index })?;
        let size = BitmapSize::of_page(rect, scale);
        Ok(RgbImage::from_pixel(size.width, size.height, Rgb([255, 255, 255])))
    }
}
