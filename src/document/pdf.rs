//! `lopdf` backed page geometry and export accumulator

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::RgbImage;
use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use super::{DocumentError, DocumentSource, OutputDocument, PageSource, RenderError};
use crate::geometry::PageRect;

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Used when neither the page nor its ancestors carry a box (US Letter)
const DEFAULT_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Guard against cyclic `/Parent` chains in broken files
const MAX_TREE_DEPTH: usize = 64;

const XOBJECT_PREFIX: &str = "QrDocImg";

/// Visible area and orientation of one page
#[derive(Clone, Copy, Debug, PartialEq)]
struct PageFrame {
    id: ObjectId,
    /// `[llx, lly, urx, ury]` in PDF user space
    visible: [f64; 4],
    /// Clockwise display rotation: 0, 90, 180 or 270
    rotation: i64,
}

impl PageFrame {
    fn read(doc: &Document, id: ObjectId, index: usize) -> Self {
        let visible = inherited(doc, id, b"CropBox")
            .and_then(|obj| parse_box(doc, obj))
            .or_else(|| inherited(doc, id, b"MediaBox").and_then(|obj| parse_box(doc, obj)))
            .unwrap_or_else(|| {
                warn!("Page {index} has no usable MediaBox, assuming US Letter");
                DEFAULT_BOX
            });

        let rotation = inherited(doc, id, b"Rotate")
            .and_then(|obj| resolve(doc, obj).as_i64().ok())
            .map(|r| r.rem_euclid(360))
            .filter(|r| r % 90 == 0)
            .unwrap_or(0);

        Self {
            id,
            visible,
            rotation,
        }
    }

    /// Page rectangle as displayed: origin top-left, rotation applied
    fn native_rect(&self) -> PageRect {
        let [llx, lly, urx, ury] = self.visible;
        let (width, height) = (urx - llx, ury - lly);
        if self.rotation % 180 == 0 {
            PageRect::new(0.0, 0.0, width, height)
        } else {
            PageRect::new(0.0, 0.0, height, width)
        }
    }

    /// Displayed (top-left, y down) point to PDF user space
    fn to_user(&self, x: f64, y: f64) -> (f64, f64) {
        let [llx, lly, urx, ury] = self.visible;
        match self.rotation {
            90 => (llx + y, lly + x),
            180 => (urx - x, lly + y),
            270 => (urx - y, ury - x),
            _ => (llx + x, ury - y),
        }
    }

    /// `cm` operands mapping the unit image square onto `rect`, upright on screen
    fn placement_matrix(&self, rect: &PageRect) -> [f64; 6] {
        let origin = self.to_user(rect.x0, rect.y1());
        let right = self.to_user(rect.x1(), rect.y1());
        let up = self.to_user(rect.x0, rect.y0);
        [
            right.0 - origin.0,
            right.1 - origin.1,
            up.0 - origin.0,
            up.1 - origin.1,
            origin.0,
            origin.1,
        ]
    }
}

/// An opened PDF: page geometry for the interactive side, and the
/// accumulator an export stamps images into.
#[derive(Clone, Debug)]
pub struct PdfPages {
    doc: Document,
    frames: Vec<PageFrame>,
}

impl PdfPages {
    /// Parse a document from its source
    pub fn open(source: &DocumentSource) -> Result<Self, DocumentError> {
        let doc = match source {
            DocumentSource::Path(path) => Document::load(path),
            DocumentSource::Bytes(bytes) => Document::load_mem(bytes),
        }
        .map_err(|e| DocumentError::open(source, e))?;

        let pages = Self::from_document(doc);
        debug!(
            "Opened {} with {} pages",
            source.describe(),
            pages.frames.len()
        );
        Ok(pages)
    }

    fn from_document(doc: Document) -> Self {
        let frames = doc
            .get_pages()
            .into_values()
            .enumerate()
            .map(|(index, id)| PageFrame::read(&doc, id, index))
            .collect();
        Self { doc, frames }
    }

    /// Build a new document and copy every page of this one into it verbatim.
    ///
    /// Inherited page attributes are pinned onto each page first, so the
    /// copy renders identically even though the page tree is rebuilt flat.
    pub fn copy_of(&self) -> Result<Self, DocumentError> {
        let mut source = self.doc.clone();
        for frame in &self.frames {
            pin_inherited(&mut source, frame.id);
        }

        let mut target = Document::with_version(source.version.clone());
        let pages_id = target.new_object_id();

        source.renumber_objects_with(target.max_id + 1);
        let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();
        let info = source.trailer.get(b"Info").ok().cloned();

        target.max_id = target.max_id.max(source.max_id);
        target.objects.extend(source.objects);

        for id in &page_ids {
            let page = target
                .get_object_mut(*id)
                .and_then(Object::as_dict_mut)
                .map_err(|e| DocumentError::malformed(0, e.to_string()))?;
            page.set("Parent", Object::Reference(pages_id));
        }

        let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
        let count = i64::try_from(page_ids.len()).unwrap_or(i64::MAX);
        target.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = target.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        target.trailer.set("Root", catalog_id);
        if let Some(info) = info {
            target.trailer.set("Info", info);
        }

        let pruned = target.prune_objects();
        debug!(
            "Copied {} pages into a new document ({} unreachable objects dropped)",
            page_ids.len(),
            pruned.len()
        );

        Ok(Self::from_document(target))
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.frames.len()
    }

    fn frame(&self, index: usize) -> Result<&PageFrame, DocumentError> {
        self.frames
            .get(index)
            .ok_or(DocumentError::PageOutOfRange {
                page: index,
                count: self.frames.len(),
            })
    }

    /// Inline a page's (possibly inherited or shared) resources and register
    /// `image_id` under a fresh XObject name. Returns the name.
    fn attach_xobject(
        &mut self,
        index: usize,
        page_id: ObjectId,
        image_id: ObjectId,
    ) -> Result<String, DocumentError> {
        let mut resources = inherited(&self.doc, page_id, b"Resources")
            .and_then(|obj| resolve(&self.doc, obj).as_dict().ok())
            .cloned()
            .unwrap_or_default();

        let mut xobjects = resources
            .get(b"XObject")
            .ok()
            .and_then(|obj| resolve(&self.doc, obj).as_dict().ok())
            .cloned()
            .unwrap_or_default();

        let name = (0..)
            .map(|n| format!("{XOBJECT_PREFIX}{n}"))
            .find(|candidate| !xobjects.has(candidate.as_bytes()))
            .unwrap_or_else(|| XOBJECT_PREFIX.to_string());

        xobjects.set(name.as_bytes(), image_id);
        resources.set("XObject", xobjects);

        let page = self
            .doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| DocumentError::malformed(index, e.to_string()))?;
        page.set("Resources", resources);

        Ok(name)
    }

    /// Wrap existing content in `q … Q` and append `overlay` after it
    fn wrap_contents(
        &mut self,
        index: usize,
        page_id: ObjectId,
        overlay: Vec<u8>,
    ) -> Result<(), DocumentError> {
        let existing = {
            let page = self
                .doc
                .get_dictionary(page_id)
                .map_err(|e| DocumentError::malformed(index, e.to_string()))?;
            match page.get(b"Contents") {
                // An indirect /Contents may point at a stream or at an array of streams
                Ok(Object::Reference(id)) => match self.doc.get_object(*id) {
                    Ok(Object::Array(items)) => items.clone(),
                    Ok(Object::Stream(_)) => vec![Object::Reference(*id)],
                    _ => {
                        return Err(DocumentError::malformed(index, "unresolvable /Contents"));
                    }
                },
                Ok(Object::Array(items)) => items.clone(),
                Ok(_) => {
                    return Err(DocumentError::malformed(index, "unsupported /Contents entry"));
                }
                Err(_) => Vec::new(),
            }
        };

        let save_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));

        let mut restore = b"\nQ\n".to_vec();
        restore.extend_from_slice(&overlay);
        let overlay_id = self.doc.add_object(Stream::new(Dictionary::new(), restore));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
        contents.push(Object::Reference(overlay_id));

        let page = self
            .doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| DocumentError::malformed(index, e.to_string()))?;
        page.set("Contents", contents);
        Ok(())
    }
}

impl PageSource for PdfPages {
    fn page_count(&self) -> usize {
        self.frames.len()
    }

    fn page_rect(&self, index: usize) -> Result<PageRect, DocumentError> {
        self.frame(index).map(PageFrame::native_rect)
    }

    fn render_page(&self, _index: usize, _scale: f32) -> Result<RgbImage, RenderError> {
        Err(RenderError::Unavailable)
    }
}

impl OutputDocument for PdfPages {
    fn page_count(&self) -> usize {
        self.frames.len()
    }

    fn page_rect(&self, index: usize) -> Result<PageRect, DocumentError> {
        self.frame(index).map(PageFrame::native_rect)
    }

    fn insert_image(
        &mut self,
        index: usize,
        rect: PageRect,
        image: &RgbImage,
    ) -> Result<(), DocumentError> {
        let frame = *self.frame(index)?;
        let valid = [rect.x0, rect.y0, rect.width, rect.height]
            .iter()
            .all(|v| v.is_finite());
        if !valid || rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(DocumentError::malformed(
                index,
                format!("empty placement rectangle {rect:?}"),
            ));
        }

        let image_id = self.doc.add_object(image_xobject(image)?);
        let name = self.attach_xobject(index, frame.id, image_id)?;

        // Keep the code's proportions: largest centred fit inside `rect`
        let aspect = f64::from(image.width()) / f64::from(image.height());
        let rect = rect.fit_centered(aspect);
        let matrix = frame.placement_matrix(&rect);
        let draw = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", matrix.iter().map(|v| Object::Real(*v as f32)).collect()),
                Operation::new("Do", vec![Object::Name(name.into_bytes())]),
                Operation::new("Q", vec![]),
            ],
        }
        .encode()
        .map_err(|e| DocumentError::malformed(index, e.to_string()))?;

        self.wrap_contents(index, frame.id, draw)?;
        debug!("Placed {}x{} image on page {index} at {rect:?}", image.width(), image.height());
        Ok(())
    }

    fn write_to(&mut self, mut out: &mut dyn Write) -> Result<(), DocumentError> {
        self.doc
            .save_to(&mut out)
            .map_err(|e| DocumentError::Io(std::io::Error::other(e.to_string())))
    }
}

/// RGB image XObject with deterministic Flate-compressed samples
fn image_xobject(image: &RgbImage) -> Result<Stream, DocumentError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(image.as_raw())?;
    let samples = encoder.finish()?;

    Ok(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(image.width()),
            "Height" => i64::from(image.height()),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        samples,
    ))
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

/// Look `key` up on the page, then up the `/Parent` chain
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = Some(page_id);
    for _ in 0..MAX_TREE_DEPTH {
        let dict = doc.get_dictionary(current?).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn pin_inherited(doc: &mut Document, page_id: ObjectId) {
    let missing: Vec<(&[u8], Object)> = INHERITABLE
        .iter()
        .filter(|key| {
            doc.get_dictionary(page_id)
                .map(|page| !page.has(key))
                .unwrap_or(false)
        })
        .filter_map(|key| inherited(doc, page_id, key).map(|value| (*key, value.clone())))
        .collect();

    if let Ok(page) = doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
        for (key, value) in missing {
            page.set(key, value);
        }
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Normalized `[llx, lly, urx, ury]`, rejecting degenerate boxes
fn parse_box(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    let items = resolve(doc, obj).as_array().ok()?;
    if items.len() != 4 {
        return None;
    }
    let mut values = [0.0; 4];
    for (slot, item) in values.iter_mut().zip(items) {
        *slot = number(resolve(doc, item))?;
    }
    let [a, b, c, d] = values;
    let normalized = [a.min(c), b.min(d), a.max(c), b.max(d)];
    (normalized[2] > normalized[0] && normalized[3] > normalized[1]).then_some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{SamplePage, sample_pdf, sample_pdf_with_inherited_box};

    fn open(bytes: Vec<u8>) -> PdfPages {
        PdfPages::open(&DocumentSource::bytes(bytes)).expect("sample opens")
    }

    fn frame(visible: [f64; 4], rotation: i64) -> PageFrame {
        PageFrame {
            id: (1, 0),
            visible,
            rotation,
        }
    }

    fn assert_matrix(actual: [f64; 6], expected: [f64; 6]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn reads_page_rects() {
        let pages = open(sample_pdf(&[
            SamplePage::new(200.0, 400.0),
            SamplePage::new(100.0, 100.0),
        ]));

        assert_eq!(PageSource::page_count(&pages), 2);
        assert_eq!(
            PageSource::page_rect(&pages, 0).unwrap(),
            PageRect::new(0.0, 0.0, 200.0, 400.0)
        );
        assert_eq!(
            PageSource::page_rect(&pages, 1).unwrap(),
            PageRect::new(0.0, 0.0, 100.0, 100.0)
        );
        assert!(matches!(
            PageSource::page_rect(&pages, 2),
            Err(DocumentError::PageOutOfRange { page: 2, count: 2 })
        ));
    }

    #[test]
    fn rotated_pages_swap_sides() {
        let pages = open(sample_pdf(&[SamplePage::new(200.0, 400.0).rotated(90)]));
        assert_eq!(
            PageSource::page_rect(&pages, 0).unwrap(),
            PageRect::new(0.0, 0.0, 400.0, 200.0)
        );
    }

    #[test]
    fn inherited_media_box_is_honoured() {
        let pages = open(sample_pdf_with_inherited_box(3, 300.0, 500.0));
        assert_eq!(PageSource::page_count(&pages), 3);
        for i in 0..3 {
            assert_eq!(
                PageSource::page_rect(&pages, i).unwrap(),
                PageRect::new(0.0, 0.0, 300.0, 500.0)
            );
        }
    }

    #[test]
    fn placement_matrix_unrotated() {
        let rect = PageRect::from_corners(55.0, 110.0, 145.0, 290.0);
        let matrix = frame([0.0, 0.0, 200.0, 400.0], 0).placement_matrix(&rect);
        assert_matrix(matrix, [90.0, 0.0, 0.0, 180.0, 55.0, 110.0]);
    }

    #[test]
    fn placement_matrix_follows_rotation() {
        // Displayed 400 wide, 200 tall; image in the top-left 10x10 corner
        let rect = PageRect::from_corners(0.0, 0.0, 10.0, 10.0);

        let m90 = frame([0.0, 0.0, 200.0, 400.0], 90).placement_matrix(&rect);
        assert_matrix(m90, [0.0, 10.0, -10.0, 0.0, 10.0, 0.0]);

        let m180 = frame([0.0, 0.0, 200.0, 400.0], 180).placement_matrix(&rect);
        assert_matrix(m180, [-10.0, 0.0, 0.0, -10.0, 200.0, 10.0]);

        let m270 = frame([0.0, 0.0, 200.0, 400.0], 270).placement_matrix(&rect);
        assert_matrix(m270, [0.0, -10.0, 10.0, 0.0, 190.0, 400.0]);
    }

    #[test]
    fn crop_box_wins_over_media_box() {
        let pages = open(sample_pdf(&[
            SamplePage::new(600.0, 800.0).cropped([50.0, 100.0, 250.0, 500.0]),
        ]));
        assert_eq!(
            PageSource::page_rect(&pages, 0).unwrap(),
            PageRect::new(0.0, 0.0, 200.0, 400.0)
        );
    }

    #[test]
    fn copy_preserves_pages_in_order() {
        let original = open(sample_pdf_with_inherited_box(4, 300.0, 500.0));
        let copy = original.copy_of().unwrap();

        assert_eq!(PageSource::page_count(&copy), 4);
        for i in 0..4 {
            assert_eq!(
                PageSource::page_rect(&copy, i).unwrap(),
                PageSource::page_rect(&original, i).unwrap()
            );
        }

        let mut bytes = Vec::new();
        let mut copy = copy;
        copy.write_to(&mut bytes).unwrap();
        let reopened = open(bytes);
        assert_eq!(PageSource::page_count(&reopened), 4);
    }

    #[test]
    fn insert_image_registers_xobject_and_draws_it() {
        let mut pages = open(sample_pdf(&[SamplePage::new(100.0, 100.0)]));
        let image = RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]));

        pages
            .insert_image(0, PageRect::from_corners(27.5, 27.5, 72.5, 72.5), &image)
            .unwrap();

        let page_id = pages.frames[0].id;
        let content = pages.doc.get_page_content(page_id).unwrap();
        let ops = Content::decode(&content).unwrap().operations;
        let names: Vec<&str> = ops.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(names.first(), Some(&"q"));
        assert!(names.ends_with(&["Q", "q", "cm", "Do", "Q"]));

        let resources = pages
            .doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap();
        let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
        assert!(xobjects.has(b"QrDocImg0"));
    }

    #[test]
    fn insert_image_keeps_square_codes_square() {
        let mut pages = open(sample_pdf(&[SamplePage::new(200.0, 400.0)]));
        let image = RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]));

        pages
            .insert_image(0, PageRect::from_corners(55.0, 110.0, 145.0, 290.0), &image)
            .unwrap();

        let content = pages.doc.get_page_content(pages.frames[0].id).unwrap();
        let ops = Content::decode(&content).unwrap().operations;
        let cm = ops.iter().find(|op| op.operator == "cm").unwrap();
        let values: Vec<f64> = cm.operands.iter().filter_map(number).collect();
        assert_matrix(
            <[f64; 6]>::try_from(values).unwrap(),
            [90.0, 0.0, 0.0, 90.0, 55.0, 155.0],
        );
    }

    #[test]
    fn indirect_contents_array_survives_insert() {
        let mut pages = open(sample_pdf(&[SamplePage::new(100.0, 100.0)]));
        let page_id = pages.frames[0].id;

        let stream_ref = pages
            .doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Contents")
            .unwrap()
            .clone();
        let array_id = pages.doc.add_object(Object::Array(vec![stream_ref]));
        pages
            .doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Contents", array_id);

        let image = RgbImage::from_pixel(2, 2, image::Rgb([0, 0, 0]));
        pages
            .insert_image(0, PageRect::new(10.0, 10.0, 20.0, 20.0), &image)
            .unwrap();

        let mut bytes = Vec::new();
        pages.write_to(&mut bytes).unwrap();
        let reloaded = Document::load_mem(&bytes).unwrap();
        let id = reloaded.get_pages().into_values().next().unwrap();

        let contents = reloaded.get_dictionary(id).unwrap().get(b"Contents").unwrap();
        for item in contents.as_array().unwrap() {
            let item_id = item.as_reference().unwrap();
            assert!(reloaded.get_object(item_id).unwrap().as_stream().is_ok());
        }

        let ops = Content::decode(&reloaded.get_page_content(id).unwrap())
            .unwrap()
            .operations;
        let names: Vec<&str> = ops.iter().map(|op| op.operator.as_str()).collect();
        assert!(names.contains(&"Tj"), "original text lost: {names:?}");
        assert!(names.contains(&"Do"));
    }

    #[test]
    fn insert_rejects_bad_input() {
        let mut pages = open(sample_pdf(&[SamplePage::new(100.0, 100.0)]));
        let image = RgbImage::new(2, 2);

        assert!(matches!(
            pages.insert_image(3, PageRect::new(0.0, 0.0, 10.0, 10.0), &image),
            Err(DocumentError::PageOutOfRange { .. })
        ));
        assert!(matches!(
            pages.insert_image(0, PageRect::new(0.0, 0.0, 0.0, 10.0), &image),
            Err(DocumentError::Malformed { .. })
        ));
    }

    #[test]
    fn garbage_fails_to_open() {
        let result = PdfPages::open(&DocumentSource::bytes(b"not a pdf".to_vec()));
        assert!(matches!(result, Err(DocumentError::Open { .. })));
    }
}
