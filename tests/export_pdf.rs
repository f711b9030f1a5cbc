use std::fs;
use std::path::Path;

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};

use qrdoc::codegen::{self, QrCodeGenerator};
use qrdoc::export::{self, ExportOutcome};
use qrdoc::test_utils::{SamplePage, sample_pdf, sample_pdf_with_inherited_box, write_sample_pdf};
use qrdoc::{
    CancelToken, DocumentSource, NormalizedRect, PageRect, PageSource, PdfPages, PixelPoint,
    PointerEvent, Session, Settings,
};

fn two_page_fixture() -> Vec<SamplePage> {
    vec![SamplePage::new(200.0, 400.0), SamplePage::new(100.0, 100.0)]
}

fn links(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://example.com/page/{i}")).collect()
}

fn quarter_square() -> NormalizedRect {
    NormalizedRect::new(0.25, 0.25, 0.5, 0.5).unwrap()
}

fn number(obj: &Object) -> f64 {
    match obj {
        Object::Integer(i) => *i as f64,
        Object::Real(r) => f64::from(*r),
        other => panic!("not a number: {other:?}"),
    }
}

fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// `cm` operands of every image draw on each page
fn placements(path: &Path) -> Vec<Vec<[f64; 6]>> {
    let doc = Document::load(path).unwrap();
    page_ids(&doc)
        .into_iter()
        .map(|id| {
            let content = Content::decode(&doc.get_page_content(id).unwrap()).unwrap();
            content
                .operations
                .iter()
                .filter(|op| op.operator == "cm")
                .map(|op| {
                    let values: Vec<f64> = op.operands.iter().map(number).collect();
                    <[f64; 6]>::try_from(values).unwrap()
                })
                .collect()
        })
        .collect()
}

fn image_bytes(path: &Path) -> Vec<Vec<u8>> {
    let doc = Document::load(path).unwrap();
    page_ids(&doc)
        .into_iter()
        .filter_map(|id| {
            let page = doc.get_dictionary(id).unwrap();
            let resources = page.get(b"Resources").ok()?.as_dict().ok()?;
            let xobjects = resources.get(b"XObject").ok()?.as_dict().ok()?;
            let image_id = xobjects.get(b"QrDocImg0").ok()?.as_reference().ok()?;
            Some(doc.get_object(image_id).unwrap().as_stream().unwrap().content.clone())
        })
        .collect()
}

fn assert_close(actual: [f64; 6], expected: [f64; 6]) {
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-3, "{actual:?} != {expected:?}");
    }
}

fn export_to(source: &DocumentSource, dest: &Path, link_count: usize) -> ExportOutcome {
    let original = PdfPages::open(source).unwrap();
    let codes = codegen::bulk_create(
        &QrCodeGenerator::new(2),
        &links(link_count),
        original.page_count(),
    )
    .unwrap();
    let output = export::prepare_output(source, &original).unwrap();
    export::run(output, quarter_square(), &codes, dest, &mut CancelToken::new()).unwrap()
}

#[test]
fn selection_maps_onto_pages_of_different_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let dest = dir.path().join("out.pdf");
    write_sample_pdf(&input, &two_page_fixture());

    let outcome = export_to(&DocumentSource::path(&input), &dest, 2);
    assert!(matches!(outcome, ExportOutcome::Completed { pages: 2, .. }));

    let placed = placements(&dest);
    assert_eq!(placed.len(), 2);
    // Placement (55,110)-(145,290) holds a centred 90x90 square at y 155..245
    assert_close(placed[0][0], [90.0, 0.0, 0.0, 90.0, 55.0, 155.0]);
    assert_close(placed[1][0], [45.0, 0.0, 0.0, 45.0, 27.5, 27.5]);
}

#[test]
fn original_file_is_not_modified() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    write_sample_pdf(&input, &two_page_fixture());
    let before = fs::read(&input).unwrap();

    export_to(&DocumentSource::path(&input), &dir.path().join("out.pdf"), 2);

    assert_eq!(fs::read(&input).unwrap(), before);
    assert!(placements(&input).iter().all(Vec::is_empty));
}

#[test]
fn retry_yields_identical_geometry_and_images() {
    let dir = tempfile::tempdir().unwrap();
    let source = DocumentSource::bytes(sample_pdf(&two_page_fixture()));
    let first = dir.path().join("first.pdf");
    let second = dir.path().join("second.pdf");

    export_to(&source, &first, 2);
    export_to(&source, &second, 2);

    assert_eq!(placements(&first), placements(&second));
    let images = image_bytes(&first);
    assert_eq!(images.len(), 2);
    assert_eq!(images, image_bytes(&second));
}

#[test]
fn extra_links_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.pdf");
    let source = DocumentSource::bytes(sample_pdf(&[SamplePage::new(100.0, 100.0); 3]));

    let outcome = export_to(&source, &dest, 5);

    assert!(matches!(outcome, ExportOutcome::Completed { pages: 3, .. }));
    let placed = placements(&dest);
    assert_eq!(placed.len(), 3);
    assert!(placed.iter().all(|page| page.len() == 1));
}

#[test]
fn pages_beyond_link_count_are_copied_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.pdf");
    let source = DocumentSource::bytes(sample_pdf(&[SamplePage::new(100.0, 100.0); 4]));

    export_to(&source, &dest, 2);

    let placed = placements(&dest);
    assert_eq!(placed.len(), 4);
    assert_eq!(
        placed.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![1, 1, 0, 0]
    );
}

#[test]
fn in_memory_source_with_inherited_boxes_is_copied() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.pdf");
    let source = DocumentSource::bytes(sample_pdf_with_inherited_box(3, 300.0, 500.0));

    export_to(&source, &dest, 3);

    let written = PdfPages::open(&DocumentSource::path(&dest)).unwrap();
    assert_eq!(written.page_count(), 3);
    for index in 0..3 {
        assert_eq!(
            PageSource::page_rect(&written, index).unwrap(),
            PageRect::new(0.0, 0.0, 300.0, 500.0)
        );
    }
    for page in placements(&dest) {
        assert_close(page[0], [135.0, 0.0, 0.0, 135.0, 82.5, 182.5]);
    }
}

#[test]
fn changed_file_on_disk_falls_back_to_copy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    write_sample_pdf(&input, &two_page_fixture());

    let source = DocumentSource::path(&input);
    let original = PdfPages::open(&source).unwrap();
    write_sample_pdf(&input, &[SamplePage::new(50.0, 50.0)]);

    let output = export::prepare_output(&source, &original).unwrap();
    assert_eq!(output.page_count(), 2);
    assert_eq!(
        PageSource::page_rect(&output, 0).unwrap(),
        PageRect::new(0.0, 0.0, 200.0, 400.0)
    );
}

#[test]
fn cancelled_export_keeps_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.pdf");
    fs::write(&dest, b"previous export").unwrap();

    let source = DocumentSource::bytes(sample_pdf(&two_page_fixture()));
    let original = PdfPages::open(&source).unwrap();
    let codes = codegen::bulk_create(&QrCodeGenerator::new(2), &links(2), 2).unwrap();
    let output = export::prepare_output(&source, &original).unwrap();

    let mut token = CancelToken::new();
    token.cancel();
    let outcome = export::run(output, quarter_square(), &codes, &dest, &mut token).unwrap();

    assert_eq!(outcome, ExportOutcome::Cancelled { completed: 0 });
    assert_eq!(fs::read(&dest).unwrap(), b"previous export");
}

#[test]
fn session_flow_from_drawn_rectangle_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let dest = dir.path().join("out.pdf");
    write_sample_pdf(&input, &two_page_fixture());

    let source = DocumentSource::path(&input);
    let pages = PdfPages::open(&source).unwrap();
    let mut session =
        Session::with_renderer(source, pages.clone(), Box::new(pages), Settings::default());

    // Preview of page 0 at zoom 1.0 is 200x400 pixels
    session.layout_preview().unwrap();
    session
        .bulk_create(&links(5).join("\n"), |links, pages| {
            assert_eq!((links, pages), (5, 2));
            true
        })
        .unwrap();

    for event in [
        PointerEvent::Press(PixelPoint::new(50, 100)),
        PointerEvent::Move(PixelPoint::new(150, 300)),
        PointerEvent::Release(PixelPoint::new(150, 300)),
    ] {
        let _ = session.pointer(event);
    }
    assert!(session.is_export_ready());
    // Square in preview pixels: 100 px wide on a 200x400 bitmap
    assert_eq!(session.selection(), NormalizedRect::new(0.25, 0.25, 0.5, 0.25));

    let (outcome, _) = session.export(&dest, &mut CancelToken::new()).unwrap();
    assert!(matches!(outcome, ExportOutcome::Completed { pages: 2, .. }));

    let placed = placements(&dest);
    assert_close(placed[0][0], [90.0, 0.0, 0.0, 90.0, 55.0, 205.0]);
    assert_close(placed[1][0], [22.5, 0.0, 0.0, 22.5, 38.75, 51.25]);
}
