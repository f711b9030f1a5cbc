//! Background thumbnail generation
//!
//! One worker thread renders every page in order and streams the results
//! over a bounded channel. The interactive side drains events with
//! [`ThumbnailPipeline::poll`] on its own schedule and may cancel at any
//! time; the worker notices between pages.

use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use image::{Rgb, RgbImage};
use log::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::document::{DocumentError, PageSource};
use crate::geometry::FALLBACK_THUMBNAIL_ZOOM;

pub const DEFAULT_THUMBNAIL_HEIGHT: u32 = 120;

/// Page count above which callers should offer to skip thumbnailing
pub const LARGE_DOCUMENT_THRESHOLD: usize = 200;

/// Width of the neutral bitmap standing in for a page that failed to render
pub const PLACEHOLDER_WIDTH: u32 = 80;
const PLACEHOLDER_COLOR: Rgb<u8> = Rgb([192, 192, 192]);

/// Events in flight between the worker and the consumer. Small, so a slow
/// consumer throttles the worker instead of piling up bitmaps.
const EVENT_CAPACITY: usize = 8;

#[derive(Debug)]
pub enum ThumbnailEvent {
    /// A page finished rendering. The pipeline keeps no copy.
    Produced { page: usize, bitmap: RgbImage },
    /// `completed` of `total` pages are done
    Progress { completed: usize, total: usize },
    /// Terminal event, sent for normal completion and cancellation alike
    Finished,
}

/// Handle on a running thumbnail worker.
///
/// Dropping the handle cancels the worker.
pub struct ThumbnailPipeline {
    cancel: CancelToken,
    events: Receiver<ThumbnailEvent>,
    worker: Option<JoinHandle<()>>,
}

impl ThumbnailPipeline {
    /// Start rendering thumbnails `target_height` pixels tall.
    ///
    /// `open` runs on the worker thread, so the document handle itself never
    /// crosses threads.
    pub fn spawn<D, F>(open: F, target_height: u32) -> std::io::Result<Self>
    where
        D: PageSource,
        F: FnOnce() -> Result<D, DocumentError> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let (tx, events) = flume::bounded(EVENT_CAPACITY);

        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name("thumbnails".into())
            .spawn(move || match open() {
                Ok(doc) => thumbnail_worker(&doc, target_height, &worker_cancel, &tx),
                Err(e) => {
                    error!("Thumbnail worker could not open the document: {e}");
                    let _ = tx.send(ThumbnailEvent::Finished);
                }
            })?;

        Ok(Self {
            cancel,
            events,
            worker: Some(worker),
        })
    }

    /// Ask the worker to stop after the page it is rendering
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drain whatever events are ready without blocking
    pub fn poll(&self) -> Vec<ThumbnailEvent> {
        let mut events = vec![];
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Block for the next event. `None` once the worker is gone.
    pub fn recv(&self) -> Option<ThumbnailEvent> {
        self.events.recv().ok()
    }

    /// Consume the remaining events and wait for the worker to exit
    pub fn wait(mut self) -> Vec<ThumbnailEvent> {
        let events: Vec<_> = self.events.iter().collect();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Thumbnail worker panicked");
            }
        }
        events
    }
}

impl Drop for ThumbnailPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn thumbnail_worker<D: PageSource>(
    doc: &D,
    target_height: u32,
    cancel: &CancelToken,
    tx: &Sender<ThumbnailEvent>,
) {
    let total = doc.page_count();
    info!("Generating {total} thumbnails at {target_height}px");

    let mut completed = 0;
    for page in 0..total {
        if cancel.is_cancelled() {
            info!("Thumbnail generation cancelled after {completed} of {total} pages");
            break;
        }

        let bitmap = render_thumbnail(doc, page, target_height);
        completed = page + 1;

        let delivered = tx.send(ThumbnailEvent::Produced { page, bitmap }).is_ok()
            && tx.send(ThumbnailEvent::Progress { completed, total }).is_ok();
        if !delivered {
            debug!("Thumbnail consumer went away, stopping at page {page}");
            return;
        }
    }

    let _ = tx.send(ThumbnailEvent::Finished);
    debug!("Thumbnail worker finished ({completed}/{total})");
}

/// Render one page `target_height` pixels tall, or a placeholder on failure
pub fn render_thumbnail<D: PageSource + ?Sized>(
    doc: &D,
    page: usize,
    target_height: u32,
) -> RgbImage {
    let zoom = match doc.page_rect(page) {
        Ok(rect) => rect.zoom_for_height(target_height),
        Err(e) => {
            warn!("No page rectangle for page {page}: {e}");
            FALLBACK_THUMBNAIL_ZOOM
        }
    };

    doc.render_page(page, zoom).unwrap_or_else(|e| {
        warn!("Thumbnail for page {page} failed, using placeholder: {e}");
        placeholder(target_height)
    })
}

/// Neutral stand-in for a page that could not be rendered
#[must_use]
pub fn placeholder(target_height: u32) -> RgbImage {
    RgbImage::from_pixel(PLACEHOLDER_WIDTH, target_height.max(1), PLACEHOLDER_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockDocument;

    fn produced_pages(events: &[ThumbnailEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                ThumbnailEvent::Produced { page, .. } => Some(*page),
                _ => None,
            })
            .collect()
    }

    fn last_progress(events: &[ThumbnailEvent]) -> Option<(usize, usize)> {
        events.iter().rev().find_map(|e| match e {
            ThumbnailEvent::Progress { completed, total } => Some((*completed, *total)),
            _ => None,
        })
    }

    #[test]
    fn every_page_is_produced_once_in_order() {
        let pipeline =
            ThumbnailPipeline::spawn(|| Ok(MockDocument::uniform(5, 100.0, 200.0)), 120).unwrap();
        let events = pipeline.wait();

        assert_eq!(produced_pages(&events), vec![0, 1, 2, 3, 4]);
        assert_eq!(last_progress(&events), Some((5, 5)));
        assert!(matches!(events.last(), Some(ThumbnailEvent::Finished)));
    }

    #[test]
    fn thumbnails_match_target_height() {
        let doc = MockDocument::new(&[(100.0, 200.0), (300.0, 600.0)]);
        let pipeline = ThumbnailPipeline::spawn(move || Ok(doc), 120).unwrap();

        for event in pipeline.wait() {
            if let ThumbnailEvent::Produced { bitmap, .. } = event {
                assert_eq!(bitmap.height(), 120);
                assert_eq!(bitmap.width(), 60);
            }
        }
    }

    #[test]
    fn failed_page_becomes_placeholder() {
        let doc = MockDocument::uniform(3, 100.0, 100.0).failing_on(1);
        let pipeline = ThumbnailPipeline::spawn(move || Ok(doc), 50).unwrap();
        let events = pipeline.wait();

        assert_eq!(produced_pages(&events), vec![0, 1, 2]);
        let failed = events.iter().find_map(|e| match e {
            ThumbnailEvent::Produced { page: 1, bitmap } => Some(bitmap),
            _ => None,
        });
        assert_eq!(failed, Some(&placeholder(50)));
    }

    #[test]
    fn degenerate_page_uses_fallback_zoom() {
        let doc = MockDocument::new(&[(500.0, 0.0)]);
        let bitmap = render_thumbnail(&doc, 0, 120);
        assert_eq!(bitmap.width(), 100);
    }

    #[test]
    fn cancel_stops_after_in_flight_page() {
        let (doc, gate) = MockDocument::uniform(10, 100.0, 100.0).gated();
        let pipeline = ThumbnailPipeline::spawn(move || Ok(doc), 20).unwrap();

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        let mut seen = vec![];
        while produced_pages(&seen).len() < 2 {
            seen.push(pipeline.recv().unwrap());
        }
        pipeline.cancel();
        drop(gate);

        seen.extend(pipeline.wait());
        let pages = produced_pages(&seen);
        assert!(pages.len() <= 3, "produced {pages:?}");
        assert_eq!(&pages[..2], &[0, 1]);
        assert!(matches!(seen.last(), Some(ThumbnailEvent::Finished)));
    }

    #[test]
    fn open_failure_still_finishes() {
        let pipeline = ThumbnailPipeline::spawn(
            || -> Result<MockDocument, DocumentError> {
                Err(DocumentError::malformed(0, "broken"))
            },
            120,
        )
        .unwrap();
        let events = pipeline.wait();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ThumbnailEvent::Finished));
    }

    #[test]
    fn empty_document_finishes_immediately() {
        let pipeline =
            ThumbnailPipeline::spawn(|| Ok(MockDocument::uniform(0, 1.0, 1.0)), 120).unwrap();
        let events = pipeline.wait();
        assert!(produced_pages(&events).is_empty());
        assert!(matches!(events.last(), Some(ThumbnailEvent::Finished)));
    }
}
