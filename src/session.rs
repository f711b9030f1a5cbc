//! One opened document and everything the user has done to it so far
//!
//! Ties the selection model, code generation, thumbnails and export
//! together for a host UI or the CLI. Hosts drive it with pointer events,
//! [`ViewCommand`]s and explicit bulk-create/export calls, and react to the
//! returned [`SessionEvent`]s and [`ViewEffect`]s.

use std::path::Path;

use image::RgbImage;
use log::{debug, info};

use crate::codegen::{self, CodeImage, EncodingError, QrCodeGenerator};
use crate::document::{
    DocumentError, DocumentSource, PageSource, PdfPages, RenderError, open_renderer,
};
use crate::export::{self, ExportError, ExportHost, ExportOutcome};
use crate::geometry::{BitmapSize, NormalizedRect};
use crate::selection::{Overlay, PointerEvent, SelectionEffect, SelectionModel};
use crate::settings::Settings;
use crate::thumbnail::ThumbnailPipeline;

pub const MIN_ZOOM: f32 = 0.25;
pub const MAX_ZOOM: f32 = 4.0;
pub const ZOOM_STEP: f32 = 0.25;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no links to encode")]
    NoLinks,

    #[error("link/page count mismatch was not confirmed")]
    Declined,

    #[error("no region selected on the page")]
    SelectionMissing,

    #[error("no code images have been created")]
    NoCodes,

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Whether thumbnails should be generated right away
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThumbnailPlan {
    Generate,
    /// Large document: ask the user before spending the time
    AskToSkip { pages: usize },
}

/// Navigation and zoom input
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ViewCommand {
    NextPage,
    PrevPage,
    GoToPage(usize),
    ZoomIn,
    ZoomOut,
    SetZoom(f32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewEffect {
    /// Page or zoom changed: render a new preview
    RenderPreview,
}

/// Notifications for the host
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionEvent {
    Redraw(Overlay),
    SelectionChanged(Option<NormalizedRect>),
    /// Export became possible (or stopped being possible)
    ExportReady(bool),
}

pub struct Session {
    source: DocumentSource,
    pages: PdfPages,
    renderer: Box<dyn PageSource>,
    settings: Settings,
    current_page: usize,
    zoom: f32,
    selection: SelectionModel,
    codes: Vec<CodeImage>,
    export_ready: bool,
}

impl Session {
    /// Open `source` for geometry and rendering
    pub fn open(source: DocumentSource, settings: Settings) -> Result<Self, DocumentError> {
        let pages = PdfPages::open(&source)?;
        let renderer = open_renderer(&source)?;
        Ok(Self::with_renderer(source, pages, renderer, settings))
    }

    /// Assemble a session around an already opened renderer
    pub fn with_renderer(
        source: DocumentSource,
        pages: PdfPages,
        renderer: Box<dyn PageSource>,
        settings: Settings,
    ) -> Self {
        info!(
            "Session opened: {} ({} pages)",
            source.describe(),
            pages.page_count()
        );
        let zoom = settings.preview_zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        Self {
            source,
            pages,
            renderer,
            settings,
            current_page: 0,
            zoom,
            selection: SelectionModel::new(),
            codes: Vec::new(),
            export_ready: false,
        }
    }

    #[must_use]
    pub fn source(&self) -> &DocumentSource {
        &self.source
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.page_count()
    }

    #[must_use]
    pub fn pages(&self) -> &PdfPages {
        &self.pages
    }

    #[must_use]
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    #[must_use]
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    #[must_use]
    pub fn selection(&self) -> Option<NormalizedRect> {
        self.selection.selection()
    }

    #[must_use]
    pub fn overlay(&self) -> Overlay {
        self.selection.overlay()
    }

    #[must_use]
    pub fn codes(&self) -> &[CodeImage] {
        &self.codes
    }

    #[must_use]
    pub fn is_export_ready(&self) -> bool {
        self.export_ready
    }

    /// Apply a navigation or zoom command
    #[must_use]
    pub fn apply_view(&mut self, cmd: ViewCommand) -> Vec<ViewEffect> {
        let last_page = self.page_count().saturating_sub(1);
        let (page, zoom) = match cmd {
            ViewCommand::NextPage => ((self.current_page + 1).min(last_page), self.zoom),
            ViewCommand::PrevPage => (self.current_page.saturating_sub(1), self.zoom),
            ViewCommand::GoToPage(page) => (page.min(last_page), self.zoom),
            ViewCommand::ZoomIn => (self.current_page, clamp_zoom(self.zoom + ZOOM_STEP)),
            ViewCommand::ZoomOut => (self.current_page, clamp_zoom(self.zoom - ZOOM_STEP)),
            ViewCommand::SetZoom(zoom) => (self.current_page, clamp_zoom(zoom)),
        };

        if page == self.current_page && (zoom - self.zoom).abs() <= f32::EPSILON {
            return vec![];
        }
        self.current_page = page;
        self.zoom = zoom;
        vec![ViewEffect::RenderPreview]
    }

    /// Render the current page at the current zoom; the selection model is
    /// resized to the rendered bitmap.
    pub fn render_preview(&mut self) -> Result<RgbImage, SessionError> {
        let image = self.renderer.render_page(self.current_page, self.zoom)?;
        let _ = self
            .selection
            .set_bitmap(Some(BitmapSize::new(image.width(), image.height())));
        Ok(image)
    }

    /// Size the selection model from page geometry alone, for hosts that
    /// replay pointer input without displaying the page.
    pub fn layout_preview(&mut self) -> Result<BitmapSize, SessionError> {
        let rect = PageSource::page_rect(&self.pages, self.current_page)?;
        let size = BitmapSize::of_page(&rect, self.zoom);
        let _ = self.selection.set_bitmap(Some(size));
        Ok(size)
    }

    #[must_use]
    pub fn thumbnail_plan(&self) -> ThumbnailPlan {
        let pages = self.page_count();
        if pages > self.settings.large_document_threshold {
            ThumbnailPlan::AskToSkip { pages }
        } else {
            ThumbnailPlan::Generate
        }
    }

    /// Start the background thumbnail worker on a fresh renderer
    pub fn start_thumbnails(&self) -> std::io::Result<ThumbnailPipeline> {
        let source = self.source.clone();
        ThumbnailPipeline::spawn(
            move || open_renderer(&source),
            self.settings.thumbnail_height,
        )
    }

    /// Parse pasted links and generate one code per page.
    ///
    /// When the link and page counts differ, `confirm(links, pages)` decides
    /// whether to continue with the first `min(links, pages)`. Any previous
    /// selection is dropped, so the user draws a fresh one for the new codes.
    pub fn bulk_create(
        &mut self,
        text: &str,
        confirm: impl FnOnce(usize, usize) -> bool,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let links = codegen::parse_links(text);
        if links.is_empty() {
            return Err(SessionError::NoLinks);
        }

        let pages = self.page_count();
        if links.len() != pages && !confirm(links.len(), pages) {
            info!(
                "Bulk creation declined ({} links, {pages} pages)",
                links.len()
            );
            return Err(SessionError::Declined);
        }

        let generator = QrCodeGenerator::new(self.settings.qr_module_size);
        self.codes = codegen::bulk_create(&generator, &links, pages)?;
        info!("Created {} code images", self.codes.len());

        let cleared = self.selection.clear();
        let mut events = self.forward(cleared);
        events.extend(self.set_export_ready(false));
        Ok(events)
    }

    /// Feed pointer input to the selection model.
    ///
    /// Export readiness follows the selection synchronously: ready as soon
    /// as a selection is finalized while codes exist.
    pub fn pointer(&mut self, event: PointerEvent) -> Vec<SessionEvent> {
        let effects = self.selection.apply(event);
        self.forward(effects)
    }

    fn forward(&mut self, effects: Vec<SelectionEffect>) -> Vec<SessionEvent> {
        let mut events = Vec::with_capacity(effects.len() + 1);
        for effect in effects {
            match effect {
                SelectionEffect::Redraw(overlay) => events.push(SessionEvent::Redraw(overlay)),
                SelectionEffect::Changed(selection) => {
                    events.push(SessionEvent::SelectionChanged(selection));
                    let ready = selection.is_some() && !self.codes.is_empty();
                    events.extend(self.set_export_ready(ready));
                }
            }
        }
        events
    }

    fn set_export_ready(&mut self, ready: bool) -> Option<SessionEvent> {
        (self.export_ready != ready).then(|| {
            self.export_ready = ready;
            debug!("Export ready: {ready}");
            SessionEvent::ExportReady(ready)
        })
    }

    /// Stamp the codes into a copy of the document and write it to `dest`.
    ///
    /// The selection is captured when the export starts. A completed export
    /// clears selection and codes and reports that through the returned
    /// events; failure or cancellation keeps both so the user can retry.
    pub fn export(
        &mut self,
        dest: &Path,
        host: &mut impl ExportHost,
    ) -> Result<(ExportOutcome, Vec<SessionEvent>), SessionError> {
        let selection = self.selection().ok_or(SessionError::SelectionMissing)?;
        if self.codes.is_empty() {
            return Err(SessionError::NoCodes);
        }

        let output = export::prepare_output(&self.source, &self.pages)?;
        let outcome = export::run(output, selection, &self.codes, dest, host)?;

        let mut events = Vec::new();
        if let ExportOutcome::Completed { .. } = outcome {
            self.codes.clear();
            let cleared = self.selection.clear();
            events = self.forward(cleared);
            events.extend(self.set_export_ready(false));
        }
        Ok((outcome, events))
    }
}

fn clamp_zoom(zoom: f32) -> f32 {
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}
