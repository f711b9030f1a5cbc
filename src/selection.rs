//! Square region selection over a displayed page bitmap

use log::debug;

use crate::geometry::{BitmapSize, NormalizedRect, PixelPoint, PixelRect};

/// Shorter side, in pixels, at or below which a drawn rectangle is treated as a click.
pub const MIN_SELECTION_PX: i32 = 2;

/// Pointer input delivered by the host widget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerEvent {
    Press(PixelPoint),
    Move(PixelPoint),
    Release(PixelPoint),
}

/// Interaction state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionState {
    #[default]
    Idle,
    Drawing {
        start: PixelPoint,
        end: PixelPoint,
    },
    Dragging {
        /// Press point minus the selection's top-left corner
        offset: PixelPoint,
    },
}

/// What the host should draw on top of the bitmap
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Overlay {
    /// Rectangle being drawn, not yet finalized
    pub live: Option<PixelRect>,
    /// Finalized selection
    pub selection: Option<PixelRect>,
}

/// Effects produced by pointer input
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SelectionEffect {
    /// Repaint the overlay
    Redraw(Overlay),
    /// The authoritative selection changed (`None` = unset)
    Changed(Option<NormalizedRect>),
}

/// Single-square selection over a bitmap of known pixel size
#[derive(Clone, Debug, Default)]
pub struct SelectionModel {
    bitmap: Option<BitmapSize>,
    state: SelectionState,
    selection: Option<NormalizedRect>,
}

impl SelectionModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current selection, if any
    #[must_use]
    pub fn selection(&self) -> Option<NormalizedRect> {
        self.selection
    }

    #[must_use]
    pub fn state(&self) -> SelectionState {
        self.state
    }

    #[must_use]
    pub fn bitmap(&self) -> Option<BitmapSize> {
        self.bitmap
    }

    /// Set the bitmap being displayed. The normalized selection survives
    /// resizes (zoom changes, page flips); an in-progress gesture does not.
    pub fn set_bitmap(&mut self, bitmap: Option<BitmapSize>) -> Vec<SelectionEffect> {
        self.bitmap = bitmap.filter(|b| !b.is_empty());
        self.state = SelectionState::Idle;
        vec![SelectionEffect::Redraw(self.overlay())]
    }

    /// Drop the selection and any gesture in progress.
    pub fn clear(&mut self) -> Vec<SelectionEffect> {
        let had_selection = self.selection.take().is_some();
        self.state = SelectionState::Idle;

        let mut effects = vec![SelectionEffect::Redraw(self.overlay())];
        if had_selection {
            effects.push(SelectionEffect::Changed(None));
        }
        effects
    }

    /// Feed one pointer event through the state machine.
    ///
    /// Events are ignored while no bitmap is displayed.
    #[must_use]
    pub fn apply(&mut self, event: PointerEvent) -> Vec<SelectionEffect> {
        let Some(bitmap) = self.bitmap else {
            return vec![];
        };

        match (self.state, event) {
            (SelectionState::Idle, PointerEvent::Press(point)) => self.press(point, bitmap),

            (SelectionState::Drawing { start, .. }, PointerEvent::Move(point)) => {
                self.state = SelectionState::Drawing { start, end: point };
                vec![SelectionEffect::Redraw(self.overlay())]
            }

            (SelectionState::Drawing { start, .. }, PointerEvent::Release(point)) => {
                self.selection = finalize(start, point, bitmap);
                self.state = SelectionState::Idle;
                debug!("Selection finalized: {:?}", self.selection);
                vec![
                    SelectionEffect::Redraw(self.overlay()),
                    SelectionEffect::Changed(self.selection),
                ]
            }

            (SelectionState::Dragging { offset }, PointerEvent::Move(point)) => {
                self.drag_to(point, offset, bitmap);
                vec![SelectionEffect::Redraw(self.overlay())]
            }

            (SelectionState::Dragging { .. }, PointerEvent::Release(_)) => {
                self.state = SelectionState::Idle;
                vec![
                    SelectionEffect::Redraw(self.overlay()),
                    SelectionEffect::Changed(self.selection),
                ]
            }

            // Moves while idle, releases without a press and repeated presses
            _ => vec![],
        }
    }

    /// Overlay for the current state
    #[must_use]
    pub fn overlay(&self) -> Overlay {
        let Some(bitmap) = self.bitmap else {
            return Overlay::default();
        };

        let live = match self.state {
            SelectionState::Drawing { start, end } => Some(PixelRect::spanning(start, end)),
            _ => None,
        };

        Overlay {
            live,
            selection: self.selection.map(|s| s.to_pixels(bitmap)),
        }
    }

    fn press(&mut self, point: PixelPoint, bitmap: BitmapSize) -> Vec<SelectionEffect> {
        if let Some(current) = self.selection {
            let rect = current.to_pixels(bitmap);
            if rect.contains(point) {
                self.state = SelectionState::Dragging {
                    offset: PixelPoint::new(
                        point.x.saturating_sub(rect.x),
                        point.y.saturating_sub(rect.y),
                    ),
                };
                return vec![SelectionEffect::Redraw(self.overlay())];
            }
        }

        let had_selection = self.selection.take().is_some();
        self.state = SelectionState::Drawing {
            start: point,
            end: point,
        };

        let mut effects = vec![SelectionEffect::Redraw(self.overlay())];
        if had_selection {
            effects.push(SelectionEffect::Changed(None));
        }
        effects
    }

    fn drag_to(&mut self, point: PixelPoint, offset: PixelPoint, bitmap: BitmapSize) {
        let Some(current) = self.selection else {
            return;
        };

        let pw = f64::from(bitmap.width);
        let ph = f64::from(bitmap.height);

        let max_x = (pw - current.w * pw).max(0.0);
        let max_y = (ph - current.h * ph).max(0.0);
        let new_x = f64::from(point.x.saturating_sub(offset.x)).clamp(0.0, max_x);
        let new_y = f64::from(point.y.saturating_sub(offset.y)).clamp(0.0, max_y);

        // Clamp again in normalized space so rounding never pushes an edge past 1
        self.selection = Some(NormalizedRect {
            x: (new_x / pw).min(1.0 - current.w).max(0.0),
            y: (new_y / ph).min(1.0 - current.h).max(0.0),
            w: current.w,
            h: current.h,
        });
    }
}

/// Turn a drawn gesture into a square selection, or `None` for a click.
fn finalize(start: PixelPoint, end: PixelPoint, bitmap: BitmapSize) -> Option<NormalizedRect> {
    let max_x = i32::try_from(bitmap.width).unwrap_or(i32::MAX);
    let max_y = i32::try_from(bitmap.height).unwrap_or(i32::MAX);

    let x1 = start.x.min(end.x).clamp(0, max_x);
    let y1 = start.y.min(end.y).clamp(0, max_y);
    let x2 = start.x.max(end.x).clamp(0, max_x);
    let y2 = start.y.max(end.y).clamp(0, max_y);

    let size = (x2 - x1).min(y2 - y1);
    if size <= MIN_SELECTION_PX {
        return None;
    }

    NormalizedRect::from_pixels(PixelPoint::new(x1, y1), size, bitmap)
}
