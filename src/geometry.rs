//! Coordinate types shared by the selection model and both pipelines
//!
//! Two coordinate spaces meet here:
//! - displayed pixels of a rendered page bitmap (integer, top-left origin)
//! - native page units (`f64`, top-left origin, y grows downwards)
//!
//! A [`NormalizedRect`] is the bridge between them: it is drawn in pixel
//! space once and re-applied to every page's own native rectangle.

/// Fixed inset applied to a mapped placement region on every side.
pub const BORDER_RATIO: f64 = 0.05;

/// Zoom used for a thumbnail when the page reports a non-positive height.
pub const FALLBACK_THUMBNAIL_ZOOM: f32 = 0.2;

/// A point on a displayed bitmap, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Pixel dimensions of the bitmap the user is drawing on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitmapSize {
    pub width: u32,
    pub height: u32,
}

impl BitmapSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of a page rendered at `zoom`, rounded the way rasterizers round.
    #[must_use]
    pub fn of_page(rect: &PageRect, zoom: f32) -> Self {
        let zoom = f64::from(zoom);
        Self {
            width: (rect.width * zoom).round().max(1.0) as u32,
            height: (rect.height * zoom).round().max(1.0) as u32,
        }
    }

    pub(crate) fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned rectangle in displayed pixels, used for overlay drawing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    /// Rectangle spanned by two corner points in any order.
    #[must_use]
    pub fn spanning(a: PixelPoint, b: PixelPoint) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self {
            x,
            y,
            width: a.x.max(b.x) - x,
            height: a.y.max(b.y) - y,
        }
    }

    /// Inclusive hit test on all four edges.
    #[must_use]
    pub fn contains(&self, point: PixelPoint) -> bool {
        self.x <= point.x
            && point.x <= self.x + self.width
            && self.y <= point.y
            && point.y <= self.y + self.height
    }
}

/// Rectangle in a page's native coordinate space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageRect {
    pub x0: f64,
    pub y0: f64,
    pub width: f64,
    pub height: f64,
}

impl PageRect {
    #[must_use]
    pub const fn new(x0: f64, y0: f64, width: f64, height: f64) -> Self {
        Self {
            x0,
            y0,
            width,
            height,
        }
    }

    /// Rectangle from its two corners.
    #[must_use]
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    #[must_use]
    pub fn x1(&self) -> f64 {
        self.x0 + self.width
    }

    #[must_use]
    pub fn y1(&self) -> f64 {
        self.y0 + self.height
    }

    /// Shrink inwards on all four sides by `ratio` of each side's length.
    #[must_use]
    pub fn inset(&self, ratio: f64) -> Self {
        let dx = self.width * ratio;
        let dy = self.height * ratio;
        Self::from_corners(self.x0 + dx, self.y0 + dy, self.x1() - dx, self.y1() - dy)
    }

    /// Largest rectangle of `aspect` (width / height) centred inside this one.
    #[must_use]
    pub fn fit_centered(&self, aspect: f64) -> Self {
        if !(aspect.is_finite() && aspect > 0.0) {
            return *self;
        }
        let (width, height) = if self.width / self.height > aspect {
            (self.height * aspect, self.height)
        } else {
            (self.width, self.width / aspect)
        };
        Self::new(
            self.x0 + (self.width - width) / 2.0,
            self.y0 + (self.height - height) / 2.0,
            width,
            height,
        )
    }

    /// Zoom that renders this page `target_height` pixels tall.
    #[must_use]
    pub fn zoom_for_height(&self, target_height: u32) -> f32 {
        if self.height > 0.0 {
            (f64::from(target_height) / self.height) as f32
        } else {
            FALLBACK_THUMBNAIL_ZOOM
        }
    }
}

/// Resolution-independent placement: fractions of a reference bitmap.
///
/// Valid values satisfy `w > 0`, `x, y >= 0`, `x + w <= 1` and `y + h <= 1`.
/// The region is square in the pixels of the bitmap it was drawn on, so
/// `w * bitmap.width == h * bitmap.height`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl NormalizedRect {
    /// Build a rect, rejecting anything outside the unit square.
    #[must_use]
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Option<Self> {
        let finite = [x, y, w, h].iter().all(|v| v.is_finite());
        let eps = 1e-9;
        if !finite || w <= 0.0 || h <= 0.0 || x < 0.0 || y < 0.0 {
            return None;
        }
        if x + w > 1.0 + eps || y + h > 1.0 + eps {
            return None;
        }
        Some(Self { x, y, w, h })
    }

    /// Normalize a square of `size` pixels whose top-left is `origin`.
    pub(crate) fn from_pixels(origin: PixelPoint, size: i32, bitmap: BitmapSize) -> Option<Self> {
        let pw = f64::from(bitmap.width);
        let ph = f64::from(bitmap.height);
        let w = f64::from(size) / pw;
        let h = f64::from(size) / ph;
        // Separate divisions can land one ulp past the far edge
        Self::new(
            (f64::from(origin.x) / pw).min(1.0 - w).max(0.0),
            (f64::from(origin.y) / ph).min(1.0 - h).max(0.0),
            w,
            h,
        )
    }

    /// Project back onto a displayed bitmap, truncating like the hit test does.
    #[must_use]
    pub fn to_pixels(&self, bitmap: BitmapSize) -> PixelRect {
        let pw = f64::from(bitmap.width);
        let ph = f64::from(bitmap.height);
        PixelRect {
            x: (self.x * pw) as i32,
            y: (self.y * ph) as i32,
            width: (self.w * pw) as i32,
            height: (self.h * ph) as i32,
        }
    }

    /// Map onto a page's native rectangle, before any border inset.
    #[must_use]
    pub fn map_onto(&self, page: &PageRect) -> PageRect {
        let px0 = page.x0 + self.x * page.width;
        let py0 = page.y0 + self.y * page.height;
        PageRect::from_corners(
            px0,
            py0,
            px0 + self.w * page.width,
            py0 + self.h * page.height,
        )
    }

    /// Final region a code image is placed into on `page`.
    #[must_use]
    pub fn placement_on(&self, page: &PageRect) -> PageRect {
        self.map_onto(page).inset(BORDER_RATIO)
    }
}
