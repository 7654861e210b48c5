//! Viewport tracking and the screen ↔ world transform.
//!
//! [`ViewportManager`] is the single source of truth for the container size
//! and the view transform. Every conversion in both directions goes through
//! the same manager and therefore the same viewport measurement — input
//! handling and rendering must never derive screen coordinates from two
//! different elements, or the Y axis drifts apart between them.
//!
//! World Y grows upward while screen Y grows downward, so the conversion
//! flips Y against the viewport height:
//!
//! ```text
//! world.x = (screen.x - offset_x) / scale
//! world.y = (viewport.height - screen.y - offset_y) / scale
//! ```

#[cfg(test)]
#[path = "viewport_test.rs"]
mod viewport_test;

use tracing::{debug, warn};

use crate::consts::{MAX_SCALE, MIN_SCALE, RESIZE_EPSILON};
use crate::geom::{Bounds, Point};

/// Measured container size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Coordinate math is only defined once both dimensions are positive.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// The affine view transform: world → screen is `scale` then offset.
///
/// `scale` is strictly positive; a zero or negative scale is a programming
/// error upstream and is refused by [`ViewportManager::set_transform`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self { scale: 1.0, offset_x: 0.0, offset_y: 0.0 }
    }
}

impl ViewTransform {
    /// Convert a screen-space point to world coordinates.
    #[must_use]
    pub fn screen_to_world(&self, screen: Point, viewport: Viewport) -> Point {
        Point {
            x: (screen.x - self.offset_x) / self.scale,
            y: (viewport.height - screen.y - self.offset_y) / self.scale,
        }
    }

    /// Convert a world-space point to screen coordinates.
    #[must_use]
    pub fn world_to_screen(&self, world: Point, viewport: Viewport) -> Point {
        Point {
            x: world.x * self.scale + self.offset_x,
            y: viewport.height - (world.y * self.scale + self.offset_y),
        }
    }

    /// Convert a screen-space distance (pixels) to world-space distance.
    #[must_use]
    pub fn screen_dist_to_world(&self, screen_dist: f64) -> f64 {
        screen_dist / self.scale
    }
}

/// Owns the viewport measurement and the view transform.
#[derive(Debug, Clone)]
pub struct ViewportManager {
    viewport: Viewport,
    transform: ViewTransform,
    stabilized: bool,
}

impl Default for ViewportManager {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            transform: ViewTransform::default(),
            stabilized: false,
        }
    }
}

impl ViewportManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[must_use]
    pub fn transform(&self) -> ViewTransform {
        self.transform
    }

    /// Whether coordinate conversions are currently defined.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.viewport.ready()
    }

    /// Replace the transform wholesale. Non-finite values or a non-positive
    /// scale are refused, keeping the previous transform.
    pub fn set_transform(&mut self, transform: ViewTransform) {
        if !(transform.scale > 0.0)
            || !transform.scale.is_finite()
            || !transform.offset_x.is_finite()
            || !transform.offset_y.is_finite()
        {
            warn!(
                scale = transform.scale,
                "rejected view transform with non-positive or non-finite values"
            );
            return;
        }
        self.transform = transform;
    }

    /// Apply a new container measurement.
    ///
    /// When the height changes by more than [`RESIZE_EPSILON`] and a previous
    /// height was known, `offset_y` shifts by the same delta so the world
    /// point at a given screen position stays visually fixed when chrome
    /// above the canvas appears or disappears. The very first measurement
    /// and sub-epsilon jitter apply no compensation.
    pub fn set_container_size(&mut self, width: f64, height: f64) {
        let width = sanitize_dimension(width);
        let height = sanitize_dimension(height);

        let prev_height = self.viewport.height;
        self.viewport = Viewport::new(width, height);

        // Compensation is for chrome above the canvas growing or shrinking,
        // not for the container collapsing to or appearing from zero.
        let dh = height - prev_height;
        if prev_height > 0.0 && height > 0.0 && dh.abs() > RESIZE_EPSILON {
            self.transform.offset_y += dh;
        }
    }

    /// One-shot deferred re-measurement, correcting for layout that was not
    /// final at construction time. Subsequent calls are ignored; a later
    /// genuine resize simply overwrites whatever this wrote (both converge
    /// to the true container size, so last write wins).
    pub fn stabilize(&mut self, width: f64, height: f64) {
        if self.stabilized {
            debug!("viewport already stabilized, ignoring");
            return;
        }
        self.stabilized = true;
        self.set_container_size(width, height);
    }

    /// Screen → world, or `None` while the viewport is not ready.
    #[must_use]
    pub fn screen_to_world(&self, screen: Point) -> Option<Point> {
        self.ready()
            .then(|| self.transform.screen_to_world(screen, self.viewport))
    }

    /// World → screen, or `None` while the viewport is not ready.
    #[must_use]
    pub fn world_to_screen(&self, world: Point) -> Option<Point> {
        self.ready()
            .then(|| self.transform.world_to_screen(world, self.viewport))
    }

    /// Multiply the scale by `factor`, clamped to `[MIN_SCALE, MAX_SCALE]`,
    /// keeping the world point under `screen_pt` fixed on screen. No-op
    /// while the viewport is not ready or for a useless factor.
    pub fn zoom_at(&mut self, screen_pt: Point, factor: f64) {
        if !self.ready() {
            return;
        }
        if !factor.is_finite() || factor <= 0.0 {
            warn!(factor, "ignoring zoom with non-positive factor");
            return;
        }
        let anchor = self.transform.screen_to_world(screen_pt, self.viewport);
        let new_scale = (self.transform.scale * factor).clamp(MIN_SCALE, MAX_SCALE);

        self.transform = ViewTransform {
            scale: new_scale,
            offset_x: screen_pt.x - anchor.x * new_scale,
            offset_y: self.viewport.height - screen_pt.y - anchor.y * new_scale,
        };
    }

    /// Back to the identity transform.
    pub fn reset_zoom(&mut self) {
        self.transform = ViewTransform::default();
    }

    /// Scale and center the view so `bounds` fills the viewport with
    /// `margin_px` of breathing room. No-op while not ready or when the
    /// bounds have no usable extent.
    pub fn fit_to_view(&mut self, bounds: Bounds, margin_px: f64) {
        if !self.ready() {
            return;
        }
        if !bounds.is_usable() {
            warn!("ignoring fit_to_view with degenerate bounds");
            return;
        }
        let avail_w = self.viewport.width - 2.0 * margin_px;
        let avail_h = self.viewport.height - 2.0 * margin_px;
        if avail_w <= 0.0 || avail_h <= 0.0 {
            return;
        }
        let scale = (avail_w / bounds.width())
            .min(avail_h / bounds.height())
            .clamp(MIN_SCALE, MAX_SCALE);
        let center = bounds.center();

        self.transform = ViewTransform {
            scale,
            offset_x: self.viewport.width / 2.0 - center.x * scale,
            offset_y: self.viewport.height / 2.0 - center.y * scale,
        };
    }
}

fn sanitize_dimension(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { 0.0 }
}
