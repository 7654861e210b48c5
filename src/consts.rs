//! Shared numeric constants for the engine.

// ── Coordinate space ────────────────────────────────────────────

/// Minimum allowed view scale (zoomed all the way out).
pub const MIN_SCALE: f64 = 0.01;

/// Maximum allowed view scale (zoomed all the way in).
pub const MAX_SCALE: f64 = 100.0;

/// Container-height delta below which a resize is treated as layout noise
/// and no offset compensation is applied.
pub const RESIZE_EPSILON: f64 = 0.5;

// ── Hit-testing / snapping ──────────────────────────────────────

/// Screen-space snap radius in pixels. Converted to world units per call
/// via the current scale so the radius stays visually constant under zoom.
pub const SNAP_TOLERANCE_PX: f64 = 8.0;

/// Screen-space hit slop in pixels for vertex / edge / body grips.
pub const GRIP_RADIUS_PX: f64 = 8.0;

/// Screen-space radius in pixels inside which a click near the first draft
/// point closes the polygon.
pub const AUTO_CLOSE_TOLERANCE_PX: f64 = 12.0;

/// Pointer travel in screen pixels below which a press + release counts as a
/// click rather than a drag.
pub const CLICK_SLOP_PX: f64 = 3.0;

// ── Polygons / grips ────────────────────────────────────────────

/// Minimum vertex count for a closed overlay region.
pub const MIN_POLY_POINTS: usize = 3;

/// Minimum interval between grip hover scans in select-style tool modes.
pub const HOVER_THROTTLE_MS: f64 = 100.0;

// ── Overlay store ───────────────────────────────────────────────

/// World-unit offset applied to both axes when duplicating an overlay.
pub const DUPLICATE_OFFSET: f64 = 10.0;

/// Label suffix appended to a duplicated overlay.
pub const DUPLICATE_LABEL_SUFFIX: &str = " (copy)";

// ── Rendering ───────────────────────────────────────────────────

/// Fallback stroke color when neither the entity nor its layer carries one.
pub const DEFAULT_ENTITY_COLOR: &str = "#FFFFFF";

/// Fallback lineweight in drawing units.
pub const DEFAULT_LINEWEIGHT: f64 = 1.0;
