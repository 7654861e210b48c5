//! Hit-testing and snapping over a unified view of scene entities and
//! overlay polygons.
//!
//! Everything hit-testable is reduced to one [`Snappable`] representation:
//! scene entities pass through (rectangles canonicalized), overlay polygons
//! become closed polylines. Tolerances are given in screen pixels and
//! converted to world units per call via the current scale, so the snap
//! radius stays visually constant regardless of zoom.

#[cfg(test)]
#[path = "snap_test.rs"]
mod snap_test;

use std::f64::consts::{FRAC_PI_2, TAU};

use crate::geom::{self, Bounds, Point};
use crate::overlay::Overlay;
use crate::scene::{EntityKind, SceneModel};
use crate::selection::ShapeRef;
use crate::viewport::ViewTransform;

/// Which feature of a shape a snap landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapKind {
    Endpoint,
    Vertex,
    Midpoint,
    Center,
    Quadrant,
}

impl SnapKind {
    /// Tie-break rank at equal distance: hard points beat derived points.
    fn rank(self) -> u8 {
        match self {
            SnapKind::Endpoint | SnapKind::Vertex => 0,
            SnapKind::Midpoint => 1,
            SnapKind::Center | SnapKind::Quadrant => 2,
        }
    }
}

/// A snap candidate: a point on a shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapPoint {
    pub point: Point,
    pub kind: SnapKind,
    pub owner: ShapeRef,
}

/// A hit-testable shape in the unified representation.
#[derive(Debug, Clone)]
pub struct Snappable {
    pub owner: ShapeRef,
    pub kind: EntityKind,
}

/// Convert a fixed screen-pixel tolerance into world units at the current
/// zoom. Recomputed per call — never cached across zoom changes.
#[must_use]
pub fn world_tolerance(transform: &ViewTransform, screen_px: f64) -> f64 {
    transform.screen_dist_to_world(screen_px)
}

/// Flatten the visible scene entities and the overlay polygons into one
/// hit-test list. Scene order first, then overlay order.
#[must_use]
pub fn snappables(scene: Option<&SceneModel>, overlays: &[Overlay]) -> Vec<Snappable> {
    let mut out = Vec::new();
    if let Some(scene) = scene {
        for entity in &scene.entities {
            if !scene.resolved_visible(entity) {
                continue;
            }
            out.push(Snappable { owner: ShapeRef::Entity(entity.id), kind: entity.kind.canonical() });
        }
    }
    for overlay in overlays {
        out.push(Snappable {
            owner: ShapeRef::Overlay(overlay.id),
            kind: EntityKind::Polyline {
                vertices: overlay.polygon.iter().map(|p| Point::from_pair(*p)).collect(),
                closed: true,
            },
        });
    }
    out
}

/// Distance from `p` to the nearest point of `kind`, or `None` for
/// unhittable geometry (empty polylines and the like).
#[must_use]
pub fn shape_distance(kind: &EntityKind, p: Point) -> Option<f64> {
    match kind {
        EntityKind::Line { start, end } => Some(geom::point_segment_distance(p, *start, *end)),
        EntityKind::Circle { center, radius } => Some((p.distance_to(*center) - radius).abs()),
        EntityKind::Polyline { vertices, closed } => polyline_distance(vertices, *closed, p),
        EntityKind::Arc { center, radius, start_angle, end_angle, ccw } => {
            Some(arc_distance(*center, *radius, *start_angle, *end_angle, *ccw, p))
        }
        EntityKind::Text { position, text, height, .. } => {
            let bounds = text_bounds(*position, text, *height);
            Some(if bounds.contains(p) { 0.0 } else { f64::MAX })
        }
        EntityKind::Rectangle { .. } => shape_distance(&kind.canonical(), p),
    }
}

/// Whether `p` is within `tolerance` of the shape.
#[must_use]
pub fn shape_hit(kind: &EntityKind, p: Point, tolerance: f64) -> bool {
    match kind {
        // Segment chains report the first segment within tolerance rather
        // than the closest of all segments; vertex order decides ties.
        EntityKind::Polyline { vertices, closed } => {
            segments(vertices, *closed)
                .any(|(a, b)| geom::point_segment_distance(p, a, b) <= tolerance)
        }
        EntityKind::Text { position, text, height, .. } => {
            text_bounds(*position, text, *height).padded(tolerance).contains(p)
        }
        EntityKind::Rectangle { .. } => shape_hit(&kind.canonical(), p, tolerance),
        other => shape_distance(other, p).is_some_and(|d| d <= tolerance),
    }
}

/// First shape under `p` in iteration order, or `None`.
#[must_use]
pub fn hit_test(shapes: &[Snappable], p: Point, tolerance: f64) -> Option<ShapeRef> {
    shapes
        .iter()
        .find(|s| shape_hit(&s.kind, p, tolerance))
        .map(|s| s.owner)
}

/// All snap candidates a shape offers.
#[must_use]
pub fn snap_candidates(shape: &Snappable) -> Vec<SnapPoint> {
    let at = |point: Point, kind: SnapKind| SnapPoint { point, kind, owner: shape.owner };
    match &shape.kind {
        EntityKind::Line { start, end } => vec![
            at(*start, SnapKind::Endpoint),
            at(*end, SnapKind::Endpoint),
            at(geom::midpoint(*start, *end), SnapKind::Midpoint),
        ],
        EntityKind::Circle { center, radius } => {
            let mut points = vec![at(*center, SnapKind::Center)];
            for i in 0..4 {
                let a = f64::from(i) * FRAC_PI_2;
                points.push(at(
                    Point::new(center.x + radius * a.cos(), center.y + radius * a.sin()),
                    SnapKind::Quadrant,
                ));
            }
            points
        }
        EntityKind::Polyline { vertices, closed } => {
            let mut points: Vec<SnapPoint> =
                vertices.iter().map(|v| at(*v, SnapKind::Vertex)).collect();
            points.extend(
                segments(vertices, *closed).map(|(a, b)| at(geom::midpoint(a, b), SnapKind::Midpoint)),
            );
            points
        }
        EntityKind::Arc { center, radius, start_angle, end_angle, .. } => vec![
            at(point_at_angle(*center, *radius, *start_angle), SnapKind::Endpoint),
            at(point_at_angle(*center, *radius, *end_angle), SnapKind::Endpoint),
            at(*center, SnapKind::Center),
        ],
        EntityKind::Text { position, .. } => vec![at(*position, SnapKind::Vertex)],
        EntityKind::Rectangle { .. } => {
            let canonical = Snappable { owner: shape.owner, kind: shape.kind.canonical() };
            snap_candidates(&canonical)
        }
    }
}

/// Nearest snap candidate to `p` within `tolerance`, across all shapes.
/// At equal distance, hard points (endpoints, vertices) beat midpoints,
/// which beat centers and quadrants.
#[must_use]
pub fn nearest_snap(shapes: &[Snappable], p: Point, tolerance: f64) -> Option<SnapPoint> {
    let mut best: Option<(f64, SnapPoint)> = None;
    for shape in shapes {
        for candidate in snap_candidates(shape) {
            let d = p.distance_to(candidate.point);
            if !(d <= tolerance) {
                continue;
            }
            let better = match &best {
                None => true,
                Some((bd, bc)) => {
                    d < *bd || (d == *bd && candidate.kind.rank() < bc.kind.rank())
                }
            };
            if better {
                best = Some((d, candidate));
            }
        }
    }
    best.map(|(_, c)| c)
}

/// First overlay whose polygon interior contains `p`, in overlay order.
#[must_use]
pub fn overlay_body_at(overlays: &[Overlay], p: Point) -> Option<&Overlay> {
    overlays.iter().find(|o| geom::point_in_polygon(p, &o.polygon))
}

// =============================================================
// Internals
// =============================================================

/// Iterate segments of a vertex chain, wrapping last→first when closed.
fn segments(vertices: &[Point], closed: bool) -> impl Iterator<Item = (Point, Point)> + '_ {
    let n = vertices.len();
    let count = if n < 2 {
        0
    } else if closed {
        n
    } else {
        n - 1
    };
    (0..count).map(move |i| (vertices[i], vertices[(i + 1) % n]))
}

fn polyline_distance(vertices: &[Point], closed: bool, p: Point) -> Option<f64> {
    match vertices.len() {
        0 => None,
        1 => Some(p.distance_to(vertices[0])),
        _ => segments(vertices, closed)
            .map(|(a, b)| geom::point_segment_distance(p, a, b))
            .min_by(f64::total_cmp),
    }
}

fn point_at_angle(center: Point, radius: f64, angle: f64) -> Point {
    Point::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
}

fn normalize_angle(a: f64) -> f64 {
    let mut a = a % TAU;
    if a < 0.0 {
        a += TAU;
    }
    a
}

/// Whether `angle` falls inside the arc's sweep.
fn arc_contains_angle(start: f64, end: f64, ccw: bool, angle: f64) -> bool {
    // A clockwise sweep start→end is the counterclockwise sweep end→start.
    let (from, to) = if ccw { (start, end) } else { (end, start) };
    let from = normalize_angle(from);
    let to = normalize_angle(to);
    let a = normalize_angle(angle);
    if from <= to {
        a >= from && a <= to
    } else {
        a >= from || a <= to
    }
}

fn arc_distance(center: Point, radius: f64, start: f64, end: f64, ccw: bool, p: Point) -> f64 {
    let angle = (p.y - center.y).atan2(p.x - center.x);
    if arc_contains_angle(start, end, ccw, angle) {
        (p.distance_to(center) - radius).abs()
    } else {
        let d1 = p.distance_to(point_at_angle(center, radius, start));
        let d2 = p.distance_to(point_at_angle(center, radius, end));
        d1.min(d2)
    }
}

/// Rough text extent: monospaced estimate of `0.6 × height` per char.
fn text_bounds(position: Point, text: &str, height: f64) -> Bounds {
    let width = text.chars().count() as f64 * height * 0.6;
    Bounds::new(position, Point::new(position.x + width.max(height), position.y + height))
}
