//! Render output assembly: the resolved scene handed to the external
//! renderer.
//!
//! The engine does not rasterize. This module flattens current state —
//! entities with layer-resolved color and visibility, overlays with live
//! drag previews applied, the draft ring, and grip handles — into a
//! [`RenderScene`] that a renderer can draw without consulting any other
//! subsystem. Rectangles reach the renderer already canonicalized to closed
//! polylines.

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;

use crate::consts::{DEFAULT_ENTITY_COLOR, DEFAULT_LINEWEIGHT};
use crate::draft::DraftPolygon;
use crate::geom::Point;
use crate::grip::{Grip, GripKind, GripSystem};
use crate::overlay::{Overlay, OverlayId, OverlayKind, OverlayStatus};
use crate::scene::{EntityId, EntityKind, SceneModel};
use crate::selection::{Selection, ShapeRef};

/// A drawing entity ready to draw: canonical geometry, resolved styling.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub layer: String,
    pub color: String,
    pub lineweight: f64,
    pub selected: bool,
}

/// An overlay region ready to draw, previews applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOverlay {
    pub id: OverlayId,
    pub kind: OverlayKind,
    pub status: OverlayStatus,
    pub polygon: Vec<[f64; 2]>,
    pub label: Option<String>,
    pub selected: bool,
}

/// A grip handle to draw, with hover state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderGrip {
    pub grip: Grip,
    pub hovered: bool,
}

/// Everything the external renderer needs for one frame.
#[derive(Debug, Clone, Default)]
pub struct RenderScene {
    pub entities: Vec<RenderEntity>,
    pub overlays: Vec<RenderOverlay>,
    /// Vertices of the in-progress draft ring, for the rubber-band preview.
    pub draft_points: Vec<Point>,
    /// Grip handles of the selected shapes.
    pub grips: Vec<RenderGrip>,
    /// Last known cursor position in world space; the rubber band from the
    /// last draft point ends here.
    pub cursor: Option<Point>,
    /// In-progress two-point tool preview (line / measure).
    pub preview_segment: Option<(Point, Point)>,
}

/// Live preview of an overlay body being dragged by the move tool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyPreview {
    pub overlay_id: OverlayId,
    pub dx: f64,
    pub dy: f64,
}

/// Flatten current state into a [`RenderScene`].
#[must_use]
pub fn build_render_scene(
    scene: Option<&SceneModel>,
    overlays: &[Overlay],
    selection: &Selection,
    draft: &DraftPolygon,
    grips: &GripSystem,
    body_preview: Option<BodyPreview>,
) -> RenderScene {
    let drag_delta = grips.drag_delta();
    let drag_targets = grips.drag_targets();

    let mut out = RenderScene::default();

    if let Some(scene) = scene {
        for entity in &scene.entities {
            if !scene.resolved_visible(entity) {
                continue;
            }
            let layer = scene.layers.get(&entity.layer);
            let color = entity
                .color
                .clone()
                .or_else(|| layer.and_then(|l| l.color.clone()))
                .unwrap_or_else(|| DEFAULT_ENTITY_COLOR.to_owned());
            let mut kind = entity.kind.canonical();
            if let Some(delta) = drag_delta {
                kind = entity_preview(
                    &kind,
                    drag_targets
                        .iter()
                        .filter(|g| g.owner == ShapeRef::Entity(entity.id)),
                    delta,
                );
            }
            out.entities.push(RenderEntity {
                id: entity.id,
                kind,
                layer: entity.layer.clone(),
                color,
                lineweight: entity.lineweight.unwrap_or(DEFAULT_LINEWEIGHT),
                selected: selection.contains(ShapeRef::Entity(entity.id)),
            });
        }
    }

    for overlay in overlays {
        let mut polygon = overlay.polygon.clone();
        if let Some(preview) = body_preview {
            if preview.overlay_id == overlay.id {
                polygon = translate_polygon(&polygon, preview.dx, preview.dy);
            }
        }
        if let Some(delta) = drag_delta {
            polygon = overlay_preview(
                &polygon,
                drag_targets
                    .iter()
                    .filter(|g| g.owner == ShapeRef::Overlay(overlay.id)),
                delta,
            );
        }
        out.overlays.push(RenderOverlay {
            id: overlay.id,
            kind: overlay.kind,
            status: overlay.status,
            polygon,
            label: overlay.label.clone(),
            selected: selection.contains(ShapeRef::Overlay(overlay.id)),
        });
    }

    out.draft_points = draft.points().to_vec();

    let hovered = grips.hovered();
    out.grips = crate::grip::selection_grips(selection, scene, overlays)
        .into_iter()
        .map(|grip| RenderGrip { grip, hovered: hovered == Some(grip) })
        .collect();

    out
}

// =============================================================
// Preview application
// =============================================================

fn translate_polygon(polygon: &[[f64; 2]], dx: f64, dy: f64) -> Vec<[f64; 2]> {
    polygon.iter().map(|[x, y]| [x + dx, y + dy]).collect()
}

/// Apply in-flight grip movement to an overlay polygon: a body grip
/// translates the ring, vertex grips move individual vertices, and an
/// edge-midpoint grip previews the vertex it will insert.
fn overlay_preview<'a>(
    polygon: &[[f64; 2]],
    targets: impl Iterator<Item = &'a Grip>,
    (dx, dy): (f64, f64),
) -> Vec<[f64; 2]> {
    let mut out = polygon.to_vec();
    let mut inserts: Vec<(usize, [f64; 2])> = Vec::new();
    for grip in targets {
        match grip.kind {
            GripKind::Body => {
                out = translate_polygon(&out, dx, dy);
            }
            GripKind::Vertex(i) => {
                if let Some(v) = out.get_mut(i) {
                    *v = [v[0] + dx, v[1] + dy];
                }
            }
            GripKind::EdgeMidpoint { index } => {
                inserts.push((index + 1, [grip.point.x + dx, grip.point.y + dy]));
            }
        }
    }
    inserts.sort_by(|a, b| b.0.cmp(&a.0));
    for (index, vertex) in inserts {
        let index = index.min(out.len());
        out.insert(index, vertex);
    }
    out
}

/// Apply in-flight grip movement to an entity's canonical geometry.
fn entity_preview<'a>(
    kind: &EntityKind,
    targets: impl Iterator<Item = &'a Grip>,
    (dx, dy): (f64, f64),
) -> EntityKind {
    let mut kind = kind.clone();
    for grip in targets {
        kind = match (&kind, grip.kind) {
            (_, GripKind::Body) => translate_kind(&kind, dx, dy),
            (EntityKind::Line { start, end }, GripKind::Vertex(0)) => EntityKind::Line {
                start: Point::new(start.x + dx, start.y + dy),
                end: *end,
            },
            (EntityKind::Line { start, end }, GripKind::Vertex(1)) => EntityKind::Line {
                start: *start,
                end: Point::new(end.x + dx, end.y + dy),
            },
            (EntityKind::Polyline { vertices, closed }, GripKind::Vertex(i)) => {
                let mut vertices = vertices.clone();
                if let Some(v) = vertices.get_mut(i) {
                    *v = Point::new(v.x + dx, v.y + dy);
                }
                EntityKind::Polyline { vertices, closed: *closed }
            }
            _ => kind,
        };
    }
    kind
}

fn translate_kind(kind: &EntityKind, dx: f64, dy: f64) -> EntityKind {
    let shift = |p: &Point| Point::new(p.x + dx, p.y + dy);
    match kind {
        EntityKind::Line { start, end } => {
            EntityKind::Line { start: shift(start), end: shift(end) }
        }
        EntityKind::Circle { center, radius } => {
            EntityKind::Circle { center: shift(center), radius: *radius }
        }
        EntityKind::Polyline { vertices, closed } => EntityKind::Polyline {
            vertices: vertices.iter().map(|v| shift(v)).collect(),
            closed: *closed,
        },
        EntityKind::Arc { center, radius, start_angle, end_angle, ccw } => EntityKind::Arc {
            center: shift(center),
            radius: *radius,
            start_angle: *start_angle,
            end_angle: *end_angle,
            ccw: *ccw,
        },
        EntityKind::Text { position, text, height, rotation } => EntityKind::Text {
            position: shift(position),
            text: text.clone(),
            height: *height,
            rotation: *rotation,
        },
        EntityKind::Rectangle { corner1, corner2 } => {
            EntityKind::Rectangle { corner1: shift(corner1), corner2: shift(corner2) }
        }
    }
}
