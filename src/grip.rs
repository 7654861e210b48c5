//! Grip editing: derived handles on shapes and the hover/drag state machine.
//!
//! Grips are never stored — they are recomputed on demand from the current
//! geometry, and only for *selected* shapes (hover never scans the whole
//! scene). A drag carries one or many grips; releasing with movement yields
//! the before/after positions of every carried grip so the host can persist
//! the edit and record it for undo. Releasing without movement is a click,
//! which on an edge-midpoint grip means "insert a vertex here".
//!
//! The grip system itself never mutates shapes: previews live in the drag
//! state, and the owning stores apply the final positions.

#[cfg(test)]
#[path = "grip_test.rs"]
mod grip_test;

use crate::consts::HOVER_THROTTLE_MS;
use crate::geom::{self, Point};
use crate::overlay::Overlay;
use crate::scene::{Entity, EntityKind, SceneModel};
use crate::selection::{Selection, ShapeRef};

/// Which handle on a shape a grip represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripKind {
    /// A polygon/polyline vertex (or line endpoint) by index.
    Vertex(usize),
    /// The midpoint of the edge starting at vertex `index`. Dragging or
    /// clicking it inserts a vertex at `index + 1`.
    EdgeMidpoint { index: usize },
    /// The whole shape.
    Body,
}

/// A concrete grip: a handle at a world position on a specific shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grip {
    pub owner: ShapeRef,
    pub kind: GripKind,
    pub point: Point,
}

/// One grip's completed movement, for persistence and undo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripEdit {
    pub owner: ShapeRef,
    pub kind: GripKind,
    pub before: Point,
    pub after: Point,
}

/// Grips of an overlay polygon: every vertex, every edge midpoint, and the
/// body at the vertex centroid.
#[must_use]
pub fn overlay_grips(overlay: &Overlay) -> Vec<Grip> {
    let owner = ShapeRef::Overlay(overlay.id);
    let n = overlay.polygon.len();
    let mut grips = Vec::with_capacity(2 * n + 1);
    for (i, pair) in overlay.polygon.iter().enumerate() {
        grips.push(Grip { owner, kind: GripKind::Vertex(i), point: Point::from_pair(*pair) });
    }
    for i in 0..n {
        let a = Point::from_pair(overlay.polygon[i]);
        let b = Point::from_pair(overlay.polygon[(i + 1) % n]);
        grips.push(Grip {
            owner,
            kind: GripKind::EdgeMidpoint { index: i },
            point: geom::midpoint(a, b),
        });
    }
    if let Some(center) = geom::vertex_centroid(&overlay.polygon) {
        grips.push(Grip { owner, kind: GripKind::Body, point: center });
    }
    grips
}

/// Grips of a scene entity (rectangles via their canonical polyline form).
#[must_use]
pub fn entity_grips(entity: &Entity) -> Vec<Grip> {
    let owner = ShapeRef::Entity(entity.id);
    match &entity.kind.canonical() {
        EntityKind::Line { start, end } => vec![
            Grip { owner, kind: GripKind::Vertex(0), point: *start },
            Grip { owner, kind: GripKind::Vertex(1), point: *end },
            Grip {
                owner,
                kind: GripKind::EdgeMidpoint { index: 0 },
                point: geom::midpoint(*start, *end),
            },
        ],
        EntityKind::Polyline { vertices, closed } => {
            let n = vertices.len();
            let mut grips = Vec::with_capacity(2 * n + 1);
            for (i, v) in vertices.iter().enumerate() {
                grips.push(Grip { owner, kind: GripKind::Vertex(i), point: *v });
            }
            let edge_count = if *closed { n } else { n.saturating_sub(1) };
            for i in 0..edge_count {
                grips.push(Grip {
                    owner,
                    kind: GripKind::EdgeMidpoint { index: i },
                    point: geom::midpoint(vertices[i], vertices[(i + 1) % n]),
                });
            }
            if *closed {
                if let Some(center) = geom::vertex_centroid(
                    &vertices.iter().map(|v| v.to_pair()).collect::<Vec<_>>(),
                ) {
                    grips.push(Grip { owner, kind: GripKind::Body, point: center });
                }
            }
            grips
        }
        EntityKind::Circle { center, .. } | EntityKind::Arc { center, .. } => {
            vec![Grip { owner, kind: GripKind::Body, point: *center }]
        }
        EntityKind::Text { position, .. } => {
            vec![Grip { owner, kind: GripKind::Body, point: *position }]
        }
        // canonical() never returns a rectangle.
        EntityKind::Rectangle { .. } => vec![],
    }
}

/// Grips of every selected shape, in selection order. Empty selection,
/// empty result — hover and press bail out immediately.
#[must_use]
pub fn selection_grips(
    selection: &Selection,
    scene: Option<&SceneModel>,
    overlays: &[Overlay],
) -> Vec<Grip> {
    let mut grips = Vec::new();
    for shape in selection.items() {
        match shape {
            ShapeRef::Overlay(id) => {
                if let Some(overlay) = overlays.iter().find(|o| o.id == *id) {
                    grips.extend(overlay_grips(overlay));
                }
            }
            ShapeRef::Entity(id) => {
                if let Some(entity) = scene.and_then(|s| s.entity(*id)) {
                    grips.extend(entity_grips(entity));
                }
            }
        }
    }
    grips
}

/// The grip under `p`, vertex grips first, then edge midpoints, then
/// bodies — the first kind within tolerance short-circuits.
#[must_use]
pub fn grip_at(grips: &[Grip], p: Point, tolerance: f64) -> Option<Grip> {
    let within = |g: &&Grip| g.point.distance_to(p) <= tolerance;
    grips
        .iter()
        .filter(|g| matches!(g.kind, GripKind::Vertex(_)))
        .find(within)
        .or_else(|| {
            grips
                .iter()
                .filter(|g| matches!(g.kind, GripKind::EdgeMidpoint { .. }))
                .find(within)
        })
        .or_else(|| grips.iter().filter(|g| matches!(g.kind, GripKind::Body)).find(within))
        .copied()
}

/// Hover / drag phases.
#[derive(Debug, Clone, PartialEq)]
pub enum GripState {
    Idle,
    Hovering { grip: Grip },
    Dragging {
        /// Every grip carried by this gesture; all move by the same delta.
        targets: Vec<Grip>,
        start: Point,
        current: Point,
        /// Set once the pointer travels past the click slop.
        moved: bool,
    },
}

/// Outcome of a pointer release.
#[derive(Debug, Clone, PartialEq)]
pub enum GripRelease {
    /// No drag was active.
    None,
    /// A real drag finished; one edit per carried grip.
    Completed(Vec<GripEdit>),
    /// Press and release without movement — a click on this grip.
    Clicked(Grip),
}

/// The grip interaction state machine.
#[derive(Debug, Clone)]
pub struct GripSystem {
    state: GripState,
    /// Persistent multi-grip selection, built up with modifier-clicks.
    selected_grips: Vec<Grip>,
    last_hover_ms: Option<f64>,
    click_slop: f64,
}

impl Default for GripSystem {
    fn default() -> Self {
        Self {
            state: GripState::Idle,
            selected_grips: Vec::new(),
            last_hover_ms: None,
            click_slop: 0.0,
        }
    }
}

impl GripSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &GripState {
        &self.state
    }

    #[must_use]
    pub fn selected_grips(&self) -> &[Grip] {
        &self.selected_grips
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        matches!(self.state, GripState::Dragging { .. })
    }

    /// The grip currently under the cursor, if any.
    #[must_use]
    pub fn hovered(&self) -> Option<Grip> {
        match &self.state {
            GripState::Hovering { grip } => Some(*grip),
            _ => None,
        }
    }

    /// World-space delta of the active drag.
    #[must_use]
    pub fn drag_delta(&self) -> Option<(f64, f64)> {
        match &self.state {
            GripState::Dragging { start, current, moved: true, .. } => {
                Some((current.x - start.x, current.y - start.y))
            }
            _ => None,
        }
    }

    /// Grips carried by the active drag.
    #[must_use]
    pub fn drag_targets(&self) -> &[Grip] {
        match &self.state {
            GripState::Dragging { targets, .. } => targets,
            _ => &[],
        }
    }

    /// Update hover state from a pointer move. Returns whether the hover
    /// changed (the host re-renders on change).
    ///
    /// With `throttle` set (select-style tools), scans run at most every
    /// [`HOVER_THROTTLE_MS`]; drawing-tool modes pass `false` and scan at
    /// full pointer-move rate.
    pub fn hover(
        &mut self,
        world: Point,
        now_ms: f64,
        throttle: bool,
        grips: &[Grip],
        tolerance: f64,
    ) -> bool {
        if self.is_dragging() {
            return false;
        }
        if throttle {
            if let Some(last) = self.last_hover_ms {
                if now_ms - last < HOVER_THROTTLE_MS {
                    return false;
                }
            }
        }
        self.last_hover_ms = Some(now_ms);

        let hit = if grips.is_empty() { None } else { grip_at(grips, world, tolerance) };
        let next = match hit {
            Some(grip) => GripState::Hovering { grip },
            None => GripState::Idle,
        };
        if next == self.state {
            return false;
        }
        self.state = next;
        true
    }

    /// Toggle a grip in the persistent multi-grip selection.
    pub fn toggle_grip_selection(&mut self, grip: Grip) {
        if let Some(pos) = self.selected_grips.iter().position(|g| *g == grip) {
            self.selected_grips.remove(pos);
        } else {
            self.selected_grips.push(grip);
        }
    }

    pub fn clear_grip_selection(&mut self) {
        self.selected_grips.clear();
    }

    /// Try to start a drag at `world`. Returns the grip that accepted the
    /// press, or `None` when no grip is within tolerance.
    ///
    /// A press on a grip that belongs to the multi-grip selection carries
    /// the whole selection; a press elsewhere carries just that grip and
    /// drops the multi-selection.
    pub fn press(
        &mut self,
        world: Point,
        grips: &[Grip],
        tolerance: f64,
        click_slop: f64,
    ) -> Option<Grip> {
        let grip = grip_at(grips, world, tolerance)?;
        let targets = if self.selected_grips.iter().any(|g| *g == grip) {
            self.selected_grips.clone()
        } else {
            self.selected_grips.clear();
            vec![grip]
        };
        self.click_slop = click_slop;
        self.state = GripState::Dragging { targets, start: world, current: world, moved: false };
        Some(grip)
    }

    /// Feed a pointer move into the active drag. Returns whether a preview
    /// update is needed.
    pub fn drag_to(&mut self, world: Point) -> bool {
        let slop = self.click_slop;
        let GripState::Dragging { start, current, moved, .. } = &mut self.state else {
            return false;
        };
        *current = world;
        if !*moved && start.distance_to(world) > slop {
            *moved = true;
        }
        *moved
    }

    /// Finish the gesture at `world`.
    pub fn release(&mut self, world: Point) -> GripRelease {
        let state = std::mem::replace(&mut self.state, GripState::Idle);
        let GripState::Dragging { targets, start, moved, .. } = state else {
            return GripRelease::None;
        };
        if !moved {
            // Press and release in place: a click on the pressed grip.
            return match targets.first() {
                Some(grip) => GripRelease::Clicked(*grip),
                None => GripRelease::None,
            };
        }
        let dx = world.x - start.x;
        let dy = world.y - start.y;
        let edits = targets
            .iter()
            .map(|g| GripEdit {
                owner: g.owner,
                kind: g.kind,
                before: g.point,
                after: Point::new(g.point.x + dx, g.point.y + dy),
            })
            .collect();
        GripRelease::Completed(edits)
    }

    /// Abandon any hover or drag.
    pub fn cancel(&mut self) {
        self.state = GripState::Idle;
    }
}
