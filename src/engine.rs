//! Engine facade: owns the interaction state and routes pointer events.
//!
//! [`EngineCore`] holds the viewport, the scene coordinator, the selection,
//! the grip system, and the draft ring. Pointer handlers return
//! [`Action`]s for the host to process — persisting overlay mutations,
//! recording undo entries, scheduling a redraw. The engine itself never
//! performs async work; the overlay store is passed in for reads and the
//! host drives its async mutations from the emitted actions.
//!
//! CLICK ROUTING
//! =============
//! A pointer-down runs through a fixed priority order; the first stage that
//! accepts the event stops propagation:
//!
//! 1. grip interaction (select-style tools only, never in rotate)
//! 2. modal construction tools (two-pick line constructors)
//! 3. overlay draft drawing (overlay mode `Draw`)
//! 4. generic two-point drawing/measurement tools
//! 5. move tool: overlay body drag
//! 6. nothing accepted → the release may clear the selection, unless the
//!    press selected something or a drag just finished

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

use tracing::warn;

use crate::consts::{AUTO_CLOSE_TOLERANCE_PX, CLICK_SLOP_PX, GRIP_RADIUS_PX, SNAP_TOLERANCE_PX};
use crate::draft::DraftPolygon;
use crate::geom::Point;
use crate::grip::{self, GripEdit, GripKind, GripRelease, GripSystem};
use crate::overlay::{OverlayId, OverlayStore};
use crate::render::{self, BodyPreview, RenderScene};
use crate::scene::{Entity, EntityId, EntityKind, SceneCoordinator, UpdateOptions, UpdateOutcome};
use crate::selection::{Selection, ShapeRef};
use crate::snap::{self, Snappable};
use crate::viewport::ViewportManager;

/// The active tool, supplied by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    /// Pointer / selection tool.
    #[default]
    Select,
    /// Layer-assignment mode; selection and grips behave as in select.
    Layering,
    /// Drag overlay bodies.
    Move,
    /// Rotate tool; grips are suspended while it is active.
    Rotate,
    /// Two-click line drawing.
    DrawLine,
    /// Two-click distance measurement.
    Measure,
    /// Construct a line parallel to a picked entity, through another.
    ParallelLine,
    /// Construct a line perpendicular to a picked entity, through another.
    PerpendicularLine,
}

impl Tool {
    /// Interactive drawing tools with rubber-band previews.
    #[must_use]
    pub fn is_drawing(self) -> bool {
        matches!(self, Self::DrawLine | Self::Measure)
    }

    /// Modal single-shot entity-picking tools.
    #[must_use]
    pub fn is_construction(self) -> bool {
        matches!(self, Self::ParallelLine | Self::PerpendicularLine)
    }

    /// Whether grip interaction is active for this tool.
    #[must_use]
    pub fn grips_enabled(self) -> bool {
        matches!(self, Self::Select | Self::Layering | Self::Move)
    }

    /// Grip hover is throttled in these modes; drawing tools need
    /// full-rate moves for smooth previews instead.
    #[must_use]
    pub fn hover_throttled(self) -> bool {
        matches!(self, Self::Select | Self::Layering)
    }
}

/// Overlay editor mode, supplied by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayMode {
    #[default]
    Select,
    /// Clicks build the draft ring.
    Draw,
    /// Vertex-level editing of committed overlays.
    Edit,
}

/// Keyboard modifiers held during a pointer event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

/// Outputs for the host to process after a pointer event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Something visual changed; schedule a redraw.
    RenderNeeded,
    /// The selection set changed.
    SelectionChanged,
    /// The draft ring closed; save this polygon, then report the outcome
    /// via [`EngineCore::draft_commit_succeeded`] /
    /// [`EngineCore::draft_commit_failed`].
    CommitDraftRequested { polygon: Vec<[f64; 2]> },
    /// An edge-midpoint grip was clicked: insert a vertex at `index` of the
    /// owner's polygon.
    VertexInsertRequested { owner: ShapeRef, index: usize, point: Point },
    /// A grip drag finished; apply and record for undo.
    GripEditCompleted { edits: Vec<GripEdit> },
    /// A move-tool body drag finished: translate the overlay polygon.
    OverlayMoved { id: OverlayId, dx: f64, dy: f64 },
    /// The measure tool completed.
    MeasureCompleted { from: Point, to: Point, distance: f64 },
    /// A drawing/construction tool added this entity to the scene.
    EntityConstructed { id: EntityId },
}

/// Engine-level gesture (grip drags live inside [`GripSystem`]).
#[derive(Debug, Clone, PartialEq)]
enum Gesture {
    Idle,
    GripDrag,
    BodyDrag { overlay_id: OverlayId, start: Point, current: Point, moved: bool },
}

/// First-click memory of a two-point tool.
#[derive(Debug, Clone, Copy, Default)]
struct TwoPointState {
    first: Option<Point>,
}

/// Step state of a two-pick construction tool.
#[derive(Debug, Clone, Copy, Default)]
struct ConstructionState {
    first: Option<EntityId>,
}

/// Core engine state: all interaction logic, no async, no rendering.
pub struct EngineCore {
    pub viewport: ViewportManager,
    pub scene: SceneCoordinator,
    pub selection: Selection,
    pub grips: GripSystem,
    pub draft: DraftPolygon,
    tool: Tool,
    overlay_mode: OverlayMode,
    gesture: Gesture,
    two_point: TwoPointState,
    construction: ConstructionState,
    cursor_world: Option<Point>,
    /// One-shot, reset on every press: the press phase selected a shape.
    selection_made_this_click: bool,
    /// One-shot, reset on every press: a drag finished on this gesture.
    drag_just_completed: bool,
    /// Whether the current press was accepted by any routing stage.
    press_accepted: bool,
}

impl Default for EngineCore {
    fn default() -> Self {
        Self {
            viewport: ViewportManager::new(),
            scene: SceneCoordinator::new(),
            selection: Selection::new(),
            grips: GripSystem::new(),
            draft: DraftPolygon::new(),
            tool: Tool::default(),
            overlay_mode: OverlayMode::default(),
            gesture: Gesture::Idle,
            two_point: TwoPointState::default(),
            construction: ConstructionState::default(),
            cursor_world: None,
            selection_made_this_click: false,
            drag_just_completed: false,
            press_accepted: false,
        }
    }
}

impl EngineCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tool(&self) -> Tool {
        self.tool
    }

    #[must_use]
    pub fn overlay_mode(&self) -> OverlayMode {
        self.overlay_mode
    }

    /// Switch tools. Drops in-flight grip state and tool steps; switching
    /// into a drawing or construction tool clears the selection (those
    /// tools cannot operate on it).
    pub fn set_tool(&mut self, tool: Tool) -> Vec<Action> {
        if tool == self.tool {
            return vec![];
        }
        self.tool = tool;
        self.grips.cancel();
        self.grips.clear_grip_selection();
        self.gesture = Gesture::Idle;
        self.two_point = TwoPointState::default();
        self.construction = ConstructionState::default();

        let mut actions = vec![Action::RenderNeeded];
        if (tool.is_drawing() || tool.is_construction()) && self.selection.clear() {
            actions.push(Action::SelectionChanged);
        }
        actions
    }

    /// Switch overlay editor modes. Leaving `Draw` discards a pending
    /// draft (unless its save is in flight).
    pub fn set_overlay_mode(&mut self, mode: OverlayMode) -> Vec<Action> {
        if mode == self.overlay_mode {
            return vec![];
        }
        let leaving_draw = self.overlay_mode == OverlayMode::Draw;
        self.overlay_mode = mode;
        self.grips.cancel();
        if leaving_draw {
            self.draft.cancel();
        }
        vec![Action::RenderNeeded]
    }

    /// The active level changed: selection, grips, and draft reset.
    pub fn on_level_changed(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::RenderNeeded];
        if self.selection.clear() {
            actions.push(Action::SelectionChanged);
        }
        self.grips.cancel();
        self.grips.clear_grip_selection();
        self.draft.cancel();
        self.gesture = Gesture::Idle;
        actions
    }

    /// Explicit draft cancellation (Escape).
    pub fn cancel_draft(&mut self) -> Vec<Action> {
        if self.draft.cancel() {
            vec![Action::RenderNeeded]
        } else {
            vec![]
        }
    }

    /// Host feedback: the draft save landed.
    pub fn draft_commit_succeeded(&mut self) -> Vec<Action> {
        self.draft.commit_succeeded();
        vec![Action::RenderNeeded]
    }

    /// Host feedback: the draft save failed; the ring stays editable.
    pub fn draft_commit_failed(&mut self) -> Vec<Action> {
        self.draft.commit_failed();
        vec![Action::RenderNeeded]
    }

    // --- Pointer events ---

    /// Route a pointer press. See the module docs for the priority order.
    pub fn on_pointer_down(
        &mut self,
        screen: Point,
        modifiers: Modifiers,
        store: &OverlayStore,
    ) -> Vec<Action> {
        let Some(world) = self.viewport.screen_to_world(screen) else {
            return vec![];
        };
        self.selection_made_this_click = false;
        self.drag_just_completed = false;
        self.press_accepted = false;

        let transform = self.viewport.transform();
        let grip_tol = transform.screen_dist_to_world(GRIP_RADIUS_PX);
        let snap_tol = snap::world_tolerance(&transform, SNAP_TOLERANCE_PX);
        let slop = transform.screen_dist_to_world(CLICK_SLOP_PX);
        let mut actions = Vec::new();

        // Stage 1: grips and mousedown selection.
        if self.grips_active() {
            let grips =
                grip::selection_grips(&self.selection, self.scene.scene(), store.overlays());
            if modifiers.shift {
                if let Some(g) = grip::grip_at(&grips, world, grip_tol) {
                    self.grips.toggle_grip_selection(g);
                    self.press_accepted = true;
                    actions.push(Action::RenderNeeded);
                    return actions;
                }
            } else if self.grips.press(world, &grips, grip_tol, slop).is_some() {
                self.gesture = Gesture::GripDrag;
                self.press_accepted = true;
                actions.push(Action::RenderNeeded);
                return actions;
            }

            // No grip under the cursor: a press on a shape selects it —
            // outline hits for entities, outline or interior for overlays.
            let shapes = snap::snappables(self.scene.scene(), store.overlays());
            let shape = snap::hit_test(&shapes, world, snap_tol).or_else(|| {
                snap::overlay_body_at(store.overlays(), world)
                    .map(|o| ShapeRef::Overlay(o.id))
            });
            if let Some(shape) = shape {
                if modifiers.shift {
                    self.selection.add(shape);
                } else if !self.selection.contains(shape) {
                    self.selection.select_only(shape);
                }
                self.selection_made_this_click = true;
                self.press_accepted = true;
                actions.push(Action::SelectionChanged);
                actions.push(Action::RenderNeeded);
                return actions;
            }
        }

        // Stage 2: modal construction tools consume entity picks.
        if self.tool.is_construction() {
            self.press_accepted = true;
            actions.extend(self.construction_pick(world, snap_tol));
            return actions;
        }

        // Stage 3: overlay draft drawing.
        if self.overlay_mode == OverlayMode::Draw {
            self.press_accepted = true;
            if self.draft.is_committing() {
                return actions;
            }
            let close_tol = transform.screen_dist_to_world(AUTO_CLOSE_TOLERANCE_PX);
            if self.draft.should_close(world, close_tol) {
                if let Some(polygon) = self.draft.begin_commit() {
                    actions.push(Action::CommitDraftRequested { polygon });
                    actions.push(Action::RenderNeeded);
                }
            } else if self.draft.add_point(world) {
                actions.push(Action::RenderNeeded);
            }
            return actions;
        }

        // Stage 4: generic two-point drawing tools.
        if self.tool.is_drawing() {
            self.press_accepted = true;
            let shapes = snap::snappables(self.scene.scene(), store.overlays());
            let point = snap::nearest_snap(&shapes, world, snap_tol)
                .map_or(world, |s| s.point);
            actions.extend(self.two_point_click(point));
            return actions;
        }

        // Stage 5: move tool drags overlay bodies.
        if self.tool == Tool::Move {
            if let Some(overlay) = snap::overlay_body_at(store.overlays(), world) {
                self.gesture = Gesture::BodyDrag {
                    overlay_id: overlay.id,
                    start: world,
                    current: world,
                    moved: false,
                };
                self.press_accepted = true;
                actions.push(Action::RenderNeeded);
                return actions;
            }
        }

        // Stage 6 (deselect) is evaluated on release.
        actions
    }

    /// Route a pointer move: drag updates, hover scans, previews.
    pub fn on_pointer_move(
        &mut self,
        screen: Point,
        now_ms: f64,
        store: &OverlayStore,
    ) -> Vec<Action> {
        let Some(world) = self.viewport.screen_to_world(screen) else {
            return vec![];
        };
        self.cursor_world = Some(world);

        let transform = self.viewport.transform();
        let grip_tol = transform.screen_dist_to_world(GRIP_RADIUS_PX);
        let slop = transform.screen_dist_to_world(CLICK_SLOP_PX);
        let mut actions = Vec::new();

        if self.gesture == Gesture::GripDrag {
            let target = self.snap_drag_position(world, store);
            if self.grips.drag_to(target) {
                actions.push(Action::RenderNeeded);
            }
            return actions;
        }
        if let Gesture::BodyDrag { start, current, moved, .. } = &mut self.gesture {
            *current = world;
            if !*moved && start.distance_to(world) > slop {
                *moved = true;
            }
            if *moved {
                actions.push(Action::RenderNeeded);
            }
            return actions;
        }

        if self.grips_active() {
            let grips =
                grip::selection_grips(&self.selection, self.scene.scene(), store.overlays());
            if self.grips.hover(world, now_ms, self.tool.hover_throttled(), &grips, grip_tol) {
                actions.push(Action::RenderNeeded);
            }
        }
        // Rubber-band previews track every move.
        let drafting =
            self.overlay_mode == OverlayMode::Draw && !self.draft.points().is_empty();
        let two_pointing = self.tool.is_drawing() && self.two_point.first.is_some();
        if drafting || two_pointing {
            actions.push(Action::RenderNeeded);
        }
        actions
    }

    /// Route a pointer release: finish drags, then evaluate deselect.
    pub fn on_pointer_up(&mut self, screen: Point, store: &OverlayStore) -> Vec<Action> {
        let Some(world) = self.viewport.screen_to_world(screen) else {
            return vec![];
        };
        let mut actions = Vec::new();

        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::GripDrag => {
                let target = self.snap_drag_position(world, store);
                match self.grips.release(target) {
                    GripRelease::Completed(edits) => {
                        self.drag_just_completed = true;
                        actions.push(Action::GripEditCompleted { edits });
                        actions.push(Action::RenderNeeded);
                    }
                    GripRelease::Clicked(grip) => {
                        if let GripKind::EdgeMidpoint { index } = grip.kind {
                            actions.push(Action::VertexInsertRequested {
                                owner: grip.owner,
                                index: index + 1,
                                point: grip.point,
                            });
                            actions.push(Action::RenderNeeded);
                        }
                    }
                    GripRelease::None => {}
                }
            }
            Gesture::BodyDrag { overlay_id, start, current, moved } => {
                if moved {
                    self.drag_just_completed = true;
                    actions.push(Action::OverlayMoved {
                        id: overlay_id,
                        dx: current.x - start.x,
                        dy: current.y - start.y,
                    });
                    actions.push(Action::RenderNeeded);
                }
            }
            Gesture::Idle => {}
        }

        // Stage 6: deselect on an empty click — unless the press selected
        // something or a drag just finished.
        if !self.press_accepted && !self.selection_made_this_click && !self.drag_just_completed
        {
            self.grips.clear_grip_selection();
            if self.selection.clear() {
                actions.push(Action::SelectionChanged);
                actions.push(Action::RenderNeeded);
            }
        }
        actions
    }

    // --- Rendering ---

    /// Assemble the frame for the external renderer.
    #[must_use]
    pub fn render_scene(&self, store: &OverlayStore) -> RenderScene {
        let body_preview = match &self.gesture {
            Gesture::BodyDrag { overlay_id, start, current, moved: true } => Some(BodyPreview {
                overlay_id: *overlay_id,
                dx: current.x - start.x,
                dy: current.y - start.y,
            }),
            _ => None,
        };
        let mut out = render::build_render_scene(
            self.scene.scene(),
            store.overlays(),
            &self.selection,
            &self.draft,
            &self.grips,
            body_preview,
        );
        out.cursor = self.cursor_world;
        if let (Some(first), Some(cursor)) = (self.two_point.first, self.cursor_world) {
            if self.tool.is_drawing() {
                out.preview_segment = Some((first, cursor));
            }
        }
        out
    }

    // --- Internals ---

    /// Grip interaction runs in select-style tools, never while drawing
    /// overlays and never in the rotate tool.
    fn grips_active(&self) -> bool {
        self.tool.grips_enabled()
            && self.tool != Tool::Rotate
            && self.overlay_mode != OverlayMode::Draw
    }

    /// While dragging a single vertex grip, pull the drag position onto
    /// nearby snap points of *other* shapes.
    fn snap_drag_position(&self, world: Point, store: &OverlayStore) -> Point {
        let targets = self.grips.drag_targets();
        let &[only] = targets else {
            return world;
        };
        if !matches!(only.kind, GripKind::Vertex(_)) {
            return world;
        }
        let owner = only.owner;
        let transform = self.viewport.transform();
        let snap_tol = snap::world_tolerance(&transform, SNAP_TOLERANCE_PX);
        let shapes: Vec<Snappable> = snap::snappables(self.scene.scene(), store.overlays())
            .into_iter()
            .filter(|s| s.owner != owner)
            .collect();
        snap::nearest_snap(&shapes, world, snap_tol).map_or(world, |s| s.point)
    }

    /// Two-point tools: first click arms, second click fires.
    fn two_point_click(&mut self, point: Point) -> Vec<Action> {
        let Some(first) = self.two_point.first else {
            self.two_point.first = Some(point);
            return vec![Action::RenderNeeded];
        };
        self.two_point = TwoPointState::default();
        match self.tool {
            Tool::Measure => vec![
                Action::MeasureCompleted {
                    from: first,
                    to: point,
                    distance: first.distance_to(point),
                },
                Action::RenderNeeded,
            ],
            Tool::DrawLine => {
                let entity = Entity {
                    id: uuid::Uuid::new_v4(),
                    kind: EntityKind::Line { start: first, end: point },
                    layer: "0".to_owned(),
                    color: None,
                    lineweight: None,
                    visible: true,
                };
                self.commit_constructed(entity)
            }
            other => {
                warn!(?other, "two_point_click in a non-drawing tool");
                vec![]
            }
        }
    }

    /// Construction tools: each accepted pick advances the step; a miss
    /// re-prompts without advancing.
    fn construction_pick(&mut self, world: Point, snap_tol: f64) -> Vec<Action> {
        let Some(scene) = self.scene.scene() else {
            return vec![];
        };
        let shapes: Vec<Snappable> = snap::snappables(Some(scene), &[])
            .into_iter()
            .filter(|s| matches!(s.owner, ShapeRef::Entity(_)))
            .collect();
        let Some(ShapeRef::Entity(picked)) = snap::hit_test(&shapes, world, snap_tol) else {
            // Nothing under the cursor: stay on the current step.
            return vec![];
        };

        let Some(first_id) = self.construction.first else {
            let has_direction = self
                .scene
                .scene()
                .and_then(|s| s.entity(picked))
                .and_then(|e| entity_direction(&e.kind))
                .is_some();
            if !has_direction {
                warn!(%picked, "construction pick has no usable direction, re-prompting");
                return vec![];
            }
            self.construction.first = Some(picked);
            return vec![Action::RenderNeeded];
        };

        let Some(scene) = self.scene.scene() else {
            self.construction = ConstructionState::default();
            return vec![];
        };
        let (Some(reference), Some(direction)) = (
            scene.entity(picked).map(|e| e.kind.reference_point()),
            scene.entity(first_id).and_then(|e| entity_direction(&e.kind)),
        ) else {
            // The first pick vanished (scene swap); restart the tool.
            self.construction = ConstructionState::default();
            return vec![];
        };

        self.construction = ConstructionState::default();
        let (dx, dy) = match self.tool {
            Tool::PerpendicularLine => (-direction.1, direction.0),
            _ => direction,
        };
        let layer = scene.entity(picked).map_or_else(|| "0".to_owned(), |e| e.layer.clone());
        let entity = Entity {
            id: uuid::Uuid::new_v4(),
            kind: EntityKind::Line {
                start: Point::new(reference.x - dx / 2.0, reference.y - dy / 2.0),
                end: Point::new(reference.x + dx / 2.0, reference.y + dy / 2.0),
            },
            layer,
            color: None,
            lineweight: None,
            visible: true,
        };
        self.commit_constructed(entity)
    }

    /// Push a tool-made entity through the coordinator; a busy coordinator
    /// drops it (standard drop-not-queue semantics).
    fn commit_constructed(&mut self, entity: Entity) -> Vec<Action> {
        let id = entity.id;
        let outcome = self.scene.add_entity(entity, &UpdateOptions::source("tool"));
        if outcome == UpdateOutcome::Applied {
            vec![Action::EntityConstructed { id }, Action::RenderNeeded]
        } else {
            warn!(?outcome, "constructed entity dropped by scene coordinator");
            vec![Action::RenderNeeded]
        }
    }
}

/// Direction vector of an entity usable as a construction reference.
fn entity_direction(kind: &EntityKind) -> Option<(f64, f64)> {
    match kind.canonical() {
        EntityKind::Line { start, end } => Some((end.x - start.x, end.y - start.y)),
        EntityKind::Polyline { vertices, .. } if vertices.len() >= 2 => {
            Some((vertices[1].x - vertices[0].x, vertices[1].y - vertices[0].y))
        }
        _ => None,
    }
}
