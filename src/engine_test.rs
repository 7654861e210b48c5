#![allow(clippy::clone_on_copy, clippy::float_cmp)]

use async_trait::async_trait;
use uuid::Uuid;

use super::*;
use crate::overlay::{
    NewOverlay, Overlay, OverlayDoc, OverlayKind, OverlayPersistence, OverlayStatus, StoreError,
    WirePolygon,
};
use crate::scene::SceneModel;

// =============================================================
// Helpers
// =============================================================

struct NoopPersistence;

#[async_trait]
impl OverlayPersistence for NoopPersistence {
    async fn create(&self, _level_id: &str, _doc: &OverlayDoc) -> Result<(), StoreError> {
        Ok(())
    }
    async fn patch(
        &self,
        _level_id: &str,
        _id: crate::overlay::OverlayId,
        _fields: &serde_json::Value,
    ) -> Result<(), StoreError> {
        Ok(())
    }
    async fn delete(
        &self,
        _level_id: &str,
        _id: crate::overlay::OverlayId,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

fn empty_store() -> OverlayStore {
    let mut store = OverlayStore::new(std::sync::Arc::new(NoopPersistence));
    store.set_current_level(Some("L1".to_owned()));
    store
}

fn doc(polygon: Vec<[f64; 2]>) -> OverlayDoc {
    OverlayDoc {
        id: Uuid::new_v4(),
        level_id: "L1".to_owned(),
        kind: OverlayKind::Unit,
        status: OverlayStatus::Available,
        polygon: WirePolygon::Nested(polygon),
        label: None,
        linked: None,
        created_by: None,
        created_at: 0,
        updated_at: 0,
    }
}

fn store_with_overlays(polygons: Vec<Vec<[f64; 2]>>) -> OverlayStore {
    let mut store = empty_store();
    let docs: Vec<OverlayDoc> = polygons.into_iter().map(doc).collect();
    store.load_snapshot("L1", &docs);
    store
}

fn triangle_store() -> OverlayStore {
    store_with_overlays(vec![vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]])
}

fn ready_engine() -> EngineCore {
    let mut engine = EngineCore::new();
    engine.viewport.set_container_size(800.0, 600.0);
    engine
}

fn line_entity(x1: f64, y1: f64, x2: f64, y2: f64) -> Entity {
    Entity {
        id: Uuid::new_v4(),
        kind: EntityKind::Line {
            start: Point::new(x1, y1),
            end: Point::new(x2, y2),
        },
        layer: "0".to_owned(),
        color: None,
        lineweight: None,
        visible: true,
    }
}

fn load_scene(engine: &mut EngineCore, entities: Vec<Entity>) {
    let scene = SceneModel { entities, ..SceneModel::empty() };
    engine.scene.update_scene(Some(scene), &UpdateOptions::source("test"));
    engine.scene.flush_renderer_sync();
}

/// Screen position of a world point under the engine's current transform.
fn at(engine: &EngineCore, x: f64, y: f64) -> Point {
    engine.viewport.world_to_screen(Point::new(x, y)).unwrap()
}

fn no_mods() -> Modifiers {
    Modifiers::default()
}

fn shift() -> Modifiers {
    Modifiers { shift: true, ..Modifiers::default() }
}

/// A full click: press then release at the same world point.
fn click(engine: &mut EngineCore, store: &OverlayStore, x: f64, y: f64) -> Vec<Action> {
    let screen = at(engine, x, y);
    let mut actions = engine.on_pointer_down(screen, no_mods(), store);
    actions.extend(engine.on_pointer_up(screen, store));
    actions
}

fn has_action<F>(actions: &[Action], pred: F) -> bool
where
    F: Fn(&Action) -> bool,
{
    actions.iter().any(pred)
}

fn has_selection_changed(actions: &[Action]) -> bool {
    has_action(actions, |a| matches!(a, Action::SelectionChanged))
}

fn select_first_overlay(engine: &mut EngineCore, store: &OverlayStore) -> crate::overlay::OverlayId {
    let id = store.overlays()[0].id;
    engine.selection.select_only(ShapeRef::Overlay(id));
    id
}

// =============================================================
// Defaults and viewport gating
// =============================================================

#[test]
fn new_engine_defaults() {
    let engine = EngineCore::new();
    assert_eq!(engine.tool(), Tool::Select);
    assert_eq!(engine.overlay_mode(), OverlayMode::Select);
    assert!(engine.selection.is_empty());
}

#[test]
fn pointer_events_ignored_until_viewport_ready() {
    let mut engine = EngineCore::new();
    let store = triangle_store();
    let actions = engine.on_pointer_down(Point::new(100.0, 100.0), no_mods(), &store);
    assert!(actions.is_empty());
    let actions = engine.on_pointer_move(Point::new(100.0, 100.0), 0.0, &store);
    assert!(actions.is_empty());
}

// =============================================================
// Selection by press
// =============================================================

#[test]
fn press_on_overlay_interior_selects_it() {
    let mut engine = ready_engine();
    let store = triangle_store();
    let id = store.overlays()[0].id;

    let actions = click(&mut engine, &store, 7.0, 3.0);
    assert!(has_selection_changed(&actions));
    assert!(engine.selection.contains(ShapeRef::Overlay(id)));
    assert_eq!(engine.selection.primary(), Some(ShapeRef::Overlay(id)));
}

#[test]
fn press_on_entity_outline_selects_it() {
    let mut engine = ready_engine();
    let store = empty_store();
    let e = line_entity(0.0, 50.0, 100.0, 50.0);
    let id = e.id;
    load_scene(&mut engine, vec![e]);

    let actions = click(&mut engine, &store, 50.0, 51.0);
    assert!(has_selection_changed(&actions));
    assert!(engine.selection.contains(ShapeRef::Entity(id)));
}

#[test]
fn shift_press_extends_selection() {
    let mut engine = ready_engine();
    let store = store_with_overlays(vec![
        vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
        vec![[100.0, 0.0], [110.0, 0.0], [110.0, 10.0], [100.0, 10.0]],
    ]);

    let first = at(&engine, 5.0, 5.0);
    engine.on_pointer_down(first, no_mods(), &store);
    engine.on_pointer_up(first, &store);

    let second = at(&engine, 105.0, 5.0);
    engine.on_pointer_down(second, shift(), &store);
    engine.on_pointer_up(second, &store);

    assert_eq!(engine.selection.len(), 2);
}

#[test]
fn empty_click_clears_selection() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);

    let actions = click(&mut engine, &store, 300.0, 300.0);
    assert!(has_selection_changed(&actions));
    assert!(engine.selection.is_empty());
}

#[test]
fn empty_click_with_no_selection_emits_nothing() {
    let mut engine = ready_engine();
    let store = triangle_store();
    let actions = click(&mut engine, &store, 300.0, 300.0);
    assert!(!has_selection_changed(&actions));
}

#[test]
fn selecting_click_does_not_immediately_deselect() {
    let mut engine = ready_engine();
    let store = triangle_store();
    // The press selects; the release of the same click must not clear.
    let actions = click(&mut engine, &store, 7.0, 3.0);
    let changes = actions
        .iter()
        .filter(|a| matches!(a, Action::SelectionChanged))
        .count();
    assert_eq!(changes, 1);
    assert!(!engine.selection.is_empty());
}

// =============================================================
// Grip interaction
// =============================================================

#[test]
fn vertex_grip_drag_emits_edit() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);

    engine.on_pointer_down(at(&engine, 10.0, 0.0), no_mods(), &store);
    engine.on_pointer_move(at(&engine, 15.0, 4.0), 0.0, &store);
    let actions = engine.on_pointer_up(at(&engine, 15.0, 4.0), &store);

    let Some(Action::GripEditCompleted { edits }) = actions
        .iter()
        .find(|a| matches!(a, Action::GripEditCompleted { .. }))
    else {
        panic!("expected grip edit");
    };
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].kind, GripKind::Vertex(1));
    assert_eq!(edits[0].before, Point::new(10.0, 0.0));
    assert_eq!(edits[0].after, Point::new(15.0, 4.0));
}

#[test]
fn grip_drag_preserves_selection() {
    let mut engine = ready_engine();
    let store = triangle_store();
    let id = select_first_overlay(&mut engine, &store);

    engine.on_pointer_down(at(&engine, 10.0, 0.0), no_mods(), &store);
    engine.on_pointer_move(at(&engine, 20.0, 0.0), 0.0, &store);
    let actions = engine.on_pointer_up(at(&engine, 20.0, 0.0), &store);

    // The drag-completion click must not clear what the user is editing.
    assert!(!has_selection_changed(&actions));
    assert!(engine.selection.contains(ShapeRef::Overlay(id)));
}

#[test]
fn edge_midpoint_click_requests_vertex_insert() {
    let mut engine = ready_engine();
    let store = triangle_store();
    let id = select_first_overlay(&mut engine, &store);

    // Midpoint of edge 0 -> 1 is (5, 0).
    let actions = click(&mut engine, &store, 5.0, 0.0);
    let Some(Action::VertexInsertRequested { owner, index, point }) = actions
        .iter()
        .find(|a| matches!(a, Action::VertexInsertRequested { .. }))
    else {
        panic!("expected vertex insert");
    };
    assert_eq!(*owner, ShapeRef::Overlay(id));
    assert_eq!(*index, 1);
    assert_eq!(*point, Point::new(5.0, 0.0));
}

#[test]
fn grips_suspended_in_rotate_tool() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);
    engine.set_tool(Tool::Rotate);

    engine.on_pointer_down(at(&engine, 10.0, 0.0), no_mods(), &store);
    engine.on_pointer_move(at(&engine, 20.0, 0.0), 0.0, &store);
    let actions = engine.on_pointer_up(at(&engine, 20.0, 0.0), &store);
    assert!(!has_action(&actions, |a| matches!(a, Action::GripEditCompleted { .. })));
}

#[test]
fn multi_grip_drag_moves_all_selected_grips() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);

    // Shift-click two vertex grips, then drag one of them.
    engine.on_pointer_down(at(&engine, 0.0, 0.0), shift(), &store);
    engine.on_pointer_up(at(&engine, 0.0, 0.0), &store);
    engine.on_pointer_down(at(&engine, 10.0, 10.0), shift(), &store);
    engine.on_pointer_up(at(&engine, 10.0, 10.0), &store);
    assert_eq!(engine.grips.selected_grips().len(), 2);

    engine.on_pointer_down(at(&engine, 0.0, 0.0), no_mods(), &store);
    engine.on_pointer_move(at(&engine, 30.0, 40.0), 0.0, &store);
    let actions = engine.on_pointer_up(at(&engine, 30.0, 40.0), &store);

    let Some(Action::GripEditCompleted { edits }) = actions
        .iter()
        .find(|a| matches!(a, Action::GripEditCompleted { .. }))
    else {
        panic!("expected grip edit");
    };
    assert_eq!(edits.len(), 2);
    let dx0 = edits[0].after.x - edits[0].before.x;
    let dy0 = edits[0].after.y - edits[0].before.y;
    for edit in edits {
        assert_eq!(edit.after.x - edit.before.x, dx0);
        assert_eq!(edit.after.y - edit.before.y, dy0);
    }
}

#[test]
fn dragged_vertex_snaps_to_other_overlay_vertex() {
    let mut engine = ready_engine();
    let store = store_with_overlays(vec![
        vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]],
        vec![[50.0, 0.0], [60.0, 0.0], [60.0, 10.0]],
    ]);
    select_first_overlay(&mut engine, &store);

    engine.on_pointer_down(at(&engine, 10.0, 0.0), no_mods(), &store);
    // Release within snap range (8 world units at scale 1) of (50, 0).
    engine.on_pointer_move(at(&engine, 45.0, 2.0), 0.0, &store);
    let actions = engine.on_pointer_up(at(&engine, 45.0, 2.0), &store);

    let Some(Action::GripEditCompleted { edits }) = actions
        .iter()
        .find(|a| matches!(a, Action::GripEditCompleted { .. }))
    else {
        panic!("expected grip edit");
    };
    assert_eq!(edits[0].after, Point::new(50.0, 0.0));
}

#[test]
fn hover_over_grip_requests_render() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);

    let actions = engine.on_pointer_move(at(&engine, 0.5, 0.0), 1000.0, &store);
    assert!(has_action(&actions, |a| matches!(a, Action::RenderNeeded)));
    assert!(engine.grips.hovered().is_some());
}

#[test]
fn hover_scans_are_throttled_in_select_tool() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);

    // First move runs a scan away from any grip.
    engine.on_pointer_move(at(&engine, 300.0, 300.0), 0.0, &store);
    // 50 ms later the pointer is over a grip, but the scan is throttled.
    let actions = engine.on_pointer_move(at(&engine, 0.5, 0.0), 50.0, &store);
    assert!(actions.is_empty());
    // Past the window, the scan runs and hovers.
    let actions = engine.on_pointer_move(at(&engine, 0.5, 0.0), 200.0, &store);
    assert!(!actions.is_empty());
}

#[test]
fn hover_without_selection_does_nothing() {
    let mut engine = ready_engine();
    let store = triangle_store();
    let actions = engine.on_pointer_move(at(&engine, 0.5, 0.0), 1000.0, &store);
    assert!(actions.is_empty());
    assert!(engine.grips.hovered().is_none());
}

// =============================================================
// Overlay draft drawing
// =============================================================

#[test]
fn draw_mode_clicks_append_draft_points() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_overlay_mode(OverlayMode::Draw);

    click(&mut engine, &store, 0.0, 0.0);
    click(&mut engine, &store, 10.0, 0.0);
    click(&mut engine, &store, 10.0, 10.0);
    assert_eq!(engine.draft.points().len(), 3);
}

#[test]
fn draft_auto_closes_near_first_point() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_overlay_mode(OverlayMode::Draw);

    click(&mut engine, &store, 0.0, 0.0);
    click(&mut engine, &store, 10.0, 0.0);
    click(&mut engine, &store, 10.0, 10.0);
    let actions = click(&mut engine, &store, 0.5, 0.5);

    let Some(Action::CommitDraftRequested { polygon }) = actions
        .iter()
        .find(|a| matches!(a, Action::CommitDraftRequested { .. }))
    else {
        panic!("expected commit request");
    };
    assert_eq!(polygon, &vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]);
    assert!(engine.draft.is_committing());
}

#[test]
fn draft_commit_success_resets_draft() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_overlay_mode(OverlayMode::Draw);
    click(&mut engine, &store, 0.0, 0.0);
    click(&mut engine, &store, 10.0, 0.0);
    click(&mut engine, &store, 10.0, 10.0);
    click(&mut engine, &store, 0.5, 0.5);

    engine.draft_commit_succeeded();
    assert!(engine.draft.points().is_empty());
    assert_eq!(engine.draft.state(), crate::draft::DraftState::Empty);
}

#[test]
fn draft_commit_failure_keeps_points_for_retry() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_overlay_mode(OverlayMode::Draw);
    click(&mut engine, &store, 0.0, 0.0);
    click(&mut engine, &store, 10.0, 0.0);
    click(&mut engine, &store, 10.0, 10.0);
    click(&mut engine, &store, 0.5, 0.5);

    engine.draft_commit_failed();
    assert_eq!(engine.draft.points().len(), 3);
    // Retry: closing again issues a second request.
    let actions = click(&mut engine, &store, 0.5, 0.5);
    assert!(has_action(&actions, |a| matches!(a, Action::CommitDraftRequested { .. })));
}

#[test]
fn rapid_double_click_cannot_double_submit() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_overlay_mode(OverlayMode::Draw);
    click(&mut engine, &store, 0.0, 0.0);
    click(&mut engine, &store, 10.0, 0.0);
    click(&mut engine, &store, 10.0, 10.0);

    let first = click(&mut engine, &store, 0.5, 0.5);
    let second = click(&mut engine, &store, 0.5, 0.5);
    assert!(has_action(&first, |a| matches!(a, Action::CommitDraftRequested { .. })));
    assert!(!has_action(&second, |a| matches!(a, Action::CommitDraftRequested { .. })));
}

#[test]
fn near_first_click_with_two_points_appends_instead_of_closing() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_overlay_mode(OverlayMode::Draw);
    click(&mut engine, &store, 0.0, 0.0);
    click(&mut engine, &store, 20.0, 0.0);

    let actions = click(&mut engine, &store, 0.5, 0.5);
    assert!(!has_action(&actions, |a| matches!(a, Action::CommitDraftRequested { .. })));
    assert_eq!(engine.draft.points().len(), 3);
}

#[test]
fn cancel_draft_discards_points() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_overlay_mode(OverlayMode::Draw);
    click(&mut engine, &store, 0.0, 0.0);
    click(&mut engine, &store, 10.0, 0.0);

    let actions = engine.cancel_draft();
    assert!(has_action(&actions, |a| matches!(a, Action::RenderNeeded)));
    assert!(engine.draft.points().is_empty());
}

#[test]
fn leaving_draw_mode_discards_draft() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_overlay_mode(OverlayMode::Draw);
    click(&mut engine, &store, 0.0, 0.0);

    engine.set_overlay_mode(OverlayMode::Select);
    assert!(engine.draft.points().is_empty());
}

#[test]
fn draw_mode_click_never_deselects() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);
    engine.set_overlay_mode(OverlayMode::Draw);

    let actions = click(&mut engine, &store, 300.0, 300.0);
    assert!(!has_selection_changed(&actions));
    assert!(!engine.selection.is_empty());
}

// =============================================================
// Move tool
// =============================================================

#[test]
fn move_tool_drags_overlay_body() {
    let mut engine = ready_engine();
    let store = triangle_store();
    let id = store.overlays()[0].id;
    engine.set_tool(Tool::Move);

    engine.on_pointer_down(at(&engine, 7.0, 3.0), no_mods(), &store);
    engine.on_pointer_move(at(&engine, 27.0, 13.0), 0.0, &store);
    let actions = engine.on_pointer_up(at(&engine, 27.0, 13.0), &store);

    let Some(Action::OverlayMoved { id: moved_id, dx, dy }) = actions
        .iter()
        .find(|a| matches!(a, Action::OverlayMoved { .. }))
    else {
        panic!("expected overlay move");
    };
    assert_eq!(*moved_id, id);
    assert_eq!((*dx, *dy), (20.0, 10.0));
}

#[test]
fn move_tool_click_without_drag_moves_nothing() {
    let mut engine = ready_engine();
    let store = triangle_store();
    engine.set_tool(Tool::Move);

    let actions = click(&mut engine, &store, 7.0, 3.0);
    assert!(!has_action(&actions, |a| matches!(a, Action::OverlayMoved { .. })));
}

#[test]
fn move_tool_body_drag_previews_in_render_scene() {
    let mut engine = ready_engine();
    let store = triangle_store();
    engine.set_tool(Tool::Move);

    engine.on_pointer_down(at(&engine, 7.0, 3.0), no_mods(), &store);
    engine.on_pointer_move(at(&engine, 17.0, 3.0), 0.0, &store);

    let frame = engine.render_scene(&store);
    assert_eq!(frame.overlays[0].polygon[0], [10.0, 0.0]);
}

#[test]
fn move_tool_miss_falls_through_to_deselect() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);
    engine.set_tool(Tool::Move);

    let actions = click(&mut engine, &store, 300.0, 300.0);
    assert!(has_selection_changed(&actions));
    assert!(engine.selection.is_empty());
}

// =============================================================
// Two-point tools
// =============================================================

#[test]
fn measure_tool_reports_distance() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_tool(Tool::Measure);

    click(&mut engine, &store, 100.0, 100.0);
    let actions = click(&mut engine, &store, 130.0, 140.0);

    let Some(Action::MeasureCompleted { distance, .. }) = actions
        .iter()
        .find(|a| matches!(a, Action::MeasureCompleted { .. }))
    else {
        panic!("expected measurement");
    };
    assert_eq!(*distance, 50.0);
}

#[test]
fn measure_clicks_snap_to_entity_endpoints() {
    let mut engine = ready_engine();
    let store = empty_store();
    let e = line_entity(0.0, 0.0, 100.0, 0.0);
    load_scene(&mut engine, vec![e]);
    engine.set_tool(Tool::Measure);

    click(&mut engine, &store, 2.0, 1.0);
    let actions = click(&mut engine, &store, 300.0, 300.0);

    let Some(Action::MeasureCompleted { from, .. }) = actions
        .iter()
        .find(|a| matches!(a, Action::MeasureCompleted { .. }))
    else {
        panic!("expected measurement");
    };
    assert_eq!(*from, Point::new(0.0, 0.0));
}

#[test]
fn draw_line_tool_adds_entity_to_scene() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_tool(Tool::DrawLine);

    click(&mut engine, &store, 20.0, 20.0);
    let actions = click(&mut engine, &store, 80.0, 20.0);

    let Some(Action::EntityConstructed { id }) = actions
        .iter()
        .find(|a| matches!(a, Action::EntityConstructed { .. }))
    else {
        panic!("expected constructed entity");
    };
    let scene = engine.scene.scene().unwrap();
    let entity = scene.entity(*id).unwrap();
    assert_eq!(
        entity.kind,
        EntityKind::Line { start: Point::new(20.0, 20.0), end: Point::new(80.0, 20.0) }
    );
}

#[test]
fn switching_tools_resets_two_point_state() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_tool(Tool::Measure);
    click(&mut engine, &store, 10.0, 10.0);

    engine.set_tool(Tool::DrawLine);
    // The first measure click must not leak into the line tool.
    let actions = click(&mut engine, &store, 50.0, 50.0);
    assert!(!has_action(&actions, |a| matches!(a, Action::EntityConstructed { .. })));
    assert!(!has_action(&actions, |a| matches!(a, Action::MeasureCompleted { .. })));
}

// =============================================================
// Construction tools
// =============================================================

#[test]
fn parallel_line_constructed_through_second_pick() {
    let mut engine = ready_engine();
    let store = empty_store();
    let reference = line_entity(0.0, 0.0, 10.0, 0.0);
    let through = line_entity(40.0, 40.0, 60.0, 60.0);
    load_scene(&mut engine, vec![reference, through]);
    engine.set_tool(Tool::ParallelLine);

    // Pick the reference line, then the anchor entity.
    click(&mut engine, &store, 5.0, 0.0);
    engine.scene.flush_renderer_sync();
    let actions = click(&mut engine, &store, 50.0, 50.0);

    let Some(Action::EntityConstructed { id }) = actions
        .iter()
        .find(|a| matches!(a, Action::EntityConstructed { .. }))
    else {
        panic!("expected constructed entity");
    };
    let scene = engine.scene.scene().unwrap();
    let EntityKind::Line { start, end } = scene.entity(*id).unwrap().kind else {
        panic!("expected line");
    };
    // Through the anchor's midpoint (50, 50), parallel to (10, 0).
    assert_eq!(start, Point::new(45.0, 50.0));
    assert_eq!(end, Point::new(55.0, 50.0));
}

#[test]
fn perpendicular_line_rotates_direction() {
    let mut engine = ready_engine();
    let store = empty_store();
    let reference = line_entity(0.0, 0.0, 10.0, 0.0);
    let through = line_entity(40.0, 40.0, 60.0, 60.0);
    load_scene(&mut engine, vec![reference, through]);
    engine.set_tool(Tool::PerpendicularLine);

    click(&mut engine, &store, 5.0, 0.0);
    engine.scene.flush_renderer_sync();
    let actions = click(&mut engine, &store, 50.0, 50.0);

    let Some(Action::EntityConstructed { id }) = actions
        .iter()
        .find(|a| matches!(a, Action::EntityConstructed { .. }))
    else {
        panic!("expected constructed entity");
    };
    let scene = engine.scene.scene().unwrap();
    let EntityKind::Line { start, end } = scene.entity(*id).unwrap().kind else {
        panic!("expected line");
    };
    assert_eq!(start, Point::new(50.0, 45.0));
    assert_eq!(end, Point::new(50.0, 55.0));
}

#[test]
fn construction_miss_reprompts_without_advancing() {
    let mut engine = ready_engine();
    let store = empty_store();
    let reference = line_entity(0.0, 0.0, 10.0, 0.0);
    let through = line_entity(40.0, 40.0, 60.0, 60.0);
    load_scene(&mut engine, vec![reference, through]);
    engine.set_tool(Tool::ParallelLine);

    // A miss: empty canvas. The tool stays on step one.
    let miss = click(&mut engine, &store, 300.0, 10.0);
    assert!(!has_action(&miss, |a| matches!(a, Action::EntityConstructed { .. })));

    // Two real picks still work from scratch.
    click(&mut engine, &store, 5.0, 0.0);
    engine.scene.flush_renderer_sync();
    let actions = click(&mut engine, &store, 50.0, 50.0);
    assert!(has_action(&actions, |a| matches!(a, Action::EntityConstructed { .. })));
}

#[test]
fn construction_clicks_never_deselect() {
    let mut engine = ready_engine();
    let store = triangle_store();
    // A pre-existing selection must survive construction-mode misses.
    select_first_overlay(&mut engine, &store);
    load_scene(&mut engine, vec![line_entity(0.0, 50.0, 10.0, 50.0)]);
    engine.set_tool(Tool::ParallelLine);
    engine.selection.select_only(ShapeRef::Overlay(store.overlays()[0].id));

    let actions = click(&mut engine, &store, 300.0, 300.0);
    assert!(!has_selection_changed(&actions));
    assert!(!engine.selection.is_empty());
}

// =============================================================
// Tool / mode / level switches
// =============================================================

#[test]
fn switching_to_drawing_tool_clears_selection() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);

    let actions = engine.set_tool(Tool::DrawLine);
    assert!(has_selection_changed(&actions));
    assert!(engine.selection.is_empty());
}

#[test]
fn switching_between_select_tools_keeps_selection() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);

    engine.set_tool(Tool::Move);
    assert!(!engine.selection.is_empty());
}

#[test]
fn set_same_tool_is_noop() {
    let mut engine = ready_engine();
    assert!(engine.set_tool(Tool::Select).is_empty());
}

#[test]
fn level_switch_clears_selection_and_draft() {
    let mut engine = ready_engine();
    let store = triangle_store();
    select_first_overlay(&mut engine, &store);
    engine.set_overlay_mode(OverlayMode::Draw);
    click(&mut engine, &store, 0.0, 0.0);

    let actions = engine.on_level_changed();
    assert!(has_selection_changed(&actions));
    assert!(engine.selection.is_empty());
    assert!(engine.draft.points().is_empty());
}

// =============================================================
// Render scene integration
// =============================================================

#[test]
fn render_scene_tracks_cursor() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.on_pointer_move(at(&engine, 42.0, 24.0), 0.0, &store);

    let frame = engine.render_scene(&store);
    assert_eq!(frame.cursor, Some(Point::new(42.0, 24.0)));
}

#[test]
fn render_scene_preview_segment_while_measuring() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_tool(Tool::Measure);
    click(&mut engine, &store, 10.0, 10.0);
    engine.on_pointer_move(at(&engine, 30.0, 30.0), 0.0, &store);

    let frame = engine.render_scene(&store);
    assert_eq!(frame.preview_segment, Some((Point::new(10.0, 10.0), Point::new(30.0, 30.0))));
}

#[test]
fn render_scene_includes_draft_ring() {
    let mut engine = ready_engine();
    let store = empty_store();
    engine.set_overlay_mode(OverlayMode::Draw);
    click(&mut engine, &store, 0.0, 0.0);
    click(&mut engine, &store, 10.0, 0.0);

    let frame = engine.render_scene(&store);
    assert_eq!(frame.draft_points.len(), 2);
}
