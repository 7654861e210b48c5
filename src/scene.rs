//! Scene model: parsed drawing entities, layers, and the update coordinator.
//!
//! The scene arrives pre-parsed (DXF parsing happens upstream) and is owned
//! exclusively by [`SceneCoordinator`]. Consumers read through its accessors
//! and mutate only through its update API; nothing else holds a mutable
//! handle to the entity list. Each accepted update stamps a monotonically
//! increasing version on the stored model.
//!
//! The coordinator decouples the synchronous reactive notification from the
//! imperative renderer: an accepted update marks a renderer sync pending and
//! the host flushes it on its next animation frame. While a sync is pending
//! the coordinator is busy and further updates are dropped (counted, never
//! queued).

#[cfg(test)]
#[path = "scene_test.rs"]
mod scene_test;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::geom::{Bounds, Point};

/// Unique identifier for a scene entity.
pub type EntityId = Uuid;

fn default_true() -> bool {
    true
}

/// Geometry payload of an entity, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntityKind {
    Line {
        start: Point,
        end: Point,
    },
    Circle {
        center: Point,
        radius: f64,
    },
    Polyline {
        vertices: Vec<Point>,
        closed: bool,
    },
    Arc {
        center: Point,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        #[serde(default = "default_true")]
        ccw: bool,
    },
    Text {
        position: Point,
        text: String,
        height: f64,
        #[serde(default)]
        rotation: f64,
    },
    Rectangle {
        corner1: Point,
        corner2: Point,
    },
}

impl EntityKind {
    /// Rectangles are a convenience input form; everything downstream of the
    /// scene (hit-testing, render output) sees them as closed 4-vertex
    /// polylines.
    #[must_use]
    pub fn canonical(&self) -> EntityKind {
        match self {
            EntityKind::Rectangle { corner1, corner2 } => EntityKind::Polyline {
                vertices: vec![
                    Point::new(corner1.x, corner1.y),
                    Point::new(corner2.x, corner1.y),
                    Point::new(corner2.x, corner2.y),
                    Point::new(corner1.x, corner2.y),
                ],
                closed: true,
            },
            other => other.clone(),
        }
    }

    /// A single representative point, used when a tool needs "where this
    /// entity is" rather than its full geometry.
    #[must_use]
    pub fn reference_point(&self) -> Point {
        match self {
            EntityKind::Line { start, end } => crate::geom::midpoint(*start, *end),
            EntityKind::Circle { center, .. } | EntityKind::Arc { center, .. } => *center,
            EntityKind::Polyline { vertices, .. } => {
                vertices.first().copied().unwrap_or_default()
            }
            EntityKind::Text { position, .. } => *position,
            EntityKind::Rectangle { corner1, corner2 } => {
                crate::geom::midpoint(*corner1, *corner2)
            }
        }
    }

    /// Points that bound this geometry, for scene-extent computation.
    #[must_use]
    pub fn bounding_points(&self) -> Vec<Point> {
        match self {
            EntityKind::Line { start, end } => vec![*start, *end],
            EntityKind::Circle { center, radius }
            | EntityKind::Arc { center, radius, .. } => vec![
                Point::new(center.x - radius, center.y - radius),
                Point::new(center.x + radius, center.y + radius),
            ],
            EntityKind::Polyline { vertices, .. } => vertices.clone(),
            EntityKind::Text { position, .. } => vec![*position],
            EntityKind::Rectangle { corner1, corner2 } => vec![*corner1, *corner2],
        }
    }
}

/// A drawing entity with its resolved styling envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable unique identifier.
    pub id: EntityId,
    /// Geometry payload.
    #[serde(flatten)]
    pub kind: EntityKind,
    /// Name of the layer this entity belongs to.
    pub layer: String,
    /// Stroke color; falls back to the layer color when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Stroke weight in drawing units, if specified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineweight: Option<f64>,
    /// Per-entity visibility flag; the layer flag ANDs with this.
    #[serde(default = "default_true")]
    pub visible: bool,
}

/// Display properties of a drawing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
}

/// A full parsed drawing: entities plus the layer table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneModel {
    pub entities: Vec<Entity>,
    pub layers: HashMap<String, LayerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    /// Stamped by the coordinator on every accepted update.
    #[serde(default)]
    pub version: u64,
}

impl SceneModel {
    /// An empty scene with no layers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entities: Vec::new(),
            layers: HashMap::new(),
            bounds: None,
            version: 0,
        }
    }

    /// Extent of all entity geometry. `None` for an empty scene.
    #[must_use]
    pub fn compute_bounds(&self) -> Option<Bounds> {
        Bounds::from_points(
            self.entities
                .iter()
                .flat_map(|e| e.kind.bounding_points()),
        )
    }

    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Whether an entity should be shown: its own flag ANDed with its
    /// layer's. An entity on an unknown layer counts as visible.
    #[must_use]
    pub fn resolved_visible(&self, entity: &Entity) -> bool {
        entity.visible && self.layers.get(&entity.layer).is_none_or(|l| l.visible)
    }
}

/// Why a scene update was rejected.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("duplicate entity id {0}")]
    DuplicateEntityId(EntityId),
    #[error("entity {0} has non-finite geometry")]
    NonFiniteGeometry(EntityId),
    #[error("entity {0} has a negative radius")]
    NegativeRadius(EntityId),
    #[error("entity {0} has an empty polyline")]
    EmptyPolyline(EntityId),
}

fn validate_entity(entity: &Entity) -> Result<(), SceneError> {
    let finite = match &entity.kind {
        EntityKind::Line { start, end } => start.is_finite() && end.is_finite(),
        EntityKind::Circle { center, radius } => center.is_finite() && radius.is_finite(),
        EntityKind::Polyline { vertices, .. } => {
            if vertices.is_empty() {
                return Err(SceneError::EmptyPolyline(entity.id));
            }
            vertices.iter().all(|v| v.is_finite())
        }
        EntityKind::Arc { center, radius, start_angle, end_angle, .. } => {
            center.is_finite()
                && radius.is_finite()
                && start_angle.is_finite()
                && end_angle.is_finite()
        }
        EntityKind::Text { position, height, .. } => {
            position.is_finite() && height.is_finite()
        }
        EntityKind::Rectangle { corner1, corner2 } => {
            corner1.is_finite() && corner2.is_finite()
        }
    };
    if !finite {
        return Err(SceneError::NonFiniteGeometry(entity.id));
    }
    match &entity.kind {
        EntityKind::Circle { radius, .. } | EntityKind::Arc { radius, .. }
            if *radius < 0.0 =>
        {
            Err(SceneError::NegativeRadius(entity.id))
        }
        _ => Ok(()),
    }
}

fn validate_scene(scene: &SceneModel) -> Result<(), SceneError> {
    let mut seen = std::collections::HashSet::with_capacity(scene.entities.len());
    for entity in &scene.entities {
        if !seen.insert(entity.id) {
            return Err(SceneError::DuplicateEntityId(entity.id));
        }
        validate_entity(entity)?;
    }
    Ok(())
}

/// Sparse update for one entity. Only present fields are applied.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineweight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

/// Provenance labels for an update, recorded in the statistics.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub source: String,
    pub reason: String,
    /// Skip the deferred renderer sync (reactive consumers still notified).
    pub skip_renderer_update: bool,
}

impl UpdateOptions {
    #[must_use]
    pub fn source(source: &str) -> Self {
        Self { source: source.to_owned(), ..Self::default() }
    }
}

/// What became of an update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The scene was replaced and the version bumped.
    Applied,
    /// An update was already in flight; this one was dropped.
    SkippedBusy,
    /// Validation failed; the prior scene is untouched.
    Rejected,
    /// Nothing to do (unknown id, no scene).
    Noop,
}

/// Update counters and provenance, for observability only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Accepted updates.
    pub total: u64,
    /// Reactive-consumer notifications delivered.
    pub react: u64,
    /// Renderer syncs flushed.
    pub renderer: u64,
    /// Updates dropped because one was in flight.
    pub skipped: u64,
    pub last_source: Option<String>,
    pub last_reason: Option<String>,
}

type Observer = Box<dyn FnMut(Option<&SceneModel>)>;

/// Exclusive owner of the scene; see the module docs for the update model.
pub struct SceneCoordinator {
    scene: Option<SceneModel>,
    version: u64,
    busy: bool,
    pending_render: bool,
    stats: UpdateStats,
    observer: Option<Observer>,
}

impl Default for SceneCoordinator {
    fn default() -> Self {
        Self {
            scene: None,
            version: 0,
            busy: false,
            pending_render: false,
            stats: UpdateStats::default(),
            observer: None,
        }
    }
}

impl SceneCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the reactive consumer, notified synchronously on every
    /// accepted update.
    pub fn set_observer(&mut self, observer: impl FnMut(Option<&SceneModel>) + 'static) {
        self.observer = Some(Box::new(observer));
    }

    #[must_use]
    pub fn scene(&self) -> Option<&SceneModel> {
        self.scene.as_ref()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn stats(&self) -> &UpdateStats {
        &self.stats
    }

    /// Whether an update is in flight (renderer sync not yet flushed).
    #[must_use]
    pub fn busy(&self) -> bool {
        self.busy
    }

    /// Replace (or clear, with `None`) the scene.
    ///
    /// Rejected updates and drops leave the stored scene untouched. On
    /// acceptance the reactive observer fires synchronously and, unless
    /// `skip_renderer_update` is set, a renderer sync becomes pending until
    /// [`Self::flush_renderer_sync`].
    pub fn update_scene(
        &mut self,
        new_scene: Option<SceneModel>,
        opts: &UpdateOptions,
    ) -> UpdateOutcome {
        if self.busy {
            self.stats.skipped += 1;
            debug!(
                source = %opts.source,
                skipped = self.stats.skipped,
                "scene update dropped: update already in flight"
            );
            return UpdateOutcome::SkippedBusy;
        }

        let mut new_scene = new_scene;
        if let Some(scene) = &mut new_scene {
            if let Err(e) = validate_scene(scene) {
                warn!(source = %opts.source, error = %e, "scene update rejected");
                return UpdateOutcome::Rejected;
            }
            self.version += 1;
            scene.version = self.version;
            if scene.bounds.is_none() {
                scene.bounds = scene.compute_bounds();
            }
        } else {
            self.version += 1;
        }

        self.scene = new_scene;
        self.stats.total += 1;
        self.stats.last_source = Some(opts.source.clone());
        self.stats.last_reason = Some(opts.reason.clone());

        self.stats.react += 1;
        if let Some(observer) = &mut self.observer {
            observer(self.scene.as_ref());
        }

        if opts.skip_renderer_update {
            self.busy = false;
        } else {
            self.pending_render = true;
            self.busy = true;
        }
        UpdateOutcome::Applied
    }

    /// Host-driven frame callback. Returns `true` when a renderer sync was
    /// pending; the renderer should then re-read [`Self::scene`]. Clears the
    /// busy flag so the next update is accepted.
    pub fn flush_renderer_sync(&mut self) -> bool {
        if !self.pending_render {
            return false;
        }
        self.pending_render = false;
        self.busy = false;
        self.stats.renderer += 1;
        true
    }

    /// Append one entity, creating an empty scene when none is loaded.
    pub fn add_entity(&mut self, entity: Entity, opts: &UpdateOptions) -> UpdateOutcome {
        let mut scene = self.scene.clone().unwrap_or_else(SceneModel::empty);
        scene.entities.push(entity);
        scene.bounds = None;
        self.update_scene(Some(scene), opts)
    }

    /// Remove one entity by id. Unknown id or no scene is a warned no-op.
    pub fn remove_entity(&mut self, id: EntityId, opts: &UpdateOptions) -> UpdateOutcome {
        let Some(current) = &self.scene else {
            warn!(%id, "remove_entity with no scene loaded");
            return UpdateOutcome::Noop;
        };
        if current.entity(id).is_none() {
            warn!(%id, "remove_entity: unknown entity");
            return UpdateOutcome::Noop;
        }
        let mut scene = current.clone();
        scene.entities.retain(|e| e.id != id);
        scene.bounds = None;
        self.update_scene(Some(scene), opts)
    }

    /// Apply a sparse patch to one entity. Unknown id or no scene is a
    /// warned no-op.
    pub fn update_entity(
        &mut self,
        id: EntityId,
        patch: &EntityPatch,
        opts: &UpdateOptions,
    ) -> UpdateOutcome {
        let Some(current) = &self.scene else {
            warn!(%id, "update_entity with no scene loaded");
            return UpdateOutcome::Noop;
        };
        if current.entity(id).is_none() {
            warn!(%id, "update_entity: unknown entity");
            return UpdateOutcome::Noop;
        }
        let mut scene = current.clone();
        let Some(entity) = scene.entities.iter_mut().find(|e| e.id == id) else {
            return UpdateOutcome::Noop;
        };
        if let Some(kind) = &patch.kind {
            entity.kind = kind.clone();
        }
        if let Some(layer) = &patch.layer {
            entity.layer = layer.clone();
        }
        if let Some(color) = &patch.color {
            entity.color = Some(color.clone());
        }
        if let Some(lineweight) = patch.lineweight {
            entity.lineweight = Some(lineweight);
        }
        if let Some(visible) = patch.visible {
            entity.visible = visible;
        }
        scene.bounds = None;
        self.update_scene(Some(scene), opts)
    }
}
