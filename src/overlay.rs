//! Overlay regions: user-drawn polygons layered over the drawing, their
//! store, and the persistence boundary.
//!
//! The store is the single owner of overlay persistence. It keeps the
//! in-memory set for the active level, normalizes every polygon that crosses
//! the wire, and talks to an [`OverlayPersistence`] collaborator for
//! durability. Mutations persist first and apply in memory only on success,
//! so a rejected save never leaves ghost state behind.
//!
//! POLYGON WIRE FORMS
//! ==================
//! The external store has historically returned polygons in three shapes:
//! array-of-`{x,y}` objects, flat `[x1,y1,x2,y2,…]`, and nested
//! `[[x,y],…]`. All three are accepted on read and normalized to the nested
//! form in memory; writes always emit the array-of-objects form the store
//! expects. Patches must omit unset fields entirely — the store rejects
//! literal nulls standing in for "leave unchanged".

#[cfg(test)]
#[path = "overlay_test.rs"]
mod overlay_test;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::consts::{DUPLICATE_LABEL_SUFFIX, DUPLICATE_OFFSET, MIN_POLY_POINTS};
use crate::geom::Point;

/// Unique identifier for an overlay region.
pub type OverlayId = Uuid;

/// What an overlay region represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    /// A sellable/lettable unit.
    Unit,
    /// A free-form zone (common area, easement, …).
    Zone,
    /// A note attached to a region.
    Annotation,
}

/// Sale status of a unit overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayStatus {
    Available,
    Reserved,
    Sold,
}

/// One polygon vertex in the store's preferred wire form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    pub x: f64,
    pub y: f64,
}

/// A polygon as it may arrive from the persistence layer.
///
/// Variant order matters: `serde` tries them top to bottom, and a nested
/// pair array must not be mistaken for a sequence-encoded [`WirePoint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WirePolygon {
    /// `[[x, y], …]`
    Nested(Vec<[f64; 2]>),
    /// `[{x, y}, …]`
    Points(Vec<WirePoint>),
    /// `[x1, y1, x2, y2, …]`
    Flat(Vec<f64>),
}

impl WirePolygon {
    /// Normalize to the in-memory `[[x, y], …]` form. A flat array with a
    /// dangling odd coordinate drops the remainder.
    #[must_use]
    pub fn normalize(&self) -> Vec<[f64; 2]> {
        match self {
            WirePolygon::Nested(pairs) => pairs.clone(),
            WirePolygon::Points(points) => points.iter().map(|p| [p.x, p.y]).collect(),
            WirePolygon::Flat(coords) => {
                if coords.len() % 2 != 0 {
                    warn!(len = coords.len(), "flat polygon has odd length, dropping remainder");
                }
                coords.chunks_exact(2).map(|c| [c[0], c[1]]).collect()
            }
        }
    }

    /// The array-of-objects form the store expects on every write.
    #[must_use]
    pub fn to_wire(polygon: &[[f64; 2]]) -> WirePolygon {
        WirePolygon::Points(polygon.iter().map(|[x, y]| WirePoint { x: *x, y: *y }).collect())
    }
}

/// An overlay document as persisted, polygon in whatever form the store
/// returned it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayDoc {
    pub id: OverlayId,
    pub level_id: String,
    pub kind: OverlayKind,
    pub status: OverlayStatus,
    pub polygon: WirePolygon,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An overlay region with its polygon normalized for in-memory use.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub id: OverlayId,
    pub level_id: String,
    pub kind: OverlayKind,
    pub status: OverlayStatus,
    /// Always the nested `[[x, y], …]` form, ≥ [`MIN_POLY_POINTS`] vertices
    /// for a committed region.
    pub polygon: Vec<[f64; 2]>,
    pub label: Option<String>,
    pub linked: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Overlay {
    #[must_use]
    pub fn from_doc(doc: &OverlayDoc) -> Self {
        Self {
            id: doc.id,
            level_id: doc.level_id.clone(),
            kind: doc.kind,
            status: doc.status,
            polygon: doc.polygon.normalize(),
            label: doc.label.clone(),
            linked: doc.linked.clone(),
            created_by: doc.created_by.clone(),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }

    #[must_use]
    pub fn to_doc(&self) -> OverlayDoc {
        OverlayDoc {
            id: self.id,
            level_id: self.level_id.clone(),
            kind: self.kind,
            status: self.status,
            polygon: WirePolygon::to_wire(&self.polygon),
            label: self.label.clone(),
            linked: self.linked.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Input for creating a new overlay on the current level.
#[derive(Debug, Clone)]
pub struct NewOverlay {
    pub kind: OverlayKind,
    pub status: OverlayStatus,
    pub polygon: Vec<[f64; 2]>,
    pub label: Option<String>,
    pub linked: Option<String>,
    pub created_by: Option<String>,
}

/// Sparse update for an overlay. Only present fields reach the store.
#[derive(Debug, Clone, Default)]
pub struct OverlayPatch {
    pub kind: Option<OverlayKind>,
    pub status: Option<OverlayStatus>,
    pub polygon: Option<Vec<[f64; 2]>>,
    pub label: Option<String>,
    pub linked: Option<String>,
}

impl OverlayPatch {
    /// Build the wire patch object: set fields only, polygon in
    /// array-of-objects form, `updated_at` stamped.
    #[must_use]
    fn to_wire_patch(&self, updated_at: i64) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if let Some(kind) = self.kind {
            obj.insert("kind".to_owned(), to_json(&kind));
        }
        if let Some(status) = self.status {
            obj.insert("status".to_owned(), to_json(&status));
        }
        if let Some(polygon) = &self.polygon {
            obj.insert("polygon".to_owned(), to_json(&WirePolygon::to_wire(polygon)));
        }
        if let Some(label) = &self.label {
            obj.insert("label".to_owned(), to_json(label));
        }
        if let Some(linked) = &self.linked {
            obj.insert("linked".to_owned(), to_json(linked));
        }
        obj.insert("updated_at".to_owned(), to_json(&updated_at));
        serde_json::Value::Object(obj)
    }
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Overlay store failure modes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no level is currently active")]
    MissingLevel,
    #[error("unknown overlay {0}")]
    UnknownOverlay(OverlayId),
    #[error("persistence rejected the operation: {0}")]
    Backend(String),
}

/// The document-store collaborator. Overlay documents are keyed by
/// `(level_id, overlay_id)`; patches are sparse objects containing only the
/// fields being set.
#[async_trait]
pub trait OverlayPersistence: Send + Sync {
    async fn create(&self, level_id: &str, doc: &OverlayDoc) -> Result<(), StoreError>;
    async fn patch(
        &self,
        level_id: &str,
        id: OverlayId,
        fields: &serde_json::Value,
    ) -> Result<(), StoreError>;
    async fn delete(&self, level_id: &str, id: OverlayId) -> Result<(), StoreError>;
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// In-memory overlay set for the active level plus the persistence boundary.
pub struct OverlayStore {
    persistence: Arc<dyn OverlayPersistence>,
    current_level: Option<String>,
    overlays: Vec<Overlay>,
}

impl OverlayStore {
    #[must_use]
    pub fn new(persistence: Arc<dyn OverlayPersistence>) -> Self {
        Self { persistence, current_level: None, overlays: Vec::new() }
    }

    #[must_use]
    pub fn current_level(&self) -> Option<&str> {
        self.current_level.as_deref()
    }

    /// Switch the active level. The in-memory set clears; the snapshot for
    /// the new level arrives via [`Self::load_snapshot`].
    pub fn set_current_level(&mut self, level_id: Option<String>) {
        if self.current_level != level_id {
            self.overlays.clear();
        }
        self.current_level = level_id;
    }

    /// Overlays of the active level, in snapshot/creation order. Hit-testing
    /// iterates this order, first match wins.
    #[must_use]
    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    #[must_use]
    pub fn overlay(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.iter().find(|o| o.id == id)
    }

    /// Apply a full snapshot from the subscription feed. Every snapshot is
    /// the complete overlay set for its level, not a diff; a snapshot for a
    /// level other than the active one is stale and dropped.
    pub fn load_snapshot(&mut self, level_id: &str, docs: &[OverlayDoc]) {
        if self.current_level.as_deref() != Some(level_id) {
            warn!(level_id, "dropping overlay snapshot for inactive level");
            return;
        }
        self.overlays = docs.iter().map(Overlay::from_doc).collect();
    }

    /// Create an overlay on the current level. Returns the new id.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingLevel`] when no level is active;
    /// [`StoreError::Backend`] when persistence rejects the write.
    pub async fn add(&mut self, data: NewOverlay) -> Result<OverlayId, StoreError> {
        let Some(level_id) = self.current_level.clone() else {
            warn!("overlay add with no active level");
            return Err(StoreError::MissingLevel);
        };
        let now = now_ms();
        let overlay = Overlay {
            id: Uuid::new_v4(),
            level_id: level_id.clone(),
            kind: data.kind,
            status: data.status,
            polygon: data.polygon,
            label: data.label,
            linked: data.linked,
            created_by: data.created_by,
            created_at: now,
            updated_at: now,
        };
        self.persistence.create(&level_id, &overlay.to_doc()).await?;
        let id = overlay.id;
        self.overlays.push(overlay);
        Ok(id)
    }

    /// Patch an overlay. Unset fields are omitted from the persisted patch.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownOverlay`] for an unknown id, plus the usual
    /// level/persistence failures.
    pub async fn update(&mut self, id: OverlayId, patch: OverlayPatch) -> Result<(), StoreError> {
        let Some(level_id) = self.current_level.clone() else {
            warn!(%id, "overlay update with no active level");
            return Err(StoreError::MissingLevel);
        };
        if self.overlay(id).is_none() {
            return Err(StoreError::UnknownOverlay(id));
        }
        let now = now_ms();
        let wire = patch.to_wire_patch(now);
        self.persistence.patch(&level_id, id, &wire).await?;

        if let Some(overlay) = self.overlays.iter_mut().find(|o| o.id == id) {
            if let Some(kind) = patch.kind {
                overlay.kind = kind;
            }
            if let Some(status) = patch.status {
                overlay.status = status;
            }
            if let Some(polygon) = patch.polygon {
                overlay.polygon = polygon;
            }
            if let Some(label) = patch.label {
                overlay.label = Some(label);
            }
            if let Some(linked) = patch.linked {
                overlay.linked = Some(linked);
            }
            overlay.updated_at = now;
        }
        Ok(())
    }

    /// Delete an overlay by id.
    ///
    /// # Errors
    ///
    /// See [`Self::update`].
    pub async fn remove(&mut self, id: OverlayId) -> Result<(), StoreError> {
        let Some(level_id) = self.current_level.clone() else {
            warn!(%id, "overlay remove with no active level");
            return Err(StoreError::MissingLevel);
        };
        if self.overlay(id).is_none() {
            return Err(StoreError::UnknownOverlay(id));
        }
        self.persistence.delete(&level_id, id).await?;
        self.overlays.retain(|o| o.id != id);
        Ok(())
    }

    /// Re-create a previously removed overlay under its original id,
    /// preserving its creation metadata. The undo path for [`Self::remove`].
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingLevel`] / [`StoreError::Backend`].
    pub async fn restore(&mut self, overlay: Overlay) -> Result<(), StoreError> {
        let Some(level_id) = self.current_level.clone() else {
            warn!(id = %overlay.id, "overlay restore with no active level");
            return Err(StoreError::MissingLevel);
        };
        let mut overlay = overlay;
        overlay.level_id = level_id.clone();
        overlay.updated_at = now_ms();
        self.persistence.create(&level_id, &overlay.to_doc()).await?;
        self.overlays.push(overlay);
        Ok(())
    }

    /// Clone an overlay, nudged by [`DUPLICATE_OFFSET`] on both axes with a
    /// suffixed label. Returns `None` for an unknown source id.
    ///
    /// # Errors
    ///
    /// See [`Self::add`].
    pub async fn duplicate(&mut self, id: OverlayId) -> Result<Option<OverlayId>, StoreError> {
        let Some(source) = self.overlay(id) else {
            warn!(%id, "duplicate of unknown overlay");
            return Ok(None);
        };
        let data = NewOverlay {
            kind: source.kind,
            status: source.status,
            polygon: source
                .polygon
                .iter()
                .map(|[x, y]| [x + DUPLICATE_OFFSET, y + DUPLICATE_OFFSET])
                .collect(),
            label: source
                .label
                .clone()
                .map(|l| format!("{l}{DUPLICATE_LABEL_SUFFIX}")),
            linked: source.linked.clone(),
            created_by: source.created_by.clone(),
        };
        self.add(data).await.map(Some)
    }

    /// Splice a vertex into the polygon at `insert_index` (clamped to the
    /// vertex count) and persist.
    ///
    /// # Errors
    ///
    /// See [`Self::update`].
    pub async fn add_vertex(
        &mut self,
        id: OverlayId,
        insert_index: usize,
        vertex: Point,
    ) -> Result<bool, StoreError> {
        let Some(overlay) = self.overlay(id) else {
            warn!(%id, "add_vertex on unknown overlay");
            return Ok(false);
        };
        let mut polygon = overlay.polygon.clone();
        let index = insert_index.min(polygon.len());
        polygon.insert(index, vertex.to_pair());
        self.update(id, OverlayPatch { polygon: Some(polygon), ..OverlayPatch::default() })
            .await?;
        Ok(true)
    }

    /// Replace one vertex. Out-of-range indexes are refused.
    ///
    /// # Errors
    ///
    /// See [`Self::update`].
    pub async fn update_vertex(
        &mut self,
        id: OverlayId,
        vertex_index: usize,
        new_position: Point,
    ) -> Result<bool, StoreError> {
        let Some(overlay) = self.overlay(id) else {
            warn!(%id, "update_vertex on unknown overlay");
            return Ok(false);
        };
        if vertex_index >= overlay.polygon.len() {
            warn!(
                %id,
                vertex_index,
                len = overlay.polygon.len(),
                "update_vertex index out of range"
            );
            return Ok(false);
        }
        let mut polygon = overlay.polygon.clone();
        polygon[vertex_index] = new_position.to_pair();
        self.update(id, OverlayPatch { polygon: Some(polygon), ..OverlayPatch::default() })
            .await?;
        Ok(true)
    }

    /// Remove one vertex. Refused when the index is out of range or the
    /// polygon would drop below [`MIN_POLY_POINTS`] vertices.
    ///
    /// # Errors
    ///
    /// See [`Self::update`].
    pub async fn remove_vertex(
        &mut self,
        id: OverlayId,
        vertex_index: usize,
    ) -> Result<bool, StoreError> {
        let Some(overlay) = self.overlay(id) else {
            warn!(%id, "remove_vertex on unknown overlay");
            return Ok(false);
        };
        if vertex_index >= overlay.polygon.len() {
            warn!(
                %id,
                vertex_index,
                len = overlay.polygon.len(),
                "remove_vertex index out of range"
            );
            return Ok(false);
        }
        if overlay.polygon.len() <= MIN_POLY_POINTS {
            warn!(
                %id,
                len = overlay.polygon.len(),
                "remove_vertex refused: polygon at minimum vertex count"
            );
            return Ok(false);
        }
        let mut polygon = overlay.polygon.clone();
        polygon.remove(vertex_index);
        self.update(id, OverlayPatch { polygon: Some(polygon), ..OverlayPatch::default() })
            .await?;
        Ok(true)
    }
}
