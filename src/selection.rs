//! Selection state: the single authority for what is selected.
//!
//! Overlay and scene stores deliberately carry no `selected` flags of their
//! own — duplicated selection state desyncs. Everything that needs to know
//! what is selected asks this service.

#[cfg(test)]
#[path = "selection_test.rs"]
mod selection_test;

use crate::overlay::OverlayId;
use crate::scene::EntityId;

/// A reference to a selectable shape: an overlay region or a drawing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeRef {
    Overlay(OverlayId),
    Entity(EntityId),
}

/// Ordered selection set with at most one primary entry.
///
/// The primary is the target for single-shape operations (property panel,
/// per-overlay toolbar); it is always a member of the set.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    items: Vec<ShapeRef>,
    primary: Option<ShapeRef>,
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn items(&self) -> &[ShapeRef] {
        &self.items
    }

    #[must_use]
    pub fn primary(&self) -> Option<ShapeRef> {
        self.primary
    }

    #[must_use]
    pub fn contains(&self, shape: ShapeRef) -> bool {
        self.items.contains(&shape)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Replace the whole selection with one shape, which becomes primary.
    pub fn select_only(&mut self, shape: ShapeRef) {
        self.items.clear();
        self.items.push(shape);
        self.primary = Some(shape);
    }

    /// Add to the selection without disturbing the primary. The first shape
    /// added to an empty selection becomes primary.
    pub fn add(&mut self, shape: ShapeRef) {
        if !self.items.contains(&shape) {
            self.items.push(shape);
        }
        if self.primary.is_none() {
            self.primary = Some(shape);
        }
    }

    /// Add if absent, remove if present.
    pub fn toggle(&mut self, shape: ShapeRef) {
        if self.contains(shape) {
            self.remove(shape);
        } else {
            self.add(shape);
        }
    }

    /// Remove one shape. A removed primary falls back to the first
    /// remaining entry.
    pub fn remove(&mut self, shape: ShapeRef) {
        self.items.retain(|s| *s != shape);
        if self.primary == Some(shape) {
            self.primary = self.items.first().copied();
        }
    }

    /// Promote an already-selected shape to primary. Ignored for
    /// non-members.
    pub fn set_primary(&mut self, shape: ShapeRef) {
        if self.contains(shape) {
            self.primary = Some(shape);
        }
    }

    /// Clear everything. Returns whether anything was selected.
    pub fn clear(&mut self) -> bool {
        let had = !self.items.is_empty();
        self.items.clear();
        self.primary = None;
        had
    }
}
