//! Draft polygon construction: the in-progress overlay before it is
//! committed to the store.
//!
//! `Empty → Accumulating → Committing → Empty` on a successful save; a
//! failed save returns to `Accumulating` with every point intact so the
//! user can retry. While a commit is in flight further clicks are ignored —
//! the synchronous `Committing` guard is what stops a rapid double-click
//! from submitting the polygon twice.

#[cfg(test)]
#[path = "draft_test.rs"]
mod draft_test;

use tracing::debug;

use crate::consts::MIN_POLY_POINTS;
use crate::geom::Point;

/// Phase of the draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DraftState {
    /// No points yet.
    #[default]
    Empty,
    /// One or more points placed; more clicks extend the ring.
    Accumulating,
    /// An async save is in flight; input is ignored until the host reports
    /// the outcome.
    Committing,
}

/// The draft polygon under construction.
#[derive(Debug, Clone, Default)]
pub struct DraftPolygon {
    points: Vec<Point>,
    state: DraftState,
}

impl DraftPolygon {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> DraftState {
        self.state
    }

    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[must_use]
    pub fn is_committing(&self) -> bool {
        self.state == DraftState::Committing
    }

    /// Whether a click at `p` should close the ring: at least
    /// [`MIN_POLY_POINTS`] points placed and `p` within `tolerance` of the
    /// first one.
    #[must_use]
    pub fn should_close(&self, p: Point, tolerance: f64) -> bool {
        if self.state != DraftState::Accumulating || self.points.len() < MIN_POLY_POINTS {
            return false;
        }
        self.points
            .first()
            .is_some_and(|first| first.distance_to(p) <= tolerance)
    }

    /// Append a vertex. Ignored (returns `false`) while a commit is in
    /// flight.
    pub fn add_point(&mut self, p: Point) -> bool {
        if self.state == DraftState::Committing {
            debug!("draft point ignored: commit in flight");
            return false;
        }
        self.points.push(p);
        self.state = DraftState::Accumulating;
        true
    }

    /// Enter the committing phase and hand back the polygon to save.
    /// Returns `None` when the draft is not closeable (< [`MIN_POLY_POINTS`]
    /// points) or a commit is already in flight.
    pub fn begin_commit(&mut self) -> Option<Vec<[f64; 2]>> {
        if self.state != DraftState::Accumulating || self.points.len() < MIN_POLY_POINTS {
            return None;
        }
        self.state = DraftState::Committing;
        Some(self.points.iter().map(|p| p.to_pair()).collect())
    }

    /// The save landed; the draft resets for the next polygon.
    pub fn commit_succeeded(&mut self) {
        if self.state != DraftState::Committing {
            debug!("commit_succeeded outside committing state");
            return;
        }
        self.points.clear();
        self.state = DraftState::Empty;
    }

    /// The save failed; the points stay editable for a retry.
    pub fn commit_failed(&mut self) {
        if self.state != DraftState::Committing {
            debug!("commit_failed outside committing state");
            return;
        }
        self.state = DraftState::Accumulating;
    }

    /// Discard the draft. Refused while a save is in flight (the save
    /// itself is not cancellable). Returns whether anything was discarded.
    pub fn cancel(&mut self) -> bool {
        if self.state == DraftState::Committing {
            debug!("cancel ignored: commit in flight");
            return false;
        }
        let had = !self.points.is_empty();
        self.points.clear();
        self.state = DraftState::Empty;
        had
    }
}
