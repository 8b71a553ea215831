//! R-tree over spatial units for point lookups.

use geo::{Coord, Intersects, Line, LinesIter, Point};
use rstar::{RTree, RTreeObject, AABB};
use tracing::{info, warn};

use crate::models::{SpatialUnit, UnitId};

/// Distance in analysis-CRS metres within which a point that no unit
/// contains is still matched to a unit edge. Absorbs rounding between the
/// edges of neighbouring clipped units.
const EDGE_TOLERANCE_M: f64 = 1e-6;

/// Envelope of one unit, pointing back into the unit slice
#[derive(Debug, Clone)]
struct IndexedUnit {
    slot: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedUnit {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Result of locating a point among the units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Located {
    Outside,
    /// Slot of the owning unit, and how many units touched the point
    Inside { slot: usize, matches: usize },
}

/// Spatial index over units with a positive area.
pub(crate) struct UnitIndex<'a, U> {
    units: &'a [U],
    tree: RTree<IndexedUnit>,
    live: Vec<bool>,
    degenerate: Vec<UnitId>,
}

impl<'a, U: SpatialUnit> UnitIndex<'a, U> {
    pub fn build(units: &'a [U]) -> Self {
        let mut indexed = Vec::with_capacity(units.len());
        let mut live = vec![false; units.len()];
        let mut degenerate = Vec::new();

        for (slot, unit) in units.iter().enumerate() {
            let area = unit.area_km2();
            match unit.geometry().extent() {
                Some(rect) if area.is_finite() && area > 0.0 => {
                    let (min, max) = (rect.min(), rect.max());
                    live[slot] = true;
                    indexed.push(IndexedUnit {
                        slot,
                        envelope: AABB::from_corners([min.x, min.y], [max.x, max.y]),
                    });
                }
                _ => {
                    warn!("Unit {} has no area and is excluded", unit.unit_id());
                    degenerate.push(unit.unit_id());
                }
            }
        }
        degenerate.sort();

        let tree = RTree::bulk_load(indexed);
        info!("Unit index built with {} entries", tree.size());

        Self {
            units,
            tree,
            live,
            degenerate,
        }
    }

    /// Units excluded from the index, sorted by id
    pub fn degenerate(&self) -> &[UnitId] {
        &self.degenerate
    }

    pub fn is_indexed(&self, slot: usize) -> bool {
        self.live.get(slot).copied().unwrap_or(false)
    }

    /// Find the unit owning `point`. Points on an edge shared by several
    /// units go to the one with the lowest id. A point no unit contains
    /// falls back to the units whose edges lie within [`EDGE_TOLERANCE_M`].
    pub fn locate(&self, point: &Point<f64>) -> Located {
        let query = AABB::from_point([point.x(), point.y()]);

        // Candidates by envelope, then exact test; Intersects keeps edge points.
        let exact = self.owner(&query, |unit| unit.geometry().get().intersects(point));
        if exact.is_some() {
            return Self::located(exact);
        }

        let (x, y) = (point.x(), point.y());
        let near = AABB::from_corners(
            [x - EDGE_TOLERANCE_M, y - EDGE_TOLERANCE_M],
            [x + EDGE_TOLERANCE_M, y + EDGE_TOLERANCE_M],
        );
        Self::located(self.owner(&near, |unit| {
            unit.geometry()
                .get()
                .lines_iter()
                .any(|line| segment_distance(point.0, &line) <= EDGE_TOLERANCE_M)
        }))
    }

    /// Lowest-id unit among envelope candidates passing `test`, with the
    /// number of units that passed.
    fn owner(
        &self,
        query: &AABB<[f64; 2]>,
        test: impl Fn(&U) -> bool,
    ) -> Option<(usize, UnitId, usize)> {
        let mut owner: Option<(usize, UnitId, usize)> = None;
        for candidate in self.tree.locate_in_envelope_intersecting(query) {
            let unit = &self.units[candidate.slot];
            if !test(unit) {
                continue;
            }
            let id = unit.unit_id();
            owner = match owner {
                Some((slot, best, n)) if best <= id => Some((slot, best, n + 1)),
                Some((_, _, n)) => Some((candidate.slot, id, n + 1)),
                None => Some((candidate.slot, id, 1)),
            };
        }
        owner
    }

    fn located(owner: Option<(usize, UnitId, usize)>) -> Located {
        match owner {
            Some((slot, _, matches)) => Located::Inside { slot, matches },
            None => Located::Outside,
        }
    }
}

fn segment_distance(p: Coord<f64>, line: &Line<f64>) -> f64 {
    let (a, b) = (line.start, line.end);
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    ((p.x - a.x - t * dx).powi(2) + (p.y - a.y - t * dy).powi(2)).sqrt()
}
