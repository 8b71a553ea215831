//! Structured diagnostics emitted alongside the analysis results.

use serde::Serialize;

use super::UnitId;
use crate::error::FeatureRef;
use crate::geometry::ValidityReport;

/// A feature dropped by a locally recoverable error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFeature {
    pub feature: FeatureRef,
    pub reason: String,
}

/// Run-level data-quality report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub boundary_validity: ValidityReport,

    /// Land-use percentages sum above 100% because categories overlap
    pub landuse_exceeds_100: bool,
    pub landuse_total_pct: f64,
    pub landuse_overlap_km2: f64,
    pub landuse_skipped: Vec<SkippedFeature>,
    pub landuse_outside: usize,

    /// Points that fell outside the boundary
    pub points_outside: usize,
    /// Points inside the boundary but in no grid cell, e.g. in a dropped
    /// sliver cell
    pub points_uncovered: usize,
    pub points_skipped: Vec<SkippedFeature>,
    /// Points on a shared edge, resolved to the lower unit id
    pub points_on_shared_edge: usize,
    /// Units excluded from density because their clipped area is zero
    pub degenerate_units: Vec<UnitId>,

    pub neighborhoods_skipped: Vec<SkippedFeature>,
    pub footprints_skipped: Vec<SkippedFeature>,
    pub footprints_outside: usize,
}
