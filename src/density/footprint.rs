//! Building footprints per unit, assigned by centroid.

use geo::MultiPolygon;
use serde::Serialize;
use tracing::{info, warn};

use super::aggregator::check_crs;
use super::index::{Located, UnitIndex};
use crate::error::{Error, FeatureRef};
use crate::geometry::{GeometryValidator, Projected};
use crate::models::{SkippedFeature, SpatialUnit, UnitId};

/// Building statistics of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FootprintRecord {
    pub unit_id: UnitId,
    pub buildings: usize,
    /// Total footprint area of the buildings assigned to the unit
    pub footprint_km2: f64,
    pub buildings_per_km2: f64,
    /// Footprint area as a share of the unit's clipped area
    pub coverage_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FootprintDiagnostics {
    pub footprints_in: usize,
    pub assigned: usize,
    pub outside: usize,
    pub skipped: Vec<SkippedFeature>,
}

#[derive(Debug, Clone)]
pub struct FootprintReport {
    /// One row per non-degenerate unit, sorted by id
    pub records: Vec<FootprintRecord>,
    pub diagnostics: FootprintDiagnostics,
}

/// Assigns each footprint to the single unit holding its centroid, so a
/// building crossing a cell edge is never counted twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct FootprintAggregator {
    validator: GeometryValidator,
}

impl FootprintAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate_footprints<U: SpatialUnit>(
        &self,
        footprints: &[Projected<MultiPolygon<f64>>],
        units: &[U],
    ) -> Result<FootprintReport, Error> {
        if footprints.is_empty() {
            return Err(Error::EmptyInput { layer: "buildings" });
        }
        if units.is_empty() {
            return Err(Error::EmptyInput { layer: "units" });
        }
        let crs = units[0].geometry().crs();
        check_crs(units.iter().map(|u| u.geometry().crs()), crs)?;
        check_crs(footprints.iter().map(|f| f.crs()), crs)?;

        let index = UnitIndex::build(units);
        let mut diagnostics = FootprintDiagnostics {
            footprints_in: footprints.len(),
            ..Default::default()
        };
        let mut per_unit = vec![(0usize, 0.0f64); units.len()];

        for (position, footprint) in footprints.iter().enumerate() {
            let repaired = self
                .validator
                .validate(footprint.get())
                .map(|(geometry, _)| footprint.derive(|_| geometry));
            let footprint = match repaired {
                Ok(footprint) => footprint,
                Err(e) => {
                    let e = e.with_feature(FeatureRef::default().with_index(position));
                    warn!("Skipping building footprint: {}", e);
                    diagnostics.skipped.push(SkippedFeature {
                        feature: e.feature().clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let Some(centroid) = footprint.centroid() else {
                diagnostics.outside += 1;
                continue;
            };

            match index.locate(centroid.get()) {
                Located::Outside => diagnostics.outside += 1,
                Located::Inside { slot, .. } => {
                    diagnostics.assigned += 1;
                    let entry = &mut per_unit[slot];
                    entry.0 += 1;
                    entry.1 += footprint.area_km2();
                }
            }
        }

        let mut records: Vec<FootprintRecord> = units
            .iter()
            .enumerate()
            .filter(|(slot, _)| index.is_indexed(*slot))
            .map(|(slot, unit)| {
                let (buildings, footprint_km2) = per_unit[slot];
                let area = unit.area_km2();
                FootprintRecord {
                    unit_id: unit.unit_id(),
                    buildings,
                    footprint_km2,
                    buildings_per_km2: buildings as f64 / area,
                    coverage_pct: footprint_km2 / area * 100.0,
                }
            })
            .collect();
        records.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));

        info!(
            "Footprints: {} assigned, {} outside, {} skipped",
            diagnostics.assigned,
            diagnostics.outside,
            diagnostics.skipped.len()
        );

        Ok(FootprintReport {
            records,
            diagnostics,
        })
    }
}
