use geo::Intersects;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::index::{Located, UnitIndex};
use crate::error::{CrsError, Error, FeatureRef};
use crate::geometry::Projected;
use crate::landuse::CategoryPolicy;
use crate::models::{
    BoundaryRecord, Crs, DensityRecord, PointFeature, SkippedFeature, SpatialUnit, UnitId,
};

/// All points of every category within one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitTotal {
    pub unit_id: UnitId,
    pub area_km2: f64,
    pub count: usize,
    pub density_per_km2: f64,
}

/// One category over the whole boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryDensity {
    pub category: String,
    pub count: usize,
    pub density_per_km2: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DensityDiagnostics {
    pub points_in: usize,
    pub points_assigned: usize,
    /// Points outside every unit, and outside the boundary when one is given
    pub points_outside: usize,
    /// Points inside the boundary but in no unit, e.g. in a dropped sliver
    /// cell or between neighborhoods
    pub points_uncovered: usize,
    /// Points touching more than one unit, resolved to the lowest id
    pub points_on_shared_edge: usize,
    pub skipped: Vec<SkippedFeature>,
    /// Units with zero area, excluded from density
    pub degenerate_units: Vec<UnitId>,
}

#[derive(Debug, Clone)]
pub struct DensityReport {
    /// Sorted by unit id, then category
    pub records: Vec<DensityRecord>,
    /// One row per non-degenerate unit, zero counts included, sorted by id
    pub totals: Vec<UnitTotal>,
    pub diagnostics: DensityDiagnostics,
}

/// Spatial join of points onto grid cells or neighborhoods.
#[derive(Debug, Clone, Default)]
pub struct DensityAggregator {
    policy: CategoryPolicy,
}

impl DensityAggregator {
    pub fn new(policy: CategoryPolicy) -> Self {
        Self { policy }
    }

    /// Assign every point to exactly one unit and count per category.
    ///
    /// Densities use each unit's clipped area. Results do not depend on the
    /// order of `points` or `units`.
    pub fn aggregate_points<U: SpatialUnit>(
        &self,
        points: &[Projected<PointFeature>],
        units: &[U],
    ) -> Result<DensityReport, Error> {
        self.join(points, units, None)
    }

    /// Like [`aggregate_points`](Self::aggregate_points), but points in no
    /// unit are told apart by whether the boundary contains them.
    pub fn aggregate_points_within<U: SpatialUnit>(
        &self,
        points: &[Projected<PointFeature>],
        units: &[U],
        boundary: &BoundaryRecord,
    ) -> Result<DensityReport, Error> {
        self.join(points, units, Some(boundary))
    }

    fn join<U: SpatialUnit>(
        &self,
        points: &[Projected<PointFeature>],
        units: &[U],
        boundary: Option<&BoundaryRecord>,
    ) -> Result<DensityReport, Error> {
        if points.is_empty() {
            return Err(Error::EmptyInput { layer: "points" });
        }
        if units.is_empty() {
            return Err(Error::EmptyInput { layer: "units" });
        }
        let crs = units[0].geometry().crs();
        check_crs(units.iter().map(|u| u.geometry().crs()), crs)?;
        check_crs(points.iter().map(|p| p.crs()), crs)?;
        if let Some(boundary) = boundary {
            check_crs(std::iter::once(boundary.analysis_crs()), crs)?;
        }

        info!(
            "Aggregating {} points into {} units",
            points.len(),
            units.len()
        );

        let index = UnitIndex::build(units);
        let mut diagnostics = DensityDiagnostics {
            points_in: points.len(),
            degenerate_units: index.degenerate().to_vec(),
            ..Default::default()
        };
        let mut counts: BTreeMap<(usize, String), usize> = BTreeMap::new();

        for (position, point) in points.iter().enumerate() {
            let category = self.policy.resolve(point.category.as_deref());
            let geometry = point.geometry;
            if !(geometry.x().is_finite() && geometry.y().is_finite()) {
                let feature = FeatureRef::default()
                    .with_index(position)
                    .with_category(Some(&category));
                warn!("Skipping point with non-finite coordinates: {}", feature);
                diagnostics.skipped.push(SkippedFeature {
                    feature,
                    reason: "non-finite coordinate".to_string(),
                });
                continue;
            }

            match index.locate(&geometry) {
                Located::Outside => {
                    let covered =
                        boundary.is_some_and(|b| b.geometry().get().intersects(&geometry));
                    debug!(
                        "Point #{} ({}) at ({:.1}, {:.1}) is outside every unit{}",
                        position,
                        category,
                        geometry.x(),
                        geometry.y(),
                        if covered { " but inside the boundary" } else { "" }
                    );
                    if covered {
                        diagnostics.points_uncovered += 1;
                    } else {
                        diagnostics.points_outside += 1;
                    }
                }
                Located::Inside { slot, matches } => {
                    if matches > 1 {
                        debug!(
                            "Point #{} lies on an edge shared by {} units, assigned to {}",
                            position,
                            matches,
                            units[slot].unit_id()
                        );
                        diagnostics.points_on_shared_edge += 1;
                    }
                    diagnostics.points_assigned += 1;
                    *counts.entry((slot, category)).or_default() += 1;
                }
            }
        }

        let mut records: Vec<DensityRecord> = counts
            .iter()
            .map(|((slot, category), &count)| {
                let unit = &units[*slot];
                DensityRecord {
                    unit_id: unit.unit_id(),
                    category: category.clone(),
                    count,
                    density_per_km2: count as f64 / unit.area_km2(),
                }
            })
            .collect();
        records.sort_by(|a, b| {
            a.unit_id
                .cmp(&b.unit_id)
                .then_with(|| a.category.cmp(&b.category))
        });

        let mut per_unit = vec![0usize; units.len()];
        for ((slot, _), count) in &counts {
            per_unit[*slot] += count;
        }
        let mut totals: Vec<UnitTotal> = units
            .iter()
            .enumerate()
            .filter(|(slot, _)| index.is_indexed(*slot))
            .map(|(slot, unit)| UnitTotal {
                unit_id: unit.unit_id(),
                area_km2: unit.area_km2(),
                count: per_unit[slot],
                density_per_km2: per_unit[slot] as f64 / unit.area_km2(),
            })
            .collect();
        totals.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));

        if diagnostics.points_outside > 0 {
            warn!(
                "{} of {} points fell outside every unit",
                diagnostics.points_outside, diagnostics.points_in
            );
        }
        if diagnostics.points_uncovered > 0 {
            warn!(
                "{} of {} points lie inside the boundary but in no unit",
                diagnostics.points_uncovered, diagnostics.points_in
            );
        }
        info!(
            "Density: {} records, {} points assigned, {} on shared edges, {} degenerate units",
            records.len(),
            diagnostics.points_assigned,
            diagnostics.points_on_shared_edge,
            diagnostics.degenerate_units.len()
        );

        Ok(DensityReport {
            records,
            totals,
            diagnostics,
        })
    }

    /// Count and density of each category over the whole boundary.
    pub fn boundary_density(
        &self,
        points: &[Projected<PointFeature>],
        boundary: &BoundaryRecord,
    ) -> Result<Vec<CategoryDensity>, Error> {
        let crs = boundary.analysis_crs();
        check_crs(points.iter().map(|p| p.crs()), crs)?;

        let area_km2 = boundary.area_km2();
        let clip = boundary.geometry();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for point in points {
            let inside = point.geometry.x().is_finite()
                && point.geometry.y().is_finite()
                && clip.get().intersects(&point.geometry);
            if inside {
                *counts
                    .entry(self.policy.resolve(point.category.as_deref()))
                    .or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(category, count)| CategoryDensity {
                category,
                count,
                density_per_km2: count as f64 / area_km2,
            })
            .collect())
    }
}

pub(crate) fn check_crs(mut found: impl Iterator<Item = Crs>, expected: Crs) -> Result<(), CrsError> {
    match found.find(|crs| *crs != expected) {
        Some(found) => Err(CrsError::Mismatch { expected, found }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BoundaryProcessor;
    use crate::geometry::CrsProjector;
    use crate::grid::GridBuilder;
    use crate::models::{BoundarySource, CellId, GridCell, GridShape, Neighborhood, UNCLASSIFIED};
    use geo::{polygon, Contains, LinesIter, MultiPolygon, Point};

    const UTM_20S: Crs = Crs::Utm { zone: 20, south: true };

    fn boundary() -> BoundaryRecord {
        let projector = CrsProjector::new(UTM_20S).unwrap();
        let source = BoundarySource::new(
            polygon![
                (x: 0.0, y: 0.0),
                (x: 10_000.0, y: 0.0),
                (x: 10_000.0, y: 10_000.0),
                (x: 0.0, y: 10_000.0),
            ],
            UTM_20S,
            "R1",
        );
        BoundaryProcessor::new(&projector, 0.0)
            .acquire_boundary(&source)
            .unwrap()
    }

    fn grid() -> Vec<GridCell> {
        GridBuilder::default()
            .build_grid(&boundary(), 5000.0, GridShape::Square)
            .unwrap()
    }

    fn point(x: f64, y: f64, category: &str) -> Projected<PointFeature> {
        Projected::new(PointFeature::new(Point::new(x, y), Some(category)), UTM_20S)
    }

    fn schools() -> Vec<Projected<PointFeature>> {
        vec![
            point(1000.0, 1000.0, "school"),
            point(7000.0, 1000.0, "school"),
            point(7000.0, 7000.0, "school"),
            // On the edge between r0_c0 and r0_c1
            point(5000.0, 2000.0, "school"),
        ]
    }

    #[test]
    fn test_shared_edge_point_counted_once() {
        let report = DensityAggregator::default()
            .aggregate_points(&schools(), &grid())
            .unwrap();

        let total: usize = report.records.iter().map(|r| r.count).sum();
        assert_eq!(total, 4);
        assert_eq!(report.diagnostics.points_on_shared_edge, 1);
        assert_eq!(report.diagnostics.points_outside, 0);

        let first = &report.records[0];
        assert_eq!(first.unit_id, UnitId::Cell(CellId::Square { row: 0, col: 0 }));
        assert_eq!(first.count, 2);
        assert!((first.density_per_km2 - 2.0 / 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_hex_shared_edge_points_all_assigned() {
        // Off-origin extent at projected-metre magnitudes, with clipped edge cells.
        let projector = CrsProjector::new(UTM_20S).unwrap();
        let source = BoundarySource::new(
            polygon![
                (x: 350_123.7, y: 6_512_345.3),
                (x: 356_123.7, y: 6_512_345.3),
                (x: 353_001.1, y: 6_517_345.9),
            ],
            UTM_20S,
            "R2",
        );
        let boundary = BoundaryProcessor::new(&projector, 0.0)
            .acquire_boundary(&source)
            .unwrap();
        let cells = GridBuilder::default()
            .build_grid(&boundary, 500.0, GridShape::Hexagon)
            .unwrap();

        // Midpoint of every cell edge strictly inside the boundary.
        let clip = boundary.geometry().get();
        let mut points = Vec::new();
        for cell in &cells {
            for line in cell.geometry.get().lines_iter() {
                let mid = Point::new(
                    (line.start.x + line.end.x) / 2.0,
                    (line.start.y + line.end.y) / 2.0,
                );
                if clip.contains(&mid) {
                    points.push(point(mid.x(), mid.y(), "school"));
                }
            }
        }
        assert!(points.len() > 100);

        let report = DensityAggregator::default()
            .aggregate_points_within(&points, &cells, &boundary)
            .unwrap();
        assert_eq!(report.diagnostics.points_outside, 0);
        assert_eq!(report.diagnostics.points_uncovered, 0);
        assert_eq!(report.diagnostics.points_assigned, points.len());
        let total: usize = report.totals.iter().map(|t| t.count).sum();
        assert_eq!(total, points.len());
        assert!(report.diagnostics.points_on_shared_edge > 0);
    }

    #[test]
    fn test_points_in_dropped_cells_not_called_outside() {
        // One metre past the last full column: the sliver cells are dropped.
        let projector = CrsProjector::new(UTM_20S).unwrap();
        let source = BoundarySource::new(
            polygon![
                (x: 0.0, y: 0.0),
                (x: 10_001.0, y: 0.0),
                (x: 10_001.0, y: 10_000.0),
                (x: 0.0, y: 10_000.0),
            ],
            UTM_20S,
            "R3",
        );
        let boundary = BoundaryProcessor::new(&projector, 0.0)
            .acquire_boundary(&source)
            .unwrap();
        let cells = GridBuilder::default()
            .build_grid(&boundary, 5000.0, GridShape::Square)
            .unwrap();
        assert_eq!(cells.len(), 4);

        let points = vec![
            point(1000.0, 1000.0, "school"),
            point(10_000.5, 2000.0, "school"),
            point(20_000.0, 2000.0, "school"),
        ];
        let report = DensityAggregator::default()
            .aggregate_points_within(&points, &cells, &boundary)
            .unwrap();
        assert_eq!(report.diagnostics.points_assigned, 1);
        assert_eq!(report.diagnostics.points_uncovered, 1);
        assert_eq!(report.diagnostics.points_outside, 1);

        // Without the boundary both unassigned points count as outside.
        let plain = DensityAggregator::default()
            .aggregate_points(&points, &cells)
            .unwrap();
        assert_eq!(plain.diagnostics.points_outside, 2);
        assert_eq!(plain.diagnostics.points_uncovered, 0);
    }

    #[test]
    fn test_order_independent() {
        let units = grid();
        let forward = DensityAggregator::default()
            .aggregate_points(&schools(), &units)
            .unwrap();

        let mut points = schools();
        points.reverse();
        let mut reversed_units = units.clone();
        reversed_units.reverse();
        let backward = DensityAggregator::default()
            .aggregate_points(&points, &reversed_units)
            .unwrap();

        assert_eq!(forward.records, backward.records);
        assert_eq!(forward.totals, backward.totals);
    }

    #[test]
    fn test_totals_include_empty_units() {
        let report = DensityAggregator::default()
            .aggregate_points(&schools(), &grid())
            .unwrap();

        assert_eq!(report.totals.len(), 4);
        let empty = report
            .totals
            .iter()
            .find(|t| t.unit_id == UnitId::Cell(CellId::Square { row: 1, col: 0 }))
            .unwrap();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.density_per_km2, 0.0);
    }

    #[test]
    fn test_outside_and_categories() {
        let points = vec![
            point(1000.0, 1000.0, "school"),
            point(1200.0, 1000.0, "hospital"),
            Projected::new(PointFeature::new(Point::new(1500.0, 1000.0), None), UTM_20S),
            point(-50.0, 1000.0, "school"),
            point(f64::NAN, 1000.0, "school"),
        ];
        let report = DensityAggregator::default()
            .aggregate_points(&points, &grid())
            .unwrap();

        let categories: Vec<&str> = report.records.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(categories, ["hospital", "school", UNCLASSIFIED]);
        assert_eq!(report.diagnostics.points_outside, 1);
        assert_eq!(report.diagnostics.skipped.len(), 1);
        assert_eq!(report.diagnostics.skipped[0].feature.index, Some(4));
        assert_eq!(report.diagnostics.points_assigned, 3);
    }

    #[test]
    fn test_degenerate_unit_reported() {
        let crs = UTM_20S;
        let square = |x0: f64, x1: f64| {
            Projected::new(
                MultiPolygon::new(vec![polygon![
                    (x: x0, y: 0.0),
                    (x: x1, y: 0.0),
                    (x: x1, y: 1000.0),
                    (x: x0, y: 1000.0),
                ]]),
                crs,
            )
        };
        let units = vec![
            Neighborhood::new(0, "sliver", square(0.0, 0.0)),
            Neighborhood::new(1, "centro", square(0.0, 1000.0)),
        ];
        let points = vec![point(0.0, 500.0, "school")];
        let report = DensityAggregator::default()
            .aggregate_points(&points, &units)
            .unwrap();

        assert_eq!(report.diagnostics.degenerate_units.len(), 1);
        assert_eq!(report.diagnostics.degenerate_units[0].to_string(), "sliver");
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].unit_id.to_string(), "centro");
        assert!(report.records.iter().all(|r| r.density_per_km2.is_finite()));
        assert_eq!(report.totals.len(), 1);
    }

    #[test]
    fn test_boundary_density() {
        let mut points = schools();
        points.push(point(20_000.0, 0.0, "school"));
        let categories = DensityAggregator::default()
            .boundary_density(&points, &boundary())
            .unwrap();

        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].count, 4);
        assert!((categories[0].density_per_km2 - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_empty_inputs_fatal() {
        let aggregator = DensityAggregator::default();
        assert!(matches!(
            aggregator.aggregate_points(&[], &grid()),
            Err(Error::EmptyInput { layer: "points" })
        ));
        let no_units: Vec<GridCell> = Vec::new();
        assert!(matches!(
            aggregator.aggregate_points(&schools(), &no_units),
            Err(Error::EmptyInput { layer: "units" })
        ));
    }

    #[test]
    fn test_foreign_crs_rejected() {
        let points = vec![Projected::new(
            PointFeature::new(Point::new(1.0, 1.0), Some("school")),
            Crs::Utm { zone: 21, south: true },
        )];
        let result = DensityAggregator::default().aggregate_points(&points, &grid());
        assert!(matches!(result, Err(Error::Crs(CrsError::Mismatch { .. }))));
    }
}
