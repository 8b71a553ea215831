use geo::{BooleanOps, Intersects, MultiPolygon, Polygon};
use tracing::{debug, info};

use super::lattice::{self, LatticeCell};
use crate::error::{ConfigError, Error};
use crate::geometry::{Projected, M2_PER_KM2};
use crate::models::{BoundaryRecord, GridCell, GridShape};

/// Upper bound on lattice cells enumerated for one grid
pub const MAX_CELLS: u64 = 5_000_000;

/// Share of the nominal area above which a clipped cell counts as full
const FULL_COVERAGE: f64 = 1.0 - 1e-6;

/// Tessellates a boundary's extent and clips every cell to the boundary.
#[derive(Debug, Clone, Copy)]
pub struct GridBuilder {
    negligible_area_fraction: f64,
}

impl Default for GridBuilder {
    fn default() -> Self {
        Self {
            negligible_area_fraction: 0.001,
        }
    }
}

impl GridBuilder {
    /// Cells whose clipped area is at most `negligible_area_fraction` of the
    /// nominal cell area are dropped.
    pub fn new(negligible_area_fraction: f64) -> Result<Self, ConfigError> {
        if !(0.0..1.0).contains(&negligible_area_fraction) {
            return Err(ConfigError::NegligibleArea(negligible_area_fraction));
        }
        Ok(Self {
            negligible_area_fraction,
        })
    }

    /// Build a grid of `shape` cells with edge length (square) or
    /// flat-to-flat diameter (hexagon) `cell_size_m`.
    ///
    /// The lattice is anchored at the minimum corner of the boundary's
    /// bounding box, so ids are reproducible for the same inputs. Cells are
    /// returned sorted by id.
    pub fn build_grid(
        &self,
        boundary: &BoundaryRecord,
        cell_size_m: f64,
        shape: GridShape,
    ) -> Result<Vec<GridCell>, Error> {
        if !cell_size_m.is_finite() || cell_size_m <= 0.0 {
            return Err(ConfigError::CellSize(cell_size_m).into());
        }
        let clip = boundary.geometry();
        let Some(extent) = clip.extent() else {
            return Err(Error::EmptyInput { layer: "boundary" });
        };

        let (enumerated, nominal_m2) = match shape {
            GridShape::Square => (
                lattice::square_count(&extent, cell_size_m),
                lattice::square_area(cell_size_m),
            ),
            GridShape::Hexagon => (
                lattice::hex_count(&extent, cell_size_m),
                lattice::hex_area(cell_size_m),
            ),
        };
        if enumerated > MAX_CELLS {
            return Err(ConfigError::GridTooLarge {
                cells: enumerated,
                limit: MAX_CELLS,
            }
            .into());
        }

        info!(
            "Building {} grid: cell size {} m, {} lattice cells over {:.1} x {:.1} km",
            shape,
            cell_size_m,
            enumerated,
            extent.width() / 1000.0,
            extent.height() / 1000.0
        );

        let lattice: Box<dyn Iterator<Item = LatticeCell>> = match shape {
            GridShape::Square => Box::new(lattice::square_cells(&extent, cell_size_m)),
            GridShape::Hexagon => Box::new(lattice::hex_cells(&extent, cell_size_m)),
        };

        let threshold_m2 = nominal_m2 * self.negligible_area_fraction;
        let mut cells = Vec::new();
        let mut negligible = 0usize;

        for cell in lattice {
            if !cell.extent.intersects(&extent) {
                continue;
            }
            let clipped = clip.derive(|boundary| cell.polygon.intersection(boundary));
            let area_m2 = clipped.area_m2();
            if area_m2 <= threshold_m2 {
                if area_m2 > 0.0 {
                    negligible += 1;
                }
                continue;
            }

            // Interior cells keep the exact lattice polygon.
            let (geometry, area_m2) = if area_m2 >= nominal_m2 * FULL_COVERAGE {
                (full_cell(&clipped, cell.polygon), nominal_m2)
            } else {
                (clipped, area_m2)
            };
            cells.push(GridCell {
                id: cell.id,
                geometry,
                area_km2: area_m2 / M2_PER_KM2,
                nominal_area_km2: nominal_m2 / M2_PER_KM2,
            });
        }

        cells.sort_by_key(|cell| cell.id);

        if negligible > 0 {
            debug!("Dropped {} sliver cells below the area threshold", negligible);
        }
        info!(
            "Grid has {} cells ({} full)",
            cells.len(),
            cells.iter().filter(|c| c.is_full()).count()
        );
        Ok(cells)
    }
}

fn full_cell(
    clipped: &Projected<MultiPolygon<f64>>,
    polygon: Polygon<f64>,
) -> Projected<MultiPolygon<f64>> {
    clipped.derive(|_| MultiPolygon::new(vec![polygon]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BoundaryProcessor;
    use crate::geometry::CrsProjector;
    use crate::models::{BoundarySource, CellId, Crs};
    use geo::{polygon, Area};
    use std::collections::BTreeSet;

    const UTM_20S: Crs = Crs::Utm { zone: 20, south: true };

    fn boundary_from(polygon: Polygon<f64>) -> BoundaryRecord {
        let projector = CrsProjector::new(UTM_20S).unwrap();
        let source = BoundarySource::new(polygon, UTM_20S, "R1");
        BoundaryProcessor::new(&projector, 0.0)
            .acquire_boundary(&source)
            .unwrap()
    }

    fn square_boundary(width: f64, height: f64) -> BoundaryRecord {
        boundary_from(polygon![
            (x: 0.0, y: 0.0),
            (x: width, y: 0.0),
            (x: width, y: height),
            (x: 0.0, y: height),
        ])
    }

    #[test]
    fn test_exact_fit_yields_full_cells() {
        let cells = GridBuilder::default()
            .build_grid(&square_boundary(10_000.0, 10_000.0), 5000.0, GridShape::Square)
            .unwrap();

        assert_eq!(cells.len(), 4);
        let ids: Vec<String> = cells.iter().map(|c| c.id.to_string()).collect();
        assert_eq!(ids, ["r0_c0", "r0_c1", "r1_c0", "r1_c1"]);
        for cell in &cells {
            assert!((cell.area_km2 - 25.0).abs() < 1e-9);
            assert!(cell.is_full());
            assert!((cell.geometry.area_km2() - 25.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_edge_cells_are_clipped() {
        let cells = GridBuilder::default()
            .build_grid(&square_boundary(10_000.0, 10_000.0), 4000.0, GridShape::Square)
            .unwrap();

        assert_eq!(cells.len(), 9);
        let corner = cells
            .iter()
            .find(|c| c.id == CellId::Square { row: 2, col: 2 })
            .unwrap();
        assert!((corner.area_km2 - 4.0).abs() < 1e-4);
        assert!((corner.nominal_area_km2 - 16.0).abs() < 1e-9);
        assert!((corner.coverage_ratio() - 0.25).abs() < 1e-5);

        let partial = cells.iter().filter(|c| c.area_km2 < 16.0 - 1e-4).count();
        assert_eq!(partial, 5);
        let total: f64 = cells.iter().map(|c| c.area_km2).sum();
        assert!((total - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_slivers_dropped() {
        // One metre of overhang on the right: the third column is a sliver.
        let cells = GridBuilder::default()
            .build_grid(&square_boundary(10_001.0, 10_000.0), 5000.0, GridShape::Square)
            .unwrap();
        assert_eq!(cells.len(), 4);

        let keep_all = GridBuilder::new(0.0)
            .unwrap()
            .build_grid(&square_boundary(10_001.0, 10_000.0), 5000.0, GridShape::Square)
            .unwrap();
        assert_eq!(keep_all.len(), 6);
    }

    #[test]
    fn test_hex_grid_tiles_boundary() {
        let cells = GridBuilder::default()
            .build_grid(&square_boundary(10_000.0, 10_000.0), 2000.0, GridShape::Hexagon)
            .unwrap();

        let ids: BTreeSet<CellId> = cells.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), cells.len());
        assert!(cells.windows(2).all(|w| w[0].id < w[1].id));

        let total: f64 = cells.iter().map(|c| c.area_km2).sum();
        assert!((total - 100.0).abs() < 0.1, "hex areas sum to {total}");

        let full = cells.iter().find(|c| c.is_full()).unwrap();
        assert!((full.area_km2 - lattice::hex_area(2000.0) / M2_PER_KM2).abs() < 1e-9);
    }

    #[test]
    fn test_irregular_boundary_fully_covered() {
        let triangle = polygon![
            (x: 0.0, y: 0.0),
            (x: 9000.0, y: 0.0),
            (x: 3000.0, y: 7000.0),
        ];
        let boundary = boundary_from(triangle.clone());
        let cells = GridBuilder::default()
            .build_grid(&boundary, 1000.0, GridShape::Square)
            .unwrap();

        let total: f64 = cells.iter().map(|c| c.area_km2).sum();
        let expected = triangle.unsigned_area() / M2_PER_KM2;
        assert!((total - expected).abs() < 0.01 * expected);
    }

    #[test]
    fn test_deterministic_ids() {
        let boundary = square_boundary(7300.0, 4100.0);
        let first = GridBuilder::default()
            .build_grid(&boundary, 1500.0, GridShape::Hexagon)
            .unwrap();
        let second = GridBuilder::default()
            .build_grid(&boundary, 1500.0, GridShape::Hexagon)
            .unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.area_km2, b.area_km2);
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let boundary = square_boundary(1000.0, 1000.0);
        for size in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let result = GridBuilder::default().build_grid(&boundary, size, GridShape::Square);
            assert!(matches!(result, Err(Error::Config(ConfigError::CellSize(_)))));
        }
        assert!(matches!(
            GridBuilder::new(1.5),
            Err(ConfigError::NegligibleArea(_))
        ));

        let huge = square_boundary(100_000.0, 100_000.0);
        let result = GridBuilder::default().build_grid(&huge, 1.0, GridShape::Square);
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::GridTooLarge { .. }))
        ));
    }
}
