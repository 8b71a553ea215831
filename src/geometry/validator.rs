//! Polygon validation and repair.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::orient::{Direction, Orient};
use geo::{
    unary_union, Area, BooleanOps, BoundingRect, Coord, CoordsIter, Line, LineString,
    MultiPolygon, Polygon, Validation, Winding,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{FeatureRef, GeometryError};

/// A defect found in the input geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Defect {
    /// Self-intersection, overlapping parts or another topology error
    Topology { detail: String },
    /// Exterior ring wound clockwise
    ExteriorOrientation { polygon: usize },
    /// Interior ring wound counter-clockwise
    InteriorOrientation { polygon: usize, ring: usize },
    /// Part with zero area, dropped during repair
    DegeneratePart { polygon: usize },
    /// Repair changed the area enclosed by the part's simple loops
    AreaChanged {
        polygon: usize,
        before: f64,
        after: f64,
    },
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidityReport {
    pub valid_before: bool,
    pub valid_after: bool,
    pub repaired: bool,
    /// Polygon parts in the returned geometry
    pub polygons: usize,
    /// Holes in the returned geometry. Holes are kept as real exclusions.
    pub holes: usize,
    pub defects: Vec<Defect>,
}

impl ValidityReport {
    pub fn has_holes(&self) -> bool {
        self.holes > 0
    }
}

/// Detects and repairs self-intersections and ring-orientation defects.
///
/// Input geometries are never modified; clean input is returned as an
/// identical copy, so validation is idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryValidator;

impl GeometryValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        geometry: &MultiPolygon<f64>,
    ) -> Result<(MultiPolygon<f64>, ValidityReport), GeometryError> {
        if geometry.0.is_empty() || geometry.coords_count() == 0 {
            return Err(GeometryError::Empty {
                feature: FeatureRef::locate(geometry),
            });
        }
        if geometry.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(GeometryError::NonFinite {
                feature: FeatureRef::locate(geometry),
            });
        }

        let mut defects = Vec::new();
        let topology_ok = geometry.is_valid();
        if !topology_ok {
            for err in geometry.validation_errors() {
                defects.push(Defect::Topology {
                    detail: err.to_string(),
                });
            }
        }
        for (i, polygon) in geometry.0.iter().enumerate() {
            if polygon.exterior().is_cw() {
                defects.push(Defect::ExteriorOrientation { polygon: i });
            }
            for (j, ring) in polygon.interiors().iter().enumerate() {
                if ring.is_ccw() {
                    defects.push(Defect::InteriorOrientation { polygon: i, ring: j });
                }
            }
        }

        if defects.is_empty() {
            if !has_area(geometry) {
                return Err(GeometryError::Degenerate {
                    feature: FeatureRef::locate(geometry),
                });
            }
            let report = ValidityReport {
                valid_before: true,
                valid_after: true,
                repaired: false,
                polygons: geometry.0.len(),
                holes: count_holes(geometry),
                defects,
            };
            return Ok((geometry.clone(), report));
        }

        let repaired = if topology_ok {
            geometry.orient(Direction::Default)
        } else {
            heal(geometry, &mut defects)
        };

        let mut parts = Vec::with_capacity(repaired.0.len());
        for (i, polygon) in repaired.0.into_iter().enumerate() {
            if polygon.unsigned_area() > 0.0 {
                parts.push(polygon);
            } else {
                defects.push(Defect::DegeneratePart { polygon: i });
            }
        }
        let repaired = MultiPolygon::new(parts);
        if repaired.0.is_empty() || !has_area(&repaired) {
            return Err(GeometryError::Degenerate {
                feature: FeatureRef::locate(geometry),
            });
        }

        debug!(
            "Repaired geometry with {} defect(s): {} -> {} part(s)",
            defects.len(),
            geometry.0.len(),
            repaired.0.len()
        );

        let report = ValidityReport {
            valid_before: false,
            valid_after: repaired.is_valid(),
            repaired: true,
            polygons: repaired.0.len(),
            holes: count_holes(&repaired),
            defects,
        };
        Ok((repaired, report))
    }

    /// Validate a single polygon.
    pub fn validate_polygon(
        &self,
        polygon: &Polygon<f64>,
    ) -> Result<(MultiPolygon<f64>, ValidityReport), GeometryError> {
        self.validate(&MultiPolygon::new(vec![polygon.clone()]))
    }
}

/// Rebuild a geometry from the simple loops of its rings.
///
/// Each ring is cut at its crossings into simple loops, every loop is wound
/// counter-clockwise, and a polygon's holes are subtracted from the union of
/// its shell loops. All lobes of a self-intersecting ring therefore survive
/// whatever their input winding. Parts are merged at the end.
fn heal(geometry: &MultiPolygon<f64>, defects: &mut Vec<Defect>) -> MultiPolygon<f64> {
    let mut parts = Vec::new();
    for (i, polygon) in geometry.0.iter().enumerate() {
        let shells = loop_polygons(std::iter::once(polygon.exterior()));
        let holes = loop_polygons(polygon.interiors().iter());

        let before = shells.iter().map(Area::unsigned_area).sum::<f64>()
            - holes.iter().map(Area::unsigned_area).sum::<f64>();
        let mut healed = unary_union(shells.iter());
        if !holes.is_empty() {
            healed = healed.difference(&unary_union(holes.iter()));
        }
        let after = healed.unsigned_area();
        if (after - before).abs() > before.abs() * 1e-6 {
            defects.push(Defect::AreaChanged {
                polygon: i,
                before,
                after,
            });
        }
        parts.extend(healed.0);
    }
    unary_union(parts.iter()).orient(Direction::Default)
}

/// Simple loops of every ring as counter-clockwise polygons, dropping
/// loops without area.
fn loop_polygons<'a>(rings: impl Iterator<Item = &'a LineString<f64>>) -> Vec<Polygon<f64>> {
    rings
        .flat_map(simple_loops)
        .map(|ring| Polygon::new(ring, vec![]).orient(Direction::Default))
        .filter(|p| p.unsigned_area() > 0.0)
        .collect()
}

/// Split a ring into simple closed loops at its self-intersections.
///
/// Crossing points are inserted into both segments involved, then the ring
/// is walked and a loop is cut off every time the walk returns to a vertex
/// already on the current path.
fn simple_loops(ring: &LineString<f64>) -> Vec<LineString<f64>> {
    let mut vertices: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for &c in &ring.0 {
        if vertices.last() != Some(&c) {
            vertices.push(c);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    let n = vertices.len();
    if n < 3 {
        return Vec::new();
    }

    let segment = |i: usize| Line::new(vertices[i], vertices[(i + 1) % n]);
    let mut nodes: Vec<Vec<Coord<f64>>> = vec![Vec::new(); n];
    for i in 0..n {
        let a = segment(i);
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            let b = segment(j);
            match line_intersection(a, b) {
                Some(LineIntersection::SinglePoint {
                    intersection,
                    is_proper,
                }) => {
                    let node = if is_proper {
                        intersection
                    } else {
                        nearest_endpoint(intersection, &a, &b)
                    };
                    nodes[i].push(node);
                    nodes[j].push(node);
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    for node in [intersection.start, intersection.end] {
                        nodes[i].push(node);
                        nodes[j].push(node);
                    }
                }
                None => {}
            }
        }
    }

    let mut noded = Vec::with_capacity(n);
    for (i, mut extra) in nodes.into_iter().enumerate() {
        let start = vertices[i];
        let end = vertices[(i + 1) % n];
        noded.push(start);
        extra.retain(|&c| c != start && c != end);
        extra.sort_by(|p, q| distance_sq(start, *p).total_cmp(&distance_sq(start, *q)));
        extra.dedup();
        noded.extend(extra);
    }

    let mut loops = Vec::new();
    let mut path: Vec<Coord<f64>> = Vec::with_capacity(noded.len());
    for c in noded {
        match path.iter().position(|&p| p == c) {
            Some(k) => {
                let mut cut: Vec<Coord<f64>> = path.split_off(k + 1);
                if !cut.is_empty() {
                    cut.insert(0, c);
                    cut.push(c);
                    if cut.len() >= 4 {
                        loops.push(LineString::new(cut));
                    }
                }
            }
            None => path.push(c),
        }
    }
    if path.len() >= 3 {
        let first = path[0];
        path.push(first);
        loops.push(LineString::new(path));
    }
    loops
}

/// Touching segments meet at a vertex; reuse its exact coordinate.
fn nearest_endpoint(point: Coord<f64>, a: &Line<f64>, b: &Line<f64>) -> Coord<f64> {
    [a.start, a.end, b.start, b.end]
        .into_iter()
        .min_by(|p, q| distance_sq(point, *p).total_cmp(&distance_sq(point, *q)))
        .unwrap_or(point)
}

fn distance_sq(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).powi(2) + (a.y - b.y).powi(2)
}

fn has_area(geometry: &MultiPolygon<f64>) -> bool {
    // Relative to the extent, so coordinates in degrees and metres behave alike.
    let Some(rect) = geometry.bounding_rect() else {
        return false;
    };
    let extent = rect.width().max(rect.height());
    geometry.unsigned_area() > extent * extent * 1e-12
}

fn count_holes(geometry: &MultiPolygon<f64>) -> usize {
    geometry.0.iter().map(|p| p.interiors().len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area, Coord, LineString};

    fn square(min: f64, max: f64) -> Polygon<f64> {
        polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
        ]
    }

    #[test]
    fn test_clean_polygon_unchanged() {
        let input = MultiPolygon::new(vec![square(0.0, 10.0)]);
        let (output, report) = GeometryValidator::new().validate(&input).unwrap();
        assert_eq!(output, input);
        assert!(report.valid_before);
        assert!(!report.repaired);
        assert!(report.defects.is_empty());
    }

    #[test]
    fn test_bowtie_is_repaired() {
        let bowtie = polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 2.0),
        ];
        let (output, report) = GeometryValidator::new()
            .validate(&MultiPolygon::new(vec![bowtie]))
            .unwrap();

        assert!(!report.valid_before);
        assert!(report.repaired);
        assert!(report
            .defects
            .iter()
            .any(|d| matches!(d, Defect::Topology { .. })));
        // Both lobes survive; the signed area of the input was zero.
        assert!((output.unsigned_area() - 2.0).abs() < 1e-6);
        assert!(!report
            .defects
            .iter()
            .any(|d| matches!(d, Defect::AreaChanged { .. })));
    }

    #[test]
    fn test_bowtie_in_degrees_keeps_both_lobes() {
        let (x0, y0, s) = (-64.2, -31.4, 0.01);
        let bowtie = polygon![
            (x: x0, y: y0),
            (x: x0 + s, y: y0 + s),
            (x: x0 + s, y: y0),
            (x: x0, y: y0 + s),
        ];
        let (output, report) = GeometryValidator::new().validate_polygon(&bowtie).unwrap();
        assert!(report.repaired);
        let expected = s * s / 2.0;
        assert!((output.unsigned_area() - expected).abs() < expected * 1e-6);
    }

    #[test]
    fn test_ring_split_into_simple_loops() {
        let figure_eight = LineString::from(vec![
            (0.0, 0.0),
            (2.0, 2.0),
            (2.0, 0.0),
            (0.0, 2.0),
            (0.0, 0.0),
        ]);
        let loops = simple_loops(&figure_eight);
        assert_eq!(loops.len(), 2);
        let crossing = Coord { x: 1.0, y: 1.0 };
        for ring in &loops {
            assert!(ring.is_closed());
            assert!(ring.0.contains(&crossing));
            let lobe = Polygon::new(ring.clone(), vec![]);
            assert!((lobe.unsigned_area() - 1.0).abs() < 1e-12);
        }

        // A simple ring comes back as a single loop.
        let unit = square(0.0, 1.0);
        assert_eq!(simple_loops(unit.exterior()).len(), 1);
    }

    #[test]
    fn test_overlapping_parts_merged_and_idempotent() {
        let input = MultiPolygon::new(vec![square(0.0, 2.0), square(1.0, 3.0)]);
        let validator = GeometryValidator::new();
        let (output, report) = validator.validate(&input).unwrap();

        assert!(!report.valid_before);
        assert!(report.valid_after);
        assert_eq!(report.polygons, 1);
        assert!(output.is_valid());
        assert!((output.unsigned_area() - 7.0).abs() < 1e-6);

        // Repaired output is clean, so a second pass returns it unchanged.
        let (again, second) = validator.validate(&output).unwrap();
        assert_eq!(again, output);
        assert!(!second.repaired);
    }

    #[test]
    fn test_clockwise_exterior_reoriented() {
        let cw = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0)]),
            vec![],
        );
        let (output, report) = GeometryValidator::new()
            .validate(&MultiPolygon::new(vec![cw]))
            .unwrap();
        assert!(report.repaired);
        assert!(report
            .defects
            .contains(&Defect::ExteriorOrientation { polygon: 0 }));
        assert!(output.0[0].exterior().is_ccw());
        assert!((output.unsigned_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_holes_preserved_and_reported() {
        let hole = LineString::from(vec![(4.0, 4.0), (4.0, 6.0), (6.0, 6.0), (6.0, 4.0), (4.0, 4.0)]);
        let with_hole = Polygon::new(square(0.0, 10.0).exterior().clone(), vec![hole]);
        let (output, report) = GeometryValidator::new()
            .validate(&MultiPolygon::new(vec![with_hole]))
            .unwrap();
        assert_eq!(report.holes, 1);
        assert!(report.has_holes());
        assert!((output.unsigned_area() - 96.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_area_fails() {
        let flat = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)]),
            vec![],
        );
        let err = GeometryValidator::new()
            .validate(&MultiPolygon::new(vec![flat]))
            .unwrap_err();
        assert!(matches!(err, GeometryError::Degenerate { .. }));
        assert!(err.feature().location.is_some());
    }

    #[test]
    fn test_empty_and_non_finite() {
        let validator = GeometryValidator::new();
        let empty = MultiPolygon::<f64>::new(vec![]);
        assert!(matches!(
            validator.validate(&empty),
            Err(GeometryError::Empty { .. })
        ));

        let mut broken = square(0.0, 1.0);
        broken.exterior_mut(|ring| ring.0[1] = Coord { x: f64::NAN, y: 0.0 });
        assert!(matches!(
            validator.validate_polygon(&broken),
            Err(GeometryError::NonFinite { .. })
        ));
    }
}
