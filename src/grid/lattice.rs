//! Regular lattices anchored at the minimum corner of an extent.
//!
//! Cell ids are pure functions of lattice coordinates, so the same extent and
//! cell size always yield the same ids and coordinates.

use geo::{Coord, LineString, Polygon, Rect};

use crate::models::CellId;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// A lattice cell before clipping.
#[derive(Debug, Clone)]
pub(crate) struct LatticeCell {
    pub id: CellId,
    pub polygon: Polygon<f64>,
    pub extent: Rect<f64>,
}

/// Number of cells the lattice will enumerate for this extent.
pub(crate) fn square_count(extent: &Rect<f64>, size: f64) -> u64 {
    let (cols, rows) = square_dims(extent, size);
    cols as u64 * rows as u64
}

fn square_dims(extent: &Rect<f64>, size: f64) -> (i64, i64) {
    let cols = (extent.width() / size).ceil().max(1.0) as i64;
    let rows = (extent.height() / size).ceil().max(1.0) as i64;
    (cols, rows)
}

/// Square cells of edge `size`, row-major from the minimum corner.
pub(crate) fn square_cells(extent: &Rect<f64>, size: f64) -> impl Iterator<Item = LatticeCell> {
    let origin = extent.min();
    let (cols, rows) = square_dims(extent, size);

    (0..rows).flat_map(move |row| {
        (0..cols).map(move |col| {
            let min = Coord {
                x: origin.x + col as f64 * size,
                y: origin.y + row as f64 * size,
            };
            let max = Coord {
                x: origin.x + (col + 1) as f64 * size,
                y: origin.y + (row + 1) as f64 * size,
            };
            let extent = Rect::new(min, max);
            LatticeCell {
                id: CellId::Square { row, col },
                polygon: extent.to_polygon(),
                extent,
            }
        })
    })
}

pub(crate) fn square_area(size: f64) -> f64 {
    size * size
}

/// Circumradius of a pointy-top hexagon with the given flat-to-flat diameter.
fn hex_radius(diameter: f64) -> f64 {
    diameter / SQRT_3
}

pub(crate) fn hex_area(diameter: f64) -> f64 {
    SQRT_3 / 2.0 * diameter * diameter
}

fn hex_rows(extent: &Rect<f64>, diameter: f64) -> (i64, i64) {
    let row_step = 1.5 * hex_radius(diameter);
    (-1, (extent.height() / row_step).ceil() as i64 + 1)
}

fn hex_cols(extent: &Rect<f64>, diameter: f64, r: i64) -> (i64, i64) {
    let shift = r as f64 / 2.0;
    let q_min = (-shift).floor() as i64 - 1;
    let q_max = (extent.width() / diameter - shift).ceil() as i64 + 1;
    (q_min, q_max)
}

pub(crate) fn hex_count(extent: &Rect<f64>, diameter: f64) -> u64 {
    let (r_min, r_max) = hex_rows(extent, diameter);
    (r_min..=r_max)
        .map(|r| {
            let (q_min, q_max) = hex_cols(extent, diameter, r);
            (q_max - q_min + 1) as u64
        })
        .sum()
}

/// Corner offsets of a pointy-top hexagon on the corner grid, counter-clockwise
/// from the upper-right corner.
const HEX_CORNERS: [(i64, i64); 6] = [(1, 1), (0, 2), (-1, 1), (-1, -1), (0, -2), (1, -1)];

/// Pointy-top hexagons in axial (q, r) coordinates, with cell (0, 0)
/// centred on the minimum corner. Enumerates a margin of one cell on every
/// side so the extent is fully covered.
///
/// Corners live on an integer grid with steps of half the diameter in x and
/// half the circumradius in y. Neighbouring cells compute a shared corner
/// from the same integers, so shared edges are bit-identical.
pub(crate) fn hex_cells(extent: &Rect<f64>, diameter: f64) -> impl Iterator<Item = LatticeCell> {
    let origin = extent.min();
    let half_x = diameter / 2.0;
    let half_y = hex_radius(diameter) / 2.0;
    let extent = *extent;
    let (r_min, r_max) = hex_rows(&extent, diameter);
    let corner = move |i: i64, j: i64| Coord {
        x: origin.x + half_x * i as f64,
        y: origin.y + half_y * j as f64,
    };

    (r_min..=r_max).flat_map(move |r| {
        let (q_min, q_max) = hex_cols(&extent, diameter, r);
        (q_min..=q_max).map(move |q| {
            let (ci, cj) = (2 * q + r, 3 * r);
            let mut ring: Vec<Coord<f64>> = HEX_CORNERS
                .iter()
                .map(|&(di, dj)| corner(ci + di, cj + dj))
                .collect();
            ring.push(ring[0]);
            LatticeCell {
                id: CellId::Hex { r, q },
                polygon: Polygon::new(LineString::new(ring), vec![]),
                extent: Rect::new(corner(ci - 1, cj - 2), corner(ci + 1, cj + 2)),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    fn extent(w: f64, h: f64) -> Rect<f64> {
        Rect::new(Coord { x: 100.0, y: 200.0 }, Coord { x: 100.0 + w, y: 200.0 + h })
    }

    #[test]
    fn test_square_lattice_anchored_at_min_corner() {
        let cells: Vec<_> = square_cells(&extent(10.0, 5.0), 4.0).collect();
        assert_eq!(cells.len(), 6);
        assert_eq!(square_count(&extent(10.0, 5.0), 4.0), 6);
        assert_eq!(cells[0].id, CellId::Square { row: 0, col: 0 });
        assert_eq!(cells[0].extent.min(), Coord { x: 100.0, y: 200.0 });
        assert_eq!(cells[5].id, CellId::Square { row: 1, col: 2 });
        assert_eq!(cells[5].extent.max(), Coord { x: 112.0, y: 208.0 });
    }

    #[test]
    fn test_hexagon_geometry() {
        let cells: Vec<_> = hex_cells(&extent(10.0, 10.0), 2.0).collect();
        assert_eq!(cells.len() as u64, hex_count(&extent(10.0, 10.0), 2.0));
        let origin = cells
            .iter()
            .find(|c| c.id == CellId::Hex { r: 0, q: 0 })
            .unwrap();
        // Flat-to-flat width equals the diameter.
        assert!((origin.extent.width() - 2.0).abs() < 1e-12);
        assert!((origin.polygon.unsigned_area() - hex_area(2.0)).abs() < 1e-9);
        assert!((origin.extent.center().x - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_hex_neighbours_share_exact_corners() {
        // Off-origin extent at projected-metre magnitudes.
        let extent = Rect::new(
            Coord { x: 350_123.7, y: 6_512_345.3 },
            Coord { x: 353_123.7, y: 6_515_345.3 },
        );
        let cells: Vec<_> = hex_cells(&extent, 500.0).collect();
        let cell = |r, q| {
            cells
                .iter()
                .find(|c| c.id == CellId::Hex { r, q })
                .unwrap()
                .polygon
                .exterior()
                .clone()
        };
        let here = cell(2, 2);
        // East, north-east and north-west neighbours.
        for (r, q) in [(2, 3), (3, 2), (3, 1)] {
            let there = cell(r, q);
            let shared = here.0[..6].iter().filter(|c| there.0.contains(c)).count();
            assert_eq!(shared, 2, "cells (2, 2) and ({r}, {q})");
        }
    }
}
