//! Grid cells produced by the grid builder.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::geometry::Projected;

/// Lattice shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridShape {
    #[default]
    Square,
    /// Pointy-top hexagons, sized by flat-to-flat diameter
    Hexagon,
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridShape::Square => write!(f, "square"),
            GridShape::Hexagon => write!(f, "hexagon"),
        }
    }
}

impl FromStr for GridShape {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "square" => Ok(GridShape::Square),
            "hexagon" | "hex" => Ok(GridShape::Hexagon),
            _ => Err(ConfigError::GridShape(s.to_string())),
        }
    }
}

/// Lattice coordinates of a cell, relative to the lattice origin.
///
/// Ordering is row-major for squares (row, then column) and r-major for
/// hexagons; the lower id wins boundary ties in the density join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellId {
    Square { row: i64, col: i64 },
    Hex { r: i64, q: i64 },
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellId::Square { row, col } => write!(f, "r{row}_c{col}"),
            CellId::Hex { q, r } => write!(f, "q{q}_r{r}"),
        }
    }
}

/// A lattice cell clipped to the boundary.
#[derive(Debug, Clone)]
pub struct GridCell {
    pub id: CellId,
    pub geometry: Projected<MultiPolygon<f64>>,
    /// Area of the clipped geometry; smaller than nominal at boundary edges
    pub area_km2: f64,
    /// Area of the unclipped lattice cell
    pub nominal_area_km2: f64,
}

impl GridCell {
    /// Share of the nominal cell that lies inside the boundary
    pub fn coverage_ratio(&self) -> f64 {
        if self.nominal_area_km2 > 0.0 {
            self.area_km2 / self.nominal_area_km2
        } else {
            0.0
        }
    }

    pub fn is_full(&self) -> bool {
        self.coverage_ratio() >= 1.0 - 1e-9
    }
}
