//! Spatial units that points are aggregated into.

use geo::MultiPolygon;
use serde::Serialize;
use std::fmt;

use super::{CellId, GridCell};
use crate::geometry::Projected;

/// Identifier of a grid cell or a neighborhood.
///
/// The ordering decides boundary ties: lower cell id first, neighborhoods in
/// input order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum UnitId {
    Cell(CellId),
    Neighborhood(NeighborhoodId),
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Cell(id) => write!(f, "{id}"),
            UnitId::Neighborhood(id) => write!(f, "{id}"),
        }
    }
}

impl From<UnitId> for String {
    fn from(id: UnitId) -> Self {
        id.to_string()
    }
}

/// Neighborhood identity: input position first, then name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NeighborhoodId {
    pub position: usize,
    pub name: String,
}

impl fmt::Display for NeighborhoodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Capability shared by grid cells and neighborhoods: a stable identifier, a
/// projected geometry and its area.
pub trait SpatialUnit {
    fn unit_id(&self) -> UnitId;
    fn geometry(&self) -> &Projected<MultiPolygon<f64>>;
    fn area_km2(&self) -> f64;
}

impl SpatialUnit for GridCell {
    fn unit_id(&self) -> UnitId {
        UnitId::Cell(self.id)
    }

    fn geometry(&self) -> &Projected<MultiPolygon<f64>> {
        &self.geometry
    }

    fn area_km2(&self) -> f64 {
        self.area_km2
    }
}

/// An externally supplied polygon used as an aggregation unit.
#[derive(Debug, Clone)]
pub struct Neighborhood {
    pub id: NeighborhoodId,
    pub geometry: Projected<MultiPolygon<f64>>,
    pub area_km2: f64,
}

impl Neighborhood {
    pub fn new(position: usize, name: impl Into<String>, geometry: Projected<MultiPolygon<f64>>) -> Self {
        let area_km2 = geometry.area_km2();
        Self {
            id: NeighborhoodId {
                position,
                name: name.into(),
            },
            geometry,
            area_km2,
        }
    }
}

impl SpatialUnit for Neighborhood {
    fn unit_id(&self) -> UnitId {
        UnitId::Neighborhood(self.id.clone())
    }

    fn geometry(&self) -> &Projected<MultiPolygon<f64>> {
        &self.geometry
    }

    fn area_km2(&self) -> f64 {
        self.area_km2
    }
}
