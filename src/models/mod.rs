//! Core data models for the analysis pipeline.

pub mod boundary;
pub mod crs;
pub mod diagnostics;
pub mod grid;
pub mod landuse;
pub mod poi;
pub mod unit;

pub use boundary::{BoundaryMetadata, BoundaryRecord, BoundarySource, VisualizationGeometry};
pub use crs::Crs;
pub use diagnostics::{Diagnostics, SkippedFeature};
pub use grid::{CellId, GridCell, GridShape};
pub use landuse::{DissolvedCategory, LandUseFeature, LandUseSummary, UNCLASSIFIED};
pub use poi::{DensityRecord, PointFeature};
pub use unit::{Neighborhood, NeighborhoodId, SpatialUnit, UnitId};
