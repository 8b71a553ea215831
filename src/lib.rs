//! Cityscope - boundary-clipped land-use composition and POI density.
//!
//! This library provides the geometric core used by the `analyze` binary.

pub mod boundary;
pub mod config;
pub mod density;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod landuse;
pub mod models;
pub mod pipeline;

pub use boundary::BoundaryProcessor;
pub use config::AnalysisConfig;
pub use density::{DensityAggregator, DensityReport, FootprintAggregator};
pub use error::{Error, Result};
pub use geometry::{CrsProjector, GeometryValidator, Projected};
pub use grid::GridBuilder;
pub use landuse::{LandUseAggregator, LandUseReport};
pub use models::{BoundaryRecord, BoundarySource, Crs, GridCell, GridShape, SpatialUnit};
pub use pipeline::{AnalysisInput, AnalysisReport, Layer, NeighborhoodSource, Pipeline};
