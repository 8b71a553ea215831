//! Point and building aggregation onto spatial units.

mod aggregator;
mod footprint;
mod index;

pub use aggregator::{CategoryDensity, DensityAggregator, DensityDiagnostics, DensityReport, UnitTotal};
pub use footprint::{FootprintAggregator, FootprintDiagnostics, FootprintRecord, FootprintReport};
