//! Land-use composition: clip to the boundary, dissolve by category, measure.

mod aggregator;
mod classify;

pub use aggregator::{LandUseAggregator, LandUseDiagnostics, LandUseReport};
pub use classify::{classify_tags, CategoryPolicy};
