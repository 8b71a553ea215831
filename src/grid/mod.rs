//! Regular analysis grids clipped to a boundary.

mod builder;
mod lattice;

pub use builder::{GridBuilder, MAX_CELLS};
