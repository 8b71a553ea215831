//! Geometry validation and CRS discipline.
//!
//! Every measurement in the crate goes through [`Projected`], which only the
//! [`CrsProjector`] can produce.

mod projected;
mod projector;
mod validator;

pub use projected::{Projected, M2_PER_KM2};
pub use projector::{CrsProjector, Reproject, Transformer};
pub use validator::{Defect, GeometryValidator, ValidityReport};
