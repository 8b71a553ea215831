//! Error types for the analysis core.
//!
//! Component errors are kept separate so callers can tell an unrepairable
//! geometry from a bad CRS or a bad configuration. [`Error`] wraps them all.

use std::fmt;

use geo::{BoundingRect, Coord, MultiPolygon};
use thiserror::Error;

use crate::models::Crs;

/// Identifying attributes of an offending feature, attached to every
/// feature-level error and diagnostic.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct FeatureRef {
    /// Input position within its layer, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Approximate location (bounding-box centre) in the feature's own CRS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<(f64, f64)>,
}

impl FeatureRef {
    /// Reference a geometry by the centre of its bounding box.
    pub fn locate(geometry: &MultiPolygon<f64>) -> Self {
        Self {
            location: geometry.bounding_rect().map(|rect| {
                let Coord { x, y } = rect.center();
                (x, y)
            }),
            ..Self::default()
        }
    }

    pub fn at(x: f64, y: f64) -> Self {
        Self {
            location: Some((x, y)),
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_category(mut self, category: Option<&str>) -> Self {
        self.category = category.map(str::to_string);
        self
    }
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(index) = self.index {
            write!(f, "feature #{index}")?;
            wrote = true;
        }
        if let Some(category) = &self.category {
            if wrote {
                write!(f, " ")?;
            }
            write!(f, "category={category}")?;
            wrote = true;
        }
        if let Some((x, y)) = self.location {
            if wrote {
                write!(f, " ")?;
            }
            write!(f, "near ({x:.5}, {y:.5})")?;
            wrote = true;
        }
        if !wrote {
            write!(f, "unidentified feature")?;
        }
        Ok(())
    }
}

/// Unrepairable or degenerate geometry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryError {
    #[error("empty geometry ({feature})")]
    Empty { feature: FeatureRef },

    #[error("non-finite coordinate in {feature}")]
    NonFinite { feature: FeatureRef },

    #[error("geometry collapsed to zero area after repair ({feature})")]
    Degenerate { feature: FeatureRef },
}

impl GeometryError {
    pub fn feature(&self) -> &FeatureRef {
        match self {
            GeometryError::Empty { feature }
            | GeometryError::NonFinite { feature }
            | GeometryError::Degenerate { feature } => feature,
        }
    }

    /// Replace the feature reference with richer caller-side attributes,
    /// keeping the location found by the validator when the caller has none.
    pub fn with_feature(self, mut feature: FeatureRef) -> Self {
        if feature.location.is_none() {
            feature.location = self.feature().location;
        }
        match self {
            GeometryError::Empty { .. } => GeometryError::Empty { feature },
            GeometryError::NonFinite { .. } => GeometryError::NonFinite { feature },
            GeometryError::Degenerate { .. } => GeometryError::Degenerate { feature },
        }
    }
}

/// Unsupported or mismatched CRS, or failed reprojection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CrsError {
    #[error("unsupported CRS identifier: {0}")]
    Unsupported(String),

    #[error("analysis CRS must be projected, got geographic {0}")]
    NotProjected(Crs),

    #[error("expected geometry in {expected}, found {found}")]
    Mismatch { expected: Crs, found: Crs },

    #[error("failed to build projection for {crs}: {reason}")]
    Definition { crs: Crs, reason: String },

    #[error("reprojection {from} -> {to} failed at ({x}, {y}): {reason}")]
    Transform {
        from: Crs,
        to: Crs,
        x: f64,
        y: f64,
        reason: String,
    },
}

/// Invalid or empty boundary input. Fatal to the run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BoundaryError {
    #[error("boundary {source_id} has an empty geometry")]
    Empty { source_id: String },

    #[error("boundary {source_id} is a {kind}, expected Polygon or MultiPolygon")]
    NotPolygonal { source_id: String, kind: String },

    #[error("boundary {source_id} could not be repaired")]
    Repair {
        source_id: String,
        #[source]
        source: GeometryError,
    },

    #[error("boundary {source_id} could not be projected")]
    Projection {
        source_id: String,
        #[source]
        source: CrsError,
    },
}

/// Invalid grid or analysis parameters.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("cell size must be a positive finite number of metres, got {0}")]
    CellSize(f64),

    #[error("negligible area fraction must be within [0, 1), got {0}")]
    NegligibleArea(f64),

    #[error("simplification tolerance must be non-negative, got {0}")]
    SimplifyTolerance(f64),

    #[error("unknown grid shape: {0}")]
    GridShape(String),

    #[error("grid of {cells} cells exceeds the limit of {limit}; use a larger cell size")]
    GridTooLarge { cells: u64, limit: u64 },

    #[error(transparent)]
    Crs(#[from] CrsError),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Crs(#[from] CrsError),

    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{layer} layer is empty")]
    EmptyInput { layer: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
