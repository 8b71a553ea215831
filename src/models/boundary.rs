//! Administrative boundary input and the canonical boundary record.

use geo::{Geometry, MultiPolygon};
use serde::Serialize;

use super::Crs;
use crate::geometry::{Projected, ValidityReport};

/// An already-fetched boundary geometry plus its source metadata.
#[derive(Debug, Clone)]
pub struct BoundarySource {
    pub geometry: Geometry<f64>,
    pub crs: Crs,
    /// Administrative relation identifier, e.g. "R5167559"
    pub source_id: String,
    pub admin_level: Option<u8>,
    pub name: Option<String>,
}

impl BoundarySource {
    pub fn new(geometry: impl Into<Geometry<f64>>, crs: Crs, source_id: impl Into<String>) -> Self {
        Self {
            geometry: geometry.into(),
            crs,
            source_id: source_id.into(),
            admin_level: None,
            name: None,
        }
    }

    pub fn with_admin_level(mut self, level: u8) -> Self {
        self.admin_level = Some(level);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Simplified boundary in the storage CRS, for rendering only.
///
/// Deliberately not a [`Projected`] value: nothing can be measured on it.
#[derive(Debug, Clone)]
pub struct VisualizationGeometry {
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
    pub tolerance_m: f64,
}

/// Audit trail of how the boundary was produced.
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryMetadata {
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source_crs: Crs,
    pub analysis_crs: Crs,
    pub area_km2: f64,
    pub validity: ValidityReport,
}

/// The validated, projected city polygon. Created once per run and read-only
/// afterwards.
#[derive(Debug, Clone)]
pub struct BoundaryRecord {
    metadata: BoundaryMetadata,
    geometry: Projected<MultiPolygon<f64>>,
    visualization: Option<VisualizationGeometry>,
}

impl BoundaryRecord {
    pub(crate) fn new(
        metadata: BoundaryMetadata,
        geometry: Projected<MultiPolygon<f64>>,
        visualization: Option<VisualizationGeometry>,
    ) -> Self {
        Self {
            metadata,
            geometry,
            visualization,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.metadata.source_id
    }

    pub fn admin_level(&self) -> Option<u8> {
        self.metadata.admin_level
    }

    pub fn area_km2(&self) -> f64 {
        self.metadata.area_km2
    }

    pub fn source_crs(&self) -> Crs {
        self.metadata.source_crs
    }

    pub fn analysis_crs(&self) -> Crs {
        self.metadata.analysis_crs
    }

    pub fn validity(&self) -> &ValidityReport {
        &self.metadata.validity
    }

    /// Geometry in the analysis CRS, used for every clip and measurement
    pub fn geometry(&self) -> &Projected<MultiPolygon<f64>> {
        &self.geometry
    }

    pub fn visualization(&self) -> Option<&VisualizationGeometry> {
        self.visualization.as_ref()
    }

    pub fn metadata(&self) -> &BoundaryMetadata {
        &self.metadata
    }
}
