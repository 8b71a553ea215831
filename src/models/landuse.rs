//! Land-use features and their composition summary.

use geo::MultiPolygon;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::geometry::Projected;

/// Reserved category for features with a missing or unrecognized tag.
pub const UNCLASSIFIED: &str = "unclassified";

/// A land-use polygon as ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct LandUseFeature {
    pub geometry: MultiPolygon<f64>,
    pub category: Option<String>,
    pub raw_attributes: BTreeMap<String, String>,
}

impl LandUseFeature {
    pub fn new(geometry: impl Into<MultiPolygon<f64>>, category: Option<&str>) -> Self {
        Self {
            geometry: geometry.into(),
            category: category.map(str::to_string),
            raw_attributes: BTreeMap::new(),
        }
    }

    /// Build a feature whose category is derived from its raw tags.
    pub fn from_tags(
        geometry: impl Into<MultiPolygon<f64>>,
        raw_attributes: BTreeMap<String, String>,
        tag_priority: &[String],
    ) -> Self {
        let category = crate::landuse::classify_tags(&raw_attributes, tag_priority);
        Self {
            geometry: geometry.into(),
            category,
            raw_attributes,
        }
    }
}

/// Area of one category within the boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandUseSummary {
    pub category: String,
    pub area_km2: f64,
    pub pct_of_total: f64,
    /// Clipped features merged into this category
    pub features: usize,
}

/// All clipped features of one category merged into one geometry.
#[derive(Debug, Clone)]
pub struct DissolvedCategory {
    pub category: String,
    pub geometry: Projected<MultiPolygon<f64>>,
}
