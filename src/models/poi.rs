//! Point features and per-unit density records.

use geo::Point;
use serde::Serialize;
use std::collections::BTreeMap;

use super::UnitId;

/// A point of interest as ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFeature {
    pub geometry: Point<f64>,
    pub category: Option<String>,
}

impl PointFeature {
    pub fn new(geometry: Point<f64>, category: Option<&str>) -> Self {
        Self {
            geometry,
            category: category.map(str::to_string),
        }
    }

    /// Build a point whose category is derived from its raw tags.
    pub fn from_tags(
        geometry: Point<f64>,
        raw_attributes: &BTreeMap<String, String>,
        tag_priority: &[String],
    ) -> Self {
        Self {
            geometry,
            category: crate::landuse::classify_tags(raw_attributes, tag_priority),
        }
    }
}

/// Count and density of one category within one spatial unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityRecord {
    pub unit_id: UnitId,
    pub category: String,
    pub count: usize,
    pub density_per_km2: f64,
}
