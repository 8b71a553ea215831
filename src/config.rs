use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{ConfigError, CrsError};
use crate::models::{Crs, GridShape};

/// Parameters of one analysis run. Every field has a default, so an empty
/// TOML file is a valid configuration.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Projected CRS used for all measurement; defaults to the WGS84 UTM zone
    /// of the boundary
    pub analysis_crs: Option<Crs>,
    pub cell_size_m: f64,
    pub grid_shape: GridShape,
    /// Cells whose clipped area is at most this fraction of the nominal cell
    /// area are discarded as slivers
    pub negligible_area_fraction: f64,
    /// Tolerance of the visualization copy of the boundary; 0 disables it
    pub simplify_tolerance_m: f64,
    pub landuse: LandUseConfig,
    pub poi: PoiConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LandUseConfig {
    /// Categories accepted as-is; anything else becomes "unclassified".
    /// When absent every non-empty tag is accepted.
    pub recognized_categories: Option<BTreeSet<String>>,
    /// Raw attribute keys consulted, in order, to derive a category
    pub tag_priority: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PoiConfig {
    pub tag_priority: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis_crs: None,
            cell_size_m: 500.0,
            grid_shape: GridShape::Square,
            negligible_area_fraction: 0.001,
            simplify_tolerance_m: 10.0,
            landuse: LandUseConfig::default(),
            poi: PoiConfig::default(),
        }
    }
}

impl Default for LandUseConfig {
    fn default() -> Self {
        Self {
            recognized_categories: None,
            tag_priority: ["landuse", "natural", "leisure", "landcover"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl Default for PoiConfig {
    fn default() -> Self {
        Self {
            tag_priority: ["amenity", "leisure", "shop"].map(String::from).to_vec(),
        }
    }
}

impl AnalysisConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: AnalysisConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size_m.is_finite() && self.cell_size_m > 0.0) {
            return Err(ConfigError::CellSize(self.cell_size_m));
        }
        if !(0.0..1.0).contains(&self.negligible_area_fraction) {
            return Err(ConfigError::NegligibleArea(self.negligible_area_fraction));
        }
        if !(self.simplify_tolerance_m.is_finite() && self.simplify_tolerance_m >= 0.0) {
            return Err(ConfigError::SimplifyTolerance(self.simplify_tolerance_m));
        }
        if let Some(crs) = self.analysis_crs {
            if crs.is_geographic() {
                return Err(CrsError::NotProjected(crs).into());
            }
        }
        Ok(())
    }
}
