//! Stage orchestration for one analysis run.
//!
//! Boundary first, then land use and the grid against the validated
//! boundary, then density over the grid (and neighborhoods, when given).
//! Each stage consumes the complete output of the previous one.

use geo::{BooleanOps, BoundingRect, MultiPolygon};
use tracing::{info, warn};

use crate::boundary::BoundaryProcessor;
use crate::config::AnalysisConfig;
use crate::density::{
    CategoryDensity, DensityAggregator, DensityReport, FootprintAggregator, FootprintReport,
};
use crate::error::{ConfigError, Error, FeatureRef};
use crate::geometry::{CrsProjector, GeometryValidator, Projected, Reproject};
use crate::grid::GridBuilder;
use crate::landuse::{CategoryPolicy, LandUseAggregator, LandUseReport};
use crate::models::{
    BoundaryRecord, BoundarySource, Crs, Diagnostics, GridCell, LandUseFeature, Neighborhood,
    PointFeature, SkippedFeature,
};

/// A feature layer in its storage CRS.
#[derive(Debug, Clone)]
pub struct Layer<T> {
    pub features: Vec<T>,
    pub crs: Crs,
}

impl<T> Layer<T> {
    pub fn new(features: Vec<T>, crs: Crs) -> Self {
        Self { features, crs }
    }
}

/// A named polygon supplied as an aggregation unit.
#[derive(Debug, Clone)]
pub struct NeighborhoodSource {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

impl Reproject for NeighborhoodSource {
    fn reproject(&self, transformer: &crate::geometry::Transformer) -> Result<Self, Error> {
        Ok(Self {
            name: self.name.clone(),
            geometry: self.geometry.reproject(transformer)?,
        })
    }
}

/// Everything one run consumes. Only the boundary is required.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub boundary: BoundarySource,
    pub landuse: Option<Layer<LandUseFeature>>,
    pub points: Option<Layer<PointFeature>>,
    pub neighborhoods: Option<Layer<NeighborhoodSource>>,
    pub buildings: Option<Layer<MultiPolygon<f64>>>,
}

impl AnalysisInput {
    pub fn new(boundary: BoundarySource) -> Self {
        Self {
            boundary,
            landuse: None,
            points: None,
            neighborhoods: None,
            buildings: None,
        }
    }
}

/// Everything one run produces.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub boundary: BoundaryRecord,
    pub landuse: Option<LandUseReport>,
    pub grid: Vec<GridCell>,
    pub grid_density: Option<DensityReport>,
    pub category_density: Vec<CategoryDensity>,
    pub neighborhoods: Vec<Neighborhood>,
    pub neighborhood_density: Option<DensityReport>,
    pub footprints: Option<FootprintReport>,
    pub diagnostics: Diagnostics,
}

pub struct Pipeline {
    config: AnalysisConfig,
}

impl Pipeline {
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The configured analysis CRS, or else the source CRS when it is already
    /// projected, or else the WGS84 UTM zone of the boundary's extent centre.
    pub fn resolve_analysis_crs(&self, boundary: &BoundarySource) -> Result<Crs, Error> {
        if let Some(crs) = self.config.analysis_crs {
            return Ok(crs);
        }
        if !boundary.crs.is_geographic() {
            return Ok(boundary.crs);
        }
        let Some(extent) = boundary.geometry.bounding_rect() else {
            return Err(Error::EmptyInput { layer: "boundary" });
        };
        let center = extent.center();
        let crs = Crs::utm_for(center.x, center.y);
        info!(
            "Analysis CRS {} chosen for boundary centre ({:.4}, {:.4})",
            crs, center.x, center.y
        );
        Ok(crs)
    }

    pub fn run(&self, input: &AnalysisInput) -> Result<AnalysisReport, Error> {
        let analysis_crs = self.resolve_analysis_crs(&input.boundary)?;
        let projector = CrsProjector::new(analysis_crs)?;
        let mut diagnostics = Diagnostics::default();

        // Stage 1: boundary
        let boundary = BoundaryProcessor::new(&projector, self.config.simplify_tolerance_m)
            .acquire_boundary(&input.boundary)?;
        diagnostics.boundary_validity = boundary.validity().clone();

        // Stage 2: land use
        let landuse = match &input.landuse {
            Some(layer) => {
                let (features, skipped) = project_layer(&projector, layer, "landuse", |f| {
                    FeatureRef::locate(&f.geometry).with_category(f.category.as_deref())
                })?;
                let policy = CategoryPolicy::new(self.config.landuse.recognized_categories.clone());
                let mut report = LandUseAggregator::new(policy).aggregate(&features, &boundary)?;
                report.diagnostics.skipped.extend(skipped);
                diagnostics.landuse_exceeds_100 = report.diagnostics.exceeds_100;
                diagnostics.landuse_total_pct = report.diagnostics.total_pct;
                diagnostics.landuse_overlap_km2 = report.diagnostics.overlap_km2;
                diagnostics.landuse_outside = report.diagnostics.features_outside;
                diagnostics.landuse_skipped = report.diagnostics.skipped.clone();
                Some(report)
            }
            None => None,
        };

        // Stage 3: grid
        let grid = GridBuilder::new(self.config.negligible_area_fraction)?.build_grid(
            &boundary,
            self.config.cell_size_m,
            self.config.grid_shape,
        )?;

        let neighborhoods = match &input.neighborhoods {
            Some(layer) => {
                let (neighborhoods, skipped) = self.neighborhoods(&projector, layer, &boundary)?;
                diagnostics.neighborhoods_skipped = skipped;
                neighborhoods
            }
            None => Vec::new(),
        };

        // Stage 4: density
        let density = DensityAggregator::new(CategoryPolicy::default());
        let mut grid_density = None;
        let mut neighborhood_density = None;
        let mut category_density = Vec::new();
        if let Some(layer) = &input.points {
            let (points, skipped) = project_layer(&projector, layer, "points", |p| {
                FeatureRef::at(p.geometry.x(), p.geometry.y()).with_category(p.category.as_deref())
            })?;
            diagnostics.points_skipped = skipped;

            let report = density.aggregate_points_within(&points, &grid, &boundary)?;
            diagnostics.points_outside = report.diagnostics.points_outside;
            diagnostics.points_uncovered = report.diagnostics.points_uncovered;
            diagnostics.points_on_shared_edge = report.diagnostics.points_on_shared_edge;
            diagnostics
                .points_skipped
                .extend(report.diagnostics.skipped.iter().cloned());
            diagnostics
                .degenerate_units
                .extend(report.diagnostics.degenerate_units.iter().cloned());
            grid_density = Some(report);

            category_density = density.boundary_density(&points, &boundary)?;

            if !neighborhoods.is_empty() {
                let report =
                    density.aggregate_points_within(&points, &neighborhoods, &boundary)?;
                diagnostics
                    .degenerate_units
                    .extend(report.diagnostics.degenerate_units.iter().cloned());
                neighborhood_density = Some(report);
            }
        }

        let footprints = match &input.buildings {
            Some(layer) => {
                let (buildings, skipped) =
                    project_layer(&projector, layer, "buildings", FeatureRef::locate)?;
                let mut report = FootprintAggregator::new().aggregate_footprints(&buildings, &grid)?;
                report.diagnostics.skipped.extend(skipped);
                diagnostics.footprints_skipped = report.diagnostics.skipped.clone();
                diagnostics.footprints_outside = report.diagnostics.outside;
                Some(report)
            }
            None => None,
        };

        diagnostics.degenerate_units.sort();
        diagnostics.degenerate_units.dedup();

        info!("Analysis of {} complete", boundary.source_id());

        Ok(AnalysisReport {
            boundary,
            landuse,
            grid,
            grid_density,
            category_density,
            neighborhoods,
            neighborhood_density,
            footprints,
            diagnostics,
        })
    }

    /// Project, repair and clip neighborhood polygons, keeping input order.
    fn neighborhoods(
        &self,
        projector: &CrsProjector,
        layer: &Layer<NeighborhoodSource>,
        boundary: &BoundaryRecord,
    ) -> Result<(Vec<Neighborhood>, Vec<SkippedFeature>), Error> {
        let validator = GeometryValidator::new();
        let projected = projector.to_analysis_all(&layer.features, layer.crs)?;
        let mut neighborhoods = Vec::new();
        let mut skipped = Vec::new();

        for (position, (source, result)) in layer.features.iter().zip(projected).enumerate() {
            let feature = FeatureRef::locate(&source.geometry)
                .with_index(position)
                .with_category(Some(&source.name));
            let clipped = result.and_then(|projected| {
                let (repaired, _) = validator.validate(&projected.geometry)?;
                Ok(projected.derive(|_| repaired.intersection(boundary.geometry().get())))
            });
            match clipped {
                Ok(geometry) if !geometry.0.is_empty() => {
                    neighborhoods.push(Neighborhood::new(position, source.name.clone(), geometry));
                }
                Ok(_) => {
                    warn!("Neighborhood {} lies outside the boundary", source.name);
                    skipped.push(SkippedFeature {
                        feature,
                        reason: "outside the boundary".to_string(),
                    });
                }
                Err(e) => {
                    warn!("Skipping neighborhood {}: {}", source.name, e);
                    skipped.push(SkippedFeature {
                        feature,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!("{} neighborhoods used as units", neighborhoods.len());
        Ok((neighborhoods, skipped))
    }
}

/// Project a layer feature by feature. Features that fail to project are
/// skipped and reported; an empty layer is fatal.
fn project_layer<T: Reproject>(
    projector: &CrsProjector,
    layer: &Layer<T>,
    name: &'static str,
    describe: impl Fn(&T) -> FeatureRef,
) -> Result<(Vec<Projected<T>>, Vec<SkippedFeature>), Error> {
    if layer.features.is_empty() {
        return Err(Error::EmptyInput { layer: name });
    }
    let results = projector.to_analysis_all(&layer.features, layer.crs)?;
    let mut projected = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for (index, (feature, result)) in layer.features.iter().zip(results).enumerate() {
        match result {
            Ok(value) => projected.push(value),
            Err(e) => {
                let feature = describe(feature).with_index(index);
                warn!("Skipping {} feature {}: {}", name, feature, e);
                skipped.push(SkippedFeature {
                    feature,
                    reason: e.to_string(),
                });
            }
        }
    }
    if projected.is_empty() {
        return Err(Error::EmptyInput { layer: name });
    }
    Ok((projected, skipped))
}
