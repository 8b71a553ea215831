use geo::{unary_union, BooleanOps, BoundingRect, Intersects, MultiPolygon, Polygon};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::CategoryPolicy;
use crate::error::{CrsError, Error, FeatureRef};
use crate::geometry::{GeometryValidator, Projected};
use crate::models::{
    BoundaryRecord, DissolvedCategory, LandUseFeature, LandUseSummary, SkippedFeature,
};

/// Tolerance, in percentage points, before a sum is reported as above 100%
const PCT_TOLERANCE: f64 = 1e-3;

/// Land-use composition of a boundary.
#[derive(Debug, Clone)]
pub struct LandUseReport {
    /// One row per category, sorted by category name
    pub summaries: Vec<LandUseSummary>,
    /// Dissolved geometry per category, same order as `summaries`
    pub dissolved: Vec<DissolvedCategory>,
    pub diagnostics: LandUseDiagnostics,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LandUseDiagnostics {
    pub features_in: usize,
    pub features_clipped: usize,
    /// Features entirely outside the boundary
    pub features_outside: usize,
    pub skipped: Vec<SkippedFeature>,
    /// Sum of per-category areas; counts cross-category overlaps twice
    pub total_area_km2: f64,
    pub total_pct: f64,
    /// Area covered by at least one category
    pub covered_km2: f64,
    /// Boundary area not covered by any category
    pub residual_km2: f64,
    pub residual_pct: f64,
    /// Area claimed by more than one category
    pub overlap_km2: f64,
    pub exceeds_100: bool,
}

/// Clips a land-use layer to the boundary and dissolves it by category.
#[derive(Debug, Clone, Default)]
pub struct LandUseAggregator {
    policy: CategoryPolicy,
    validator: GeometryValidator,
}

impl LandUseAggregator {
    pub fn new(policy: CategoryPolicy) -> Self {
        Self {
            policy,
            validator: GeometryValidator::new(),
        }
    }

    pub fn aggregate(
        &self,
        features: &[Projected<LandUseFeature>],
        boundary: &BoundaryRecord,
    ) -> Result<LandUseReport, Error> {
        if features.is_empty() {
            return Err(Error::EmptyInput { layer: "landuse" });
        }
        let crs = boundary.analysis_crs();
        let clip = boundary.geometry();
        let clip_rect = clip.extent();

        info!("Aggregating {} land-use features", features.len());

        let mut diagnostics = LandUseDiagnostics {
            features_in: features.len(),
            ..Default::default()
        };
        let mut groups: BTreeMap<String, (Vec<Polygon<f64>>, usize)> = BTreeMap::new();

        for (index, feature) in features.iter().enumerate() {
            if feature.crs() != crs {
                return Err(CrsError::Mismatch {
                    expected: crs,
                    found: feature.crs(),
                }
                .into());
            }
            let category = self.policy.resolve(feature.category.as_deref());
            let feature_ref = FeatureRef::locate(&feature.geometry)
                .with_index(index)
                .with_category(Some(&category));

            // Step 1: repair, then clip
            let geometry = match self.validator.validate(&feature.geometry) {
                Ok((geometry, _)) => geometry,
                Err(e) => {
                    let e = e.with_feature(feature_ref.clone());
                    warn!("Skipping land-use feature: {}", e);
                    diagnostics.skipped.push(SkippedFeature {
                        feature: feature_ref,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let overlaps_extent = match (geometry.bounding_rect(), clip_rect) {
                (Some(a), Some(b)) => a.intersects(&b),
                _ => false,
            };
            let clipped = if overlaps_extent {
                geometry.intersection(clip.get())
            } else {
                MultiPolygon::new(vec![])
            };
            if clipped.0.is_empty() {
                debug!("Land-use {} lies outside the boundary", feature_ref);
                diagnostics.features_outside += 1;
                continue;
            }

            diagnostics.features_clipped += 1;
            let entry = groups.entry(category).or_default();
            entry.0.extend(clipped.0);
            entry.1 += 1;
        }

        // Steps 2 and 3: dissolve same-category geometries before measuring,
        // so overlaps within a category count once.
        let boundary_km2 = boundary.area_km2();
        let mut summaries = Vec::with_capacity(groups.len());
        let mut dissolved = Vec::with_capacity(groups.len());
        for (category, (parts, count)) in groups {
            let merged = Projected::new(unary_union(parts.iter()), crs);
            let area_km2 = merged.area_km2();
            summaries.push(LandUseSummary {
                category: category.clone(),
                area_km2,
                pct_of_total: area_km2 / boundary_km2 * 100.0,
                features: count,
            });
            dissolved.push(DissolvedCategory {
                category,
                geometry: merged,
            });
        }

        let covered = Projected::new(
            unary_union(dissolved.iter().flat_map(|d| d.geometry.get().0.iter())),
            crs,
        );
        diagnostics.total_area_km2 = summaries.iter().map(|s| s.area_km2).sum();
        diagnostics.total_pct = summaries.iter().map(|s| s.pct_of_total).sum();
        diagnostics.covered_km2 = covered.area_km2();
        diagnostics.overlap_km2 = (diagnostics.total_area_km2 - diagnostics.covered_km2).max(0.0);
        diagnostics.residual_km2 = (boundary_km2 - diagnostics.covered_km2).max(0.0);
        diagnostics.residual_pct = diagnostics.residual_km2 / boundary_km2 * 100.0;
        diagnostics.exceeds_100 = diagnostics.total_pct > 100.0 + PCT_TOLERANCE;

        if diagnostics.exceeds_100 {
            warn!(
                "Land-use categories overlap: shares sum to {:.3}% ({:.4} km² claimed twice)",
                diagnostics.total_pct, diagnostics.overlap_km2
            );
        }
        info!(
            "Land use: {} categories, {} clipped, {} outside, {} skipped",
            summaries.len(),
            diagnostics.features_clipped,
            diagnostics.features_outside,
            diagnostics.skipped.len()
        );

        Ok(LandUseReport {
            summaries,
            dissolved,
            diagnostics,
        })
    }
}
