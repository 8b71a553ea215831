//! Canonical boundary production: validate, project, measure.

use geo::{Area, CoordsIter, Geometry, MultiPolygon, Polygon, SimplifyVwPreserve};
use tracing::{info, warn};

use crate::error::{BoundaryError, Error, GeometryError};
use crate::geometry::{CrsProjector, GeometryValidator};
use crate::models::{BoundaryMetadata, BoundaryRecord, BoundarySource, VisualizationGeometry};

/// Produces the [`BoundaryRecord`] every other stage clips against.
pub struct BoundaryProcessor<'a> {
    projector: &'a CrsProjector,
    validator: GeometryValidator,
    simplify_tolerance_m: f64,
}

impl<'a> BoundaryProcessor<'a> {
    pub fn new(projector: &'a CrsProjector, simplify_tolerance_m: f64) -> Self {
        Self {
            projector,
            validator: GeometryValidator::new(),
            simplify_tolerance_m,
        }
    }

    pub fn acquire_boundary(&self, source: &BoundarySource) -> Result<BoundaryRecord, BoundaryError> {
        let source_id = source.source_id.clone();
        info!("Processing boundary {}", source_id);

        let raw = polygonal(&source.geometry).ok_or_else(|| BoundaryError::NotPolygonal {
            source_id: source_id.clone(),
            kind: geometry_kind(&source.geometry).to_string(),
        })?;
        if raw.0.is_empty() || raw.coords_count() == 0 {
            return Err(BoundaryError::Empty { source_id });
        }

        let (repaired, validity) =
            self.validator
                .validate(&raw)
                .map_err(|source| BoundaryError::Repair {
                    source_id: source_id.clone(),
                    source,
                })?;
        if validity.repaired {
            warn!(
                "Boundary {} repaired ({} defect(s))",
                source_id,
                validity.defects.len()
            );
        }

        let geometry = self
            .projector
            .to_analysis(&repaired, source.crs)
            .map_err(|e| stage_error(&source_id, e))?;
        let area_km2 = geometry.area_km2();

        let visualization = if self.simplify_tolerance_m > 0.0 {
            // Topology-preserving: rings keep at least four vertices and never
            // cross each other, so holes survive. The threshold is an area.
            let threshold = self.simplify_tolerance_m * self.simplify_tolerance_m;
            let simplified = geometry.derive(|g| g.simplify_vw_preserve(&threshold));
            match self.projector.to_storage(&simplified, source.crs) {
                Ok(geometry) => Some(VisualizationGeometry {
                    geometry,
                    crs: source.crs,
                    tolerance_m: self.simplify_tolerance_m,
                }),
                Err(e) => {
                    warn!("Skipping visualization copy of {}: {}", source_id, e);
                    None
                }
            }
        } else {
            None
        };

        info!(
            "Boundary {}: {:.3} km² in {} ({} part(s), {} hole(s))",
            source_id, area_km2, self.projector.analysis_crs(), validity.polygons, validity.holes
        );

        let metadata = BoundaryMetadata {
            source_id,
            admin_level: source.admin_level,
            name: source.name.clone(),
            source_crs: source.crs,
            analysis_crs: self.projector.analysis_crs(),
            area_km2,
            validity,
        };
        Ok(BoundaryRecord::new(metadata, geometry, visualization))
    }
}

impl BoundaryRecord {
    /// Largest part of the boundary, in its source CRS, for collaborators that
    /// fetch features by polygon. Parts are ranked by their projected area.
    pub fn query_polygon(&self, projector: &CrsProjector) -> Result<Polygon<f64>, Error> {
        let largest = self.geometry().derive(|mp| {
            let part = mp
                .0
                .iter()
                .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
                .cloned();
            MultiPolygon::new(part.into_iter().collect())
        });
        let storage = projector.to_storage(&largest, self.source_crs())?;
        storage.0.into_iter().next().ok_or_else(|| {
            GeometryError::Empty {
                feature: Default::default(),
            }
            .into()
        })
    }
}

fn stage_error(source_id: &str, err: Error) -> BoundaryError {
    match err {
        Error::Geometry(source) => BoundaryError::Repair {
            source_id: source_id.to_string(),
            source,
        },
        Error::Crs(source) => BoundaryError::Projection {
            source_id: source_id.to_string(),
            source,
        },
        Error::Boundary(e) => e,
        other => BoundaryError::Projection {
            source_id: source_id.to_string(),
            source: crate::error::CrsError::Unsupported(other.to_string()),
        },
    }
}

fn polygonal(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Some(MultiPolygon::new(vec![t.to_polygon()])),
        _ => None,
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
