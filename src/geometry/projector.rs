//! Reprojection between the storage CRS and the analysis CRS.

use geo::{Coord, MapCoords, MultiPolygon, Point, Validation};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use tracing::debug;

use super::{GeometryValidator, Projected};
use crate::error::{CrsError, Error, FeatureRef};
use crate::models::{Crs, LandUseFeature, PointFeature};

/// Anything whose coordinates can be reprojected.
///
/// Areal values are re-validated after reprojection so a transformation that
/// introduces a self-intersection is repaired before anyone measures it.
pub trait Reproject: Sized {
    fn reproject(&self, transformer: &Transformer) -> Result<Self, Error>;
}

/// A source/target projection pair, built once per layer.
pub struct Transformer {
    from: Crs,
    to: Crs,
    source: Proj,
    target: Proj,
    validator: GeometryValidator,
}

impl Transformer {
    fn new(from: Crs, to: Crs, validator: GeometryValidator) -> Result<Self, CrsError> {
        Ok(Self {
            from,
            to,
            source: build_proj(from)?,
            target: build_proj(to)?,
            validator,
        })
    }

    fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Transform one coordinate. Geographic coordinates go in and come out in degrees.
    pub fn coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, CrsError> {
        if self.is_identity() {
            return Ok(coord);
        }
        let mut point = if self.from.is_geographic() {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        transform(&self.source, &self.target, &mut point).map_err(|e| CrsError::Transform {
            from: self.from,
            to: self.to,
            x: coord.x,
            y: coord.y,
            reason: format!("{e:?}"),
        })?;
        let (x, y) = if self.to.is_geographic() {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if !x.is_finite() || !y.is_finite() {
            return Err(CrsError::Transform {
                from: self.from,
                to: self.to,
                x: coord.x,
                y: coord.y,
                reason: "non-finite result".to_string(),
            });
        }
        Ok(Coord { x, y })
    }

    pub fn multi_polygon(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, Error> {
        let projected = geometry.try_map_coords(|c| self.coord(c))?;
        if self.is_identity() || projected.is_valid() {
            return Ok(projected);
        }
        debug!("Reprojected geometry {} is invalid, repairing", FeatureRef::locate(&projected));
        let (repaired, _) = self.validator.validate(&projected)?;
        Ok(repaired)
    }
}

fn build_proj(crs: Crs) -> Result<Proj, CrsError> {
    let definition = crs.proj4();
    Proj::from_proj_string(&definition).map_err(|e| CrsError::Definition {
        crs,
        reason: format!("{e:?}"),
    })
}

impl Reproject for MultiPolygon<f64> {
    fn reproject(&self, transformer: &Transformer) -> Result<Self, Error> {
        transformer.multi_polygon(self)
    }
}

impl Reproject for Point<f64> {
    fn reproject(&self, transformer: &Transformer) -> Result<Self, Error> {
        Ok(Point::from(transformer.coord(self.0)?))
    }
}

impl Reproject for LandUseFeature {
    fn reproject(&self, transformer: &Transformer) -> Result<Self, Error> {
        let geometry = transformer.multi_polygon(&self.geometry).map_err(|e| {
            annotate(e, FeatureRef::locate(&self.geometry).with_category(self.category.as_deref()))
        })?;
        Ok(Self {
            geometry,
            category: self.category.clone(),
            raw_attributes: self.raw_attributes.clone(),
        })
    }
}

impl Reproject for PointFeature {
    fn reproject(&self, transformer: &Transformer) -> Result<Self, Error> {
        Ok(Self {
            geometry: self.geometry.reproject(transformer)?,
            category: self.category.clone(),
        })
    }
}

fn annotate(err: Error, feature: FeatureRef) -> Error {
    match err {
        Error::Geometry(e) => Error::Geometry(e.with_feature(feature)),
        other => other,
    }
}

/// Converts values between a storage CRS and the run's analysis CRS.
///
/// The analysis CRS is fixed when the projector is built and must be
/// projected; it is passed explicitly to every component that measures.
#[derive(Debug, Clone)]
pub struct CrsProjector {
    analysis: Crs,
    validator: GeometryValidator,
}

impl CrsProjector {
    pub fn new(analysis: Crs) -> Result<Self, CrsError> {
        if analysis.is_geographic() {
            return Err(CrsError::NotProjected(analysis));
        }
        // Fail early on a definition proj4rs cannot parse.
        build_proj(analysis)?;
        Ok(Self {
            analysis,
            validator: GeometryValidator::new(),
        })
    }

    pub fn analysis_crs(&self) -> Crs {
        self.analysis
    }

    pub fn to_analysis<T: Reproject>(&self, value: &T, source: Crs) -> Result<Projected<T>, Error> {
        let transformer = Transformer::new(source, self.analysis, self.validator)?;
        Ok(Projected::new(value.reproject(&transformer)?, self.analysis))
    }

    /// Project a whole layer, building the transformation once.
    pub fn to_analysis_all<T: Reproject>(
        &self,
        values: &[T],
        source: Crs,
    ) -> Result<Vec<Result<Projected<T>, Error>>, CrsError> {
        let transformer = Transformer::new(source, self.analysis, self.validator)?;
        Ok(values
            .iter()
            .map(|value| {
                value
                    .reproject(&transformer)
                    .map(|v| Projected::new(v, self.analysis))
            })
            .collect())
    }

    pub fn to_storage<T: Reproject>(&self, value: &Projected<T>, target: Crs) -> Result<T, Error> {
        if value.crs() != self.analysis {
            return Err(CrsError::Mismatch {
                expected: self.analysis,
                found: value.crs(),
            }
            .into());
        }
        let transformer = Transformer::new(self.analysis, target, self.validator)?;
        value.get().reproject(&transformer)
    }

    /// Check that a projected value belongs to this run.
    pub fn ensure_analysis<T>(&self, value: &Projected<T>) -> Result<(), CrsError> {
        if value.crs() == self.analysis {
            Ok(())
        } else {
            Err(CrsError::Mismatch {
                expected: self.analysis,
                found: value.crs(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area, CoordsIter};

    const UTM_20S: Crs = Crs::Utm { zone: 20, south: true };

    fn cordoba_block() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: -64.20, y: -31.44),
            (x: -64.16, y: -31.44),
            (x: -64.16, y: -31.40),
            (x: -64.20, y: -31.40),
        ]])
    }

    #[test]
    fn test_geographic_analysis_rejected() {
        assert!(matches!(
            CrsProjector::new(Crs::Wgs84),
            Err(CrsError::NotProjected(Crs::Wgs84))
        ));
    }

    #[test]
    fn test_round_trip_within_tolerance() {
        let projector = CrsProjector::new(UTM_20S).unwrap();
        let original = cordoba_block();

        let projected = projector.to_analysis(&original, Crs::Wgs84).unwrap();
        assert_eq!(projected.crs(), UTM_20S);
        let back = projector.to_storage(&projected, Crs::Wgs84).unwrap();

        for (a, b) in original.coords_iter().zip(back.coords_iter()) {
            assert!((a.x - b.x).abs() < 1e-7, "{a:?} vs {b:?}");
            assert!((a.y - b.y).abs() < 1e-7, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_projected_coordinates_are_metric() {
        let projector = CrsProjector::new(UTM_20S).unwrap();
        let projected = projector.to_analysis(&cordoba_block(), Crs::Wgs84).unwrap();

        // 0.04° x 0.04° at ~31°S is roughly 3.8 km x 4.4 km.
        let area = projected.area_km2();
        assert!(area > 15.0 && area < 18.5, "area {area}");
        // UTM southern false northing keeps y well above zero.
        assert!(projected.get().coords_iter().all(|c| c.y > 6_000_000.0));
    }

    #[test]
    fn test_identity_projection() {
        let projector = CrsProjector::new(UTM_20S).unwrap();
        let square = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ]]);
        let projected = projector.to_analysis(&square, UTM_20S).unwrap();
        assert_eq!(projected.get(), &square);
        assert!((projected.get().unsigned_area() - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_storage_rejects_foreign_crs() {
        let projector = CrsProjector::new(UTM_20S).unwrap();
        let other = CrsProjector::new(Crs::Utm { zone: 21, south: true }).unwrap();
        let projected = other.to_analysis(&Point::new(-60.0, -31.0), Crs::Wgs84).unwrap();
        assert!(projector.ensure_analysis(&projected).is_err());
        assert!(matches!(
            projector.to_storage(&projected, Crs::Wgs84),
            Err(Error::Crs(CrsError::Mismatch { .. }))
        ));
    }
}
