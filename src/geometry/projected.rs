//! Values tagged with the analysis CRS.
//!
//! Measurement (area, centroid, extent) is only implemented on [`Projected`],
//! and a `Projected` can only be produced by the projector, so no measurement
//! can run on degree-based coordinates.

use geo::{Area, BoundingRect, Centroid, MultiPolygon, Point, Rect};
use std::ops::Deref;

use crate::models::Crs;

/// Square metres per square kilometre
pub const M2_PER_KM2: f64 = 1e6;

/// A value whose coordinates are in a projected, metric CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Projected<T> {
    value: T,
    crs: Crs,
}

impl<T> Projected<T> {
    pub(crate) fn new(value: T, crs: Crs) -> Self {
        debug_assert!(!crs.is_geographic());
        Self { value, crs }
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    /// Derive a new value in the same CRS from a borrowed one.
    pub(crate) fn derive<U>(&self, f: impl FnOnce(&T) -> U) -> Projected<U> {
        Projected::new(f(&self.value), self.crs)
    }
}

impl<T> Deref for Projected<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl Projected<MultiPolygon<f64>> {
    pub fn area_m2(&self) -> f64 {
        self.value.unsigned_area()
    }

    pub fn area_km2(&self) -> f64 {
        self.area_m2() / M2_PER_KM2
    }

    pub fn centroid(&self) -> Option<Projected<Point<f64>>> {
        self.value
            .centroid()
            .map(|point| Projected::new(point, self.crs))
    }

    pub fn extent(&self) -> Option<Rect<f64>> {
        self.value.bounding_rect()
    }
}
