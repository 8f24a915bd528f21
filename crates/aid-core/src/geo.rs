//! Geographic primitives: points, viewports and great-circle distance.

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres spanned by one degree of latitude.
pub const KM_PER_DEGREE_LAT: f64 = 111.195;

/// A WGS84 coordinate in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in [-90, 90].
    pub lat: f64,
    /// Longitude in [-180, 180].
    pub lng: f64,
}

impl GeoPoint {
    /// Build a point, rejecting non-finite or out-of-range coordinates.
    pub fn new(lat: f64, lng: f64) -> Result<Self, ValidationError> {
        let p = Self { lat, lng };
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValidationError::LatitudeOutOfRange(self.lat));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(ValidationError::LongitudeOutOfRange(self.lng));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Great-circle distance between two points in kilometres (haversine).
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// A closed longitude interval that never wraps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LngSpan {
    pub west: f64,
    pub east: f64,
}

impl LngSpan {
    pub fn contains(&self, lng: f64) -> bool {
        lng >= self.west && lng <= self.east
    }
}

/// A map viewport given by its south-west and north-east corners.
///
/// `sw.lng > ne.lng` denotes a viewport crossing the ±180° meridian; such a
/// viewport is valid and is handled as two longitude spans.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub sw: GeoPoint,
    pub ne: GeoPoint,
}

impl Viewport {
    /// Build and validate a viewport.
    pub fn new(sw: GeoPoint, ne: GeoPoint) -> Result<Self, ValidationError> {
        let v = Self { sw, ne };
        v.validate()?;
        Ok(v)
    }

    /// The whole globe.
    pub fn world() -> Self {
        Self {
            sw: GeoPoint {
                lat: -90.0,
                lng: -180.0,
            },
            ne: GeoPoint {
                lat: 90.0,
                lng: 180.0,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.sw.validate()?;
        self.ne.validate()?;
        if self.sw.lat > self.ne.lat {
            return Err(ValidationError::InvertedViewport {
                sw_lat: self.sw.lat,
                ne_lat: self.ne.lat,
            });
        }
        Ok(())
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.sw.lng > self.ne.lng
    }

    /// Longitude spans covered by this viewport; two when it wraps.
    pub fn lng_spans(&self) -> Vec<LngSpan> {
        if self.crosses_antimeridian() {
            vec![
                LngSpan {
                    west: self.sw.lng,
                    east: 180.0,
                },
                LngSpan {
                    west: -180.0,
                    east: self.ne.lng,
                },
            ]
        } else {
            vec![LngSpan {
                west: self.sw.lng,
                east: self.ne.lng,
            }]
        }
    }

    /// Closed containment test, wraparound aware.
    pub fn contains(&self, p: GeoPoint) -> bool {
        if p.lat < self.sw.lat || p.lat > self.ne.lat {
            return false;
        }
        self.lng_spans().iter().any(|s| s.contains(p.lng))
    }

    /// Longitudinal width in degrees, in [0, 360].
    pub fn lng_width(&self) -> f64 {
        if self.crosses_antimeridian() {
            360.0 - (self.sw.lng - self.ne.lng)
        } else {
            self.ne.lng - self.sw.lng
        }
    }

    /// Grow the viewport by `km` on every side.
    ///
    /// Latitude is clamped at the poles. When the longitudinal extent would
    /// cover the globe the result spans the full [-180, 180] range.
    pub fn expand_km(&self, km: f64) -> Viewport {
        if km <= 0.0 || !km.is_finite() {
            return *self;
        }
        let dlat = km / KM_PER_DEGREE_LAT;
        let south = (self.sw.lat - dlat).max(-90.0);
        let north = (self.ne.lat + dlat).min(90.0);
        let widest = south.abs().max(north.abs());
        let cos = widest.to_radians().cos();
        let dlng = if cos <= 1e-9 { 360.0 } else { dlat / cos };
        if self.lng_width() + 2.0 * dlng >= 360.0 {
            return Viewport {
                sw: GeoPoint {
                    lat: south,
                    lng: -180.0,
                },
                ne: GeoPoint {
                    lat: north,
                    lng: 180.0,
                },
            };
        }
        Viewport {
            sw: GeoPoint {
                lat: south,
                lng: wrap_lng(self.sw.lng - dlng),
            },
            ne: GeoPoint {
                lat: north,
                lng: wrap_lng(self.ne.lng + dlng),
            },
        }
    }

    /// Envelope of a circle of `radius_km` around `center`.
    pub fn around(center: GeoPoint, radius_km: f64) -> Viewport {
        Viewport {
            sw: center,
            ne: center,
        }
        .expand_km(radius_km)
    }
}

/// Normalize a longitude into [-180, 180].
pub fn wrap_lng(lng: f64) -> f64 {
    if (-180.0..=180.0).contains(&lng) {
        return lng;
    }
    let wrapped = (lng + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lng > 0.0 {
        180.0
    } else {
        wrapped
    }
}
