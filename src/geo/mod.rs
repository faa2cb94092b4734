//! Spatial utilities: great-circle distance and ETA.
//!
//! Pure functions with no state. Inputs outside the valid latitude/longitude
//! ranges fail with `InvalidCoordinate` instead of producing NaN.

pub mod geocode;
pub mod navigation;


use crate::error::{DispatchError, DispatchResult};
use serde::{Deserialize, Serialize};

pub use geocode::{NominatimGeocoder, NullGeocoder, ReverseGeocoder, UNKNOWN_ADDRESS};
pub use navigation::{deep_link, NavigationApp};

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Assumed average effective speed of an agent in city traffic
pub const DEFAULT_SPEED_KMH: f64 = 30.0;

/// WGS84 latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check ranges: latitude in [-90, 90], longitude in [-180, 180]
    pub fn validate(&self) -> DispatchResult<()> {
        let lat_ok = self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude);
        let lon_ok = self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude);
        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(DispatchError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// Great-circle distance between two coordinates in kilometers (haversine).
///
/// The pair is put in a canonical order before computing so that
/// `distance(a, b)` and `distance(b, a)` are bit-for-bit identical.
pub fn distance(a: Coordinate, b: Coordinate) -> DispatchResult<f64> {
    a.validate()?;
    b.validate()?;

    let (p, q) = if (a.latitude, a.longitude) <= (b.latitude, b.longitude) {
        (a, b)
    } else {
        (b, a)
    };

    let lat1 = p.latitude.to_radians();
    let lat2 = q.latitude.to_radians();
    let dlat = (q.latitude - p.latitude).to_radians();
    let dlon = (q.longitude - p.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards against h drifting just above 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    Ok(EARTH_RADIUS_KM * c)
}

/// Minutes to cover `distance_km` at the default 30 km/h, rounded to the nearest minute
pub fn eta(distance_km: f64) -> u32 {
    eta_at(distance_km, DEFAULT_SPEED_KMH)
}

/// Minutes to cover `distance_km` at `speed_kmh`, rounded to the nearest minute
pub fn eta_at(distance_km: f64, speed_kmh: f64) -> u32 {
    if !distance_km.is_finite() || distance_km <= 0.0 || !speed_kmh.is_finite() || speed_kmh <= 0.0
    {
        return 0;
    }
    (distance_km / speed_kmh * 60.0).round() as u32
}

/// Round a distance to the 0.1 km display resolution
pub fn round_km(distance_km: f64) -> f64 {
    (distance_km * 10.0).round() / 10.0
}
