//! Great-circle distance on the mean Earth sphere.

use crate::constants::EARTH_RADIUS_KM;
use crate::error::GeoError;

/// Haversine distance in kilometres between two `(lat, lng)` points in degrees.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    // Clamp guards against a > 1.0 from rounding on antipodal points.
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

pub fn validate(lat: f64, lng: f64) -> Result<(), GeoError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(GeoError::InvalidLatitude(lat));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(GeoError::InvalidLongitude(lng));
    }
    Ok(())
}

/// Point `distance_km` due north of `(lat, lng)`. Used to place fixtures.
pub fn offset_north(lat: f64, lng: f64, distance_km: f64) -> (f64, f64) {
    let d_lat = (distance_km / EARTH_RADIUS_KM).to_degrees();
    (lat + d_lat, lng)
}
