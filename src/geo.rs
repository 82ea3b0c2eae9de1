//! Great-circle distance and geofence checks.

use crate::types::Coordinates;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two coordinates, in meters.
pub fn distance_meters(a: Coordinates, b: Coordinates) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// True when `a` lies within `radius_m` meters of `b` (boundary inclusive).
#[inline]
pub fn within_radius(a: Coordinates, b: Coordinates, radius_m: f64) -> bool {
    distance_meters(a, b) <= radius_m
}
