//! # Geo Math
//!
//! Great-circle distance and the heuristic delivery ETA. Everything here is pure;
//! coordinates are validated at the protocol boundary before they reach these functions.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average courier speed assumed by [`eta_minutes`].
pub const AVERAGE_SPEED_KMH: f64 = 25.0;

/// Lowest ETA ever reported, regardless of distance.
pub const MIN_ETA_MINUTES: u32 = 2;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and inside their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Haversine distance between two points, in kilometers.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Trip time at [`AVERAGE_SPEED_KMH`], rounded up and floored at [`MIN_ETA_MINUTES`].
///
/// A courier standing on the customer's doorstep still reports the floor; "0 minutes"
/// reads as a broken state on the customer's screen.
pub fn eta_minutes(distance_km: f64) -> u32 {
    let minutes = (distance_km / AVERAGE_SPEED_KMH * 60.0).ceil();
    if minutes.is_nan() || minutes <= MIN_ETA_MINUTES as f64 {
        return MIN_ETA_MINUTES;
    }
    minutes as u32
}

/// Distance and ETA for a courier heading to a customer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripMetrics {
    pub distance_km: f64,
    pub eta_minutes: u32,
}

impl TripMetrics {
    pub fn between(courier: GeoPoint, customer: GeoPoint) -> Self {
        let distance_km = distance_km(courier, customer);
        Self {
            distance_km,
            eta_minutes: eta_minutes(distance_km),
        }
    }
}
