//! Geographic calculations

use serde::{Deserialize, Serialize};

use crate::types::Coordinates;

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Calculate Haversine distance between two points in kilometers
pub fn haversine_km(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Check that coordinates are plausible.
///
/// Rejects values outside valid ranges and the exact 0/0 point, which in
/// practice only appears as a failed-geocoding artifact.
pub fn in_bounds(coords: &Coordinates) -> bool {
    if coords.lat.abs() > 90.0 || coords.lng.abs() > 180.0 {
        return false;
    }
    !(coords.lat == 0.0 && coords.lng == 0.0)
}

/// The downtown exclusion zone.
///
/// A customer is inside the zone iff the great-circle distance from its
/// coordinates to the zone center is at most the radius.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CenterZone {
    pub center: Coordinates,
    pub radius_km: f64,
}

impl CenterZone {
    pub fn new(center: Coordinates, radius_km: f64) -> Self {
        Self { center, radius_km }
    }

    pub fn contains(&self, point: &Coordinates) -> bool {
        haversine_km(&self.center, point) <= self.radius_km
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sofia() -> Coordinates {
        Coordinates::new(42.6977, 23.3219)
    }

    fn plovdiv() -> Coordinates {
        Coordinates::new(42.1354, 24.7453)
    }

    #[test]
    fn test_haversine_sofia_plovdiv() {
        let distance = haversine_km(&sofia(), &plovdiv());

        // Sofia to Plovdiv is approximately 133 km
        assert!((distance - 133.0).abs() < 5.0);
    }

    #[test]
    fn test_haversine_same_point() {
        let point = sofia();
        let distance = haversine_km(&point, &point);
        assert!(distance.abs() < 0.001);
    }

    #[test]
    fn test_haversine_symmetry() {
        let d1 = haversine_km(&sofia(), &plovdiv());
        let d2 = haversine_km(&plovdiv(), &sofia());
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn test_in_bounds() {
        assert!(in_bounds(&sofia()));
        assert!(!in_bounds(&Coordinates::new(91.0, 23.3)));
        assert!(!in_bounds(&Coordinates::new(42.7, 181.0)));
        assert!(!in_bounds(&Coordinates::new(0.0, 0.0)));
    }

    #[test]
    fn test_center_zone_membership() {
        let zone = CenterZone::new(sofia(), 1.8);

        // ~700 m north of the center
        let near = Coordinates::new(42.704, 23.3219);
        assert!(zone.contains(&near));

        // Plovdiv is far outside
        assert!(!zone.contains(&plovdiv()));
    }

    #[test]
    fn test_center_zone_boundary() {
        let zone = CenterZone::new(sofia(), 1.8);

        // ~1.6 km away, just inside
        let inside = Coordinates::new(42.712, 23.3219);
        assert!(zone.contains(&inside));

        // ~2.2 km away, just outside
        let outside = Coordinates::new(42.7175, 23.3219);
        assert!(!zone.contains(&outside));
    }
}
