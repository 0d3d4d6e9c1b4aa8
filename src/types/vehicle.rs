//! Vehicle fleet types

use serde::{Deserialize, Serialize};

use super::customer::Coordinates;

/// Vehicle class tag.
///
/// A closed set declared by the fleet configuration. The tag itself carries no
/// behavior; parameters come from the associated [`VehicleConfig`]. The Center
/// class is the one privileged inside the downtown zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VehicleClass {
    Internal,
    Center,
    External,
    Special,
    Regional,
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VehicleClass::Internal => "INTERNAL",
            VehicleClass::Center => "CENTER",
            VehicleClass::External => "EXTERNAL",
            VehicleClass::Special => "SPECIAL",
            VehicleClass::Regional => "REGIONAL",
        };
        f.write_str(name)
    }
}

/// Per-class vehicle parameters.
///
/// One config describes `count` identical physical vehicles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleConfig {
    pub class: VehicleClass,
    /// Capacity in stack units
    pub capacity: u32,
    /// Number of identical vehicles of this class
    pub count: u32,
    /// Maximum route distance in kilometers, unlimited when absent
    #[serde(default)]
    pub max_distance_km: Option<f64>,
    /// Maximum working time in minutes
    #[serde(default = "default_max_time_minutes")]
    pub max_time_minutes: u32,
    /// Service time spent at each stop, minutes
    #[serde(default)]
    pub service_time_minutes: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Operational depot the route starts and ends at
    pub start_location: Coordinates,
    /// Cap on customers per route, unlimited when absent
    #[serde(default)]
    pub max_customers_per_route: Option<u32>,
    /// Route start, minutes after midnight
    #[serde(default)]
    pub start_time_minutes: u32,
    /// Depot used for post-optimization; defaults to the start location
    #[serde(default)]
    pub tsp_depot_location: Option<Coordinates>,
}

fn default_max_time_minutes() -> u32 {
    1200
}

fn default_enabled() -> bool {
    true
}

impl VehicleConfig {
    /// The depot the TSP reoptimizer runs from.
    pub fn tsp_depot(&self) -> Coordinates {
        self.tsp_depot_location.unwrap_or(self.start_location)
    }

    /// Whether post-optimization uses a depot distinct from the route start.
    pub fn has_distinct_tsp_depot(&self) -> bool {
        match self.tsp_depot_location {
            Some(depot) => {
                (depot.lat - self.start_location.lat).abs() > 1e-9
                    || (depot.lng - self.start_location.lng).abs() > 1e-9
            }
            None => false,
        }
    }
}

/// Largest capacity across enabled vehicle classes, in stack units.
pub fn max_enabled_capacity(fleet: &[VehicleConfig]) -> u32 {
    fleet
        .iter()
        .filter(|v| v.enabled)
        .map(|v| v.capacity)
        .max()
        .unwrap_or(0)
}

/// Total carrying capacity of the enabled fleet, in stack units.
pub fn total_enabled_capacity(fleet: &[VehicleConfig]) -> u64 {
    fleet
        .iter()
        .filter(|v| v.enabled)
        .map(|v| v.capacity as u64 * v.count as u64)
        .sum()
}
