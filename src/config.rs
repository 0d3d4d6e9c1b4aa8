//! Configuration management

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::services::geo::{self, CenterZone};
use crate::types::{Coordinates, VehicleClass, VehicleConfig};

/// Application configuration
///
/// Loaded from a JSON file, then overlaid with environment variables for the
/// deployment-specific endpoints and paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Vehicle classes available for planning
    pub fleet: Vec<VehicleConfig>,

    /// Depot coordinates
    pub depot: DepotSettings,

    /// Downtown zone steering
    #[serde(default)]
    pub center_zone: Option<CenterZoneSettings>,

    /// Solver budgets and toggles
    #[serde(default)]
    pub solver: SolverSettings,

    /// Distance-matrix service endpoints and tuning
    #[serde(default)]
    pub matrix: MatrixSettings,

    /// Matrix cache location and TTL
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Depot coordinates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepotSettings {
    /// Main depot; index 0 of every distance matrix
    pub main: Coordinates,
}

/// Center-zone steering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CenterZoneSettings {
    pub center: Coordinates,
    #[serde(default = "default_zone_radius_km")]
    pub radius_km: f64,
    /// Arc-cost multiplier for the Center class inside the zone
    #[serde(default = "default_center_discount")]
    pub center_class_discount: f64,
    /// Flat arc-cost penalty for every other class entering the zone
    #[serde(default = "default_other_penalty")]
    pub other_class_penalty: i64,
    /// Also shape arcs leaving the zone, not only those arriving
    #[serde(default)]
    pub symmetric: bool,
}

fn default_zone_radius_km() -> f64 {
    1.8
}

fn default_center_discount() -> f64 {
    0.10
}

fn default_other_penalty() -> i64 {
    40_000
}

impl CenterZoneSettings {
    pub fn zone(&self) -> CenterZone {
        CenterZone::new(self.center, self.radius_km)
    }
}

/// Solver budgets and toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverSettings {
    /// Wall-clock budget per strategy worker, seconds
    #[serde(default = "default_time_limit")]
    pub time_limit_seconds: u64,
    /// Worker count; -1 means one per core, minus one
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: i32,
    /// Allow dropping customers instead of failing the solve
    #[serde(default = "default_true")]
    pub allow_customer_skipping: bool,
    /// Objective penalty per dropped customer, distance units
    #[serde(default = "default_skip_penalty")]
    pub skip_penalty: i64,
    /// Re-order each route from its class's TSP depot after the race
    #[serde(default = "default_true")]
    pub enable_tsp_reoptimization: bool,
    /// Per-customer policy ceiling in stack units
    #[serde(default = "default_max_customer_volume")]
    pub max_customer_volume: f64,
}

fn default_time_limit() -> u64 {
    360
}

fn default_parallel_workers() -> i32 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_skip_penalty() -> i64 {
    45_000
}

fn default_max_customer_volume() -> f64 {
    120.0
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            time_limit_seconds: default_time_limit(),
            parallel_workers: default_parallel_workers(),
            allow_customer_skipping: true,
            skip_penalty: default_skip_penalty(),
            enable_tsp_reoptimization: true,
            max_customer_volume: default_max_customer_volume(),
        }
    }
}

impl SolverSettings {
    /// Resolve the configured worker count against the machine.
    pub fn worker_count(&self) -> usize {
        if self.parallel_workers > 0 {
            return self.parallel_workers as usize;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.saturating_sub(1).max(1)
    }
}

/// Distance-matrix service endpoints and tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSettings {
    /// Local routing server, fast path
    #[serde(default)]
    pub primary_endpoint: Option<String>,
    /// Off-site fallback, queried politely
    #[serde(default = "default_fallback_endpoint")]
    pub fallback_endpoint: Option<String>,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Largest sub-matrix edge for tiled table requests
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Straight-line to road-distance inflation for the last-resort tier
    #[serde(default = "default_inflation")]
    pub haversine_inflation: f64,
    /// Assumed speed for last-resort durations, km/h
    #[serde(default = "default_speed_kmh")]
    pub haversine_speed_kmh: f64,
}

fn default_fallback_endpoint() -> Option<String> {
    Some("https://router.project-osrm.org".to_string())
}

fn default_profile() -> String {
    "driving".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    80
}

fn default_inflation() -> f64 {
    1.3
}

fn default_speed_kmh() -> f64 {
    40.0
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            primary_endpoint: None,
            fallback_endpoint: default_fallback_endpoint(),
            profile: default_profile(),
            timeout_seconds: default_timeout_seconds(),
            chunk_size: default_chunk_size(),
            haversine_inflation: default_inflation(),
            haversine_speed_kmh: default_speed_kmh(),
        }
    }
}

/// Matrix cache location and TTL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    #[serde(default = "default_cache_dir")]
    pub directory: String,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_cache_dir() -> String {
    "cache/matrices".to_string()
}

fn default_ttl_seconds() -> u64 {
    86_400
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            ttl_seconds: default_ttl_seconds(),
            enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Overlay deployment-specific values from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("ROUTING_URL") {
            if !url.is_empty() {
                self.matrix.primary_endpoint = Some(url);
            }
        }
        if let Ok(url) = std::env::var("ROUTING_FALLBACK_URL") {
            self.matrix.fallback_endpoint = if url.is_empty() { None } else { Some(url) };
        }
        if let Ok(dir) = std::env::var("CACHE_DIR") {
            if !dir.is_empty() {
                self.cache.directory = dir;
            }
        }
    }

    /// Reject configurations the solver cannot work with.
    pub fn validate(&self) -> Result<(), PlanError> {
        if !geo::in_bounds(&self.depot.main) {
            return Err(PlanError::InvalidInput(
                "main depot coordinates are out of bounds".to_string(),
            ));
        }

        let enabled: Vec<&VehicleConfig> = self.fleet.iter().filter(|v| v.enabled).collect();
        if enabled.is_empty() {
            return Err(PlanError::InvalidInput(
                "fleet has no enabled vehicle class".to_string(),
            ));
        }

        for vehicle in &enabled {
            if vehicle.capacity < 1 {
                return Err(PlanError::InvalidInput(format!(
                    "vehicle class {} is enabled with capacity {}",
                    vehicle.class, vehicle.capacity
                )));
            }
            if vehicle.count < 1 {
                return Err(PlanError::InvalidInput(format!(
                    "vehicle class {} is enabled with count {}",
                    vehicle.class, vehicle.count
                )));
            }
            if vehicle.max_time_minutes == 0 {
                return Err(PlanError::InvalidInput(format!(
                    "vehicle class {} has zero working time",
                    vehicle.class
                )));
            }
            if !geo::in_bounds(&vehicle.start_location) {
                return Err(PlanError::InvalidInput(format!(
                    "vehicle class {} start location is out of bounds",
                    vehicle.class
                )));
            }
            if let Some(depot) = vehicle.tsp_depot_location {
                if !geo::in_bounds(&depot) {
                    return Err(PlanError::InvalidInput(format!(
                        "vehicle class {} TSP depot is out of bounds",
                        vehicle.class
                    )));
                }
            }
        }

        let mut seen_classes: Vec<VehicleClass> = Vec::new();
        for vehicle in &self.fleet {
            if seen_classes.contains(&vehicle.class) {
                return Err(PlanError::InvalidInput(format!(
                    "vehicle class {} is declared twice",
                    vehicle.class
                )));
            }
            seen_classes.push(vehicle.class);
        }

        if self.solver.time_limit_seconds == 0 {
            return Err(PlanError::InvalidInput(
                "solver time limit must be positive".to_string(),
            ));
        }
        if self.matrix.chunk_size == 0 {
            return Err(PlanError::InvalidInput(
                "matrix chunk size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Alternate depots referenced by any class's TSP depot, main depot excluded.
    ///
    /// Every returned depot participates in the distance matrix so that
    /// post-optimized routes can be re-costed from real road legs.
    pub fn alternate_depots(&self) -> Vec<Coordinates> {
        let mut depots: Vec<Coordinates> = Vec::new();
        for vehicle in self.fleet.iter().filter(|v| v.enabled) {
            for candidate in [vehicle.start_location, vehicle.tsp_depot()] {
                let is_main = (candidate.lat - self.depot.main.lat).abs() < 1e-9
                    && (candidate.lng - self.depot.main.lng).abs() < 1e-9;
                let seen = depots.iter().any(|d| {
                    (d.lat - candidate.lat).abs() < 1e-9 && (d.lng - candidate.lng).abs() < 1e-9
                });
                if !is_main && !seen {
                    depots.push(candidate);
                }
            }
        }
        depots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            fleet: vec![VehicleConfig {
                class: VehicleClass::Internal,
                capacity: 30,
                count: 2,
                max_distance_km: None,
                max_time_minutes: 480,
                service_time_minutes: 8,
                enabled: true,
                start_location: Coordinates::new(42.70, 23.32),
                max_customers_per_route: None,
                start_time_minutes: 480,
                tsp_depot_location: None,
            }],
            depot: DepotSettings {
                main: Coordinates::new(42.70, 23.32),
            },
            center_zone: None,
            solver: SolverSettings::default(),
            matrix: MatrixSettings::default(),
            cache: CacheSettings::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = base_config();
        config.fleet[0].capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_disabled_class_with_zero_count_accepted() {
        let mut config = base_config();
        config.fleet[0].count = 0;
        config.fleet[0].enabled = false;
        // No enabled class left, which is itself an error
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut config = base_config();
        let duplicate = config.fleet[0].clone();
        config.fleet.push(duplicate);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_minimal_json_parses_with_defaults() {
        let json = r#"{
            "fleet": [{
                "class": "INTERNAL",
                "capacity": 30,
                "count": 1,
                "startLocation": {"lat": 42.70, "lng": 23.32}
            }],
            "depot": {"main": {"lat": 42.70, "lng": 23.32}}
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.solver.time_limit_seconds, 360);
        assert_eq!(config.solver.skip_penalty, 45_000);
        assert_eq!(config.matrix.chunk_size, 80);
        assert!((config.matrix.haversine_inflation - 1.3).abs() < 1e-9);
        assert_eq!(config.cache.ttl_seconds, 86_400);
        assert!(config.center_zone.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_center_zone_defaults() {
        let json = r#"{"center": {"lat": 42.6977, "lng": 23.3219}}"#;
        let zone: CenterZoneSettings = serde_json::from_str(json).unwrap();
        assert!((zone.radius_km - 1.8).abs() < 1e-9);
        assert!((zone.center_class_discount - 0.10).abs() < 1e-9);
        assert_eq!(zone.other_class_penalty, 40_000);
        assert!(!zone.symmetric);
    }

    #[test]
    fn test_worker_count_explicit() {
        let mut settings = SolverSettings::default();
        settings.parallel_workers = 3;
        assert_eq!(settings.worker_count(), 3);
    }

    #[test]
    fn test_worker_count_auto_is_positive() {
        let settings = SolverSettings::default();
        assert!(settings.worker_count() >= 1);
    }

    #[test]
    fn test_alternate_depots_deduplicated() {
        let mut config = base_config();
        config.fleet[0].tsp_depot_location = Some(Coordinates::new(43.20, 23.55));
        let mut regional = config.fleet[0].clone();
        regional.class = VehicleClass::Regional;
        regional.tsp_depot_location = Some(Coordinates::new(43.20, 23.55));
        config.fleet.push(regional);

        let depots = config.alternate_depots();
        assert_eq!(depots.len(), 1);
        assert!((depots[0].lat - 43.20).abs() < 1e-9);
    }

    #[test]
    fn test_alternate_depots_excludes_main() {
        let config = base_config();
        assert!(config.alternate_depots().is_empty());
    }
}
