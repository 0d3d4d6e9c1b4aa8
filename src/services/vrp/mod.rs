//! CVRP solver
//!
//! Builds the routing model, races the strategy catalog over it, reorders
//! routes from their class TSP depots, and extracts domain routes with real
//! (unshaped) totals.

mod construct;
mod improve;
mod model;
mod race;
mod tsp;

pub use construct::FirstSolutionStrategy;
pub use improve::Metaheuristic;
pub use model::{Candidate, RouteState, RoutingModel, VehicleSpec, UNCAPPED};
pub use race::{race, StrategyPair, STRATEGY_CATALOG};
pub use tsp::{reoptimize_order, tour_length_km};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::SolverSettings;
use crate::error::PlanError;
use crate::types::{Customer, Route, VehicleConfig};

/// Budget for each route's TSP polish after the race.
const TSP_BUDGET: Duration = Duration::from_secs(2);

/// What the solver hands back to the pipeline.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    /// Non-empty routes with real distance and duration totals
    pub routes: Vec<Route>,
    /// Customers the solver chose to skip
    pub dropped: Vec<Customer>,
    /// Wall-clock time spent solving, milliseconds
    pub solve_time_ms: u64,
}

impl SolveOutcome {
    pub fn empty() -> Self {
        Self {
            routes: vec![],
            dropped: vec![],
            solve_time_ms: 0,
        }
    }
}

/// CVRP solver facade over the model, racer and TSP polish.
pub struct VrpSolver {
    settings: SolverSettings,
}

impl VrpSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    /// Solve the model and extract final routes.
    pub fn solve(
        &self,
        model: &Arc<RoutingModel>,
        fleet: &[VehicleConfig],
    ) -> Result<SolveOutcome, PlanError> {
        let started_at = Instant::now();

        if model.customer_count() == 0 {
            debug!("No customers to route, returning empty outcome");
            return Ok(SolveOutcome::empty());
        }

        info!(
            "Solving CVRP over {} customers and {} vehicles",
            model.customer_count(),
            model.vehicles().len()
        );

        let mut winner = race(model, &self.settings)?;

        if self.settings.enable_tsp_reoptimization {
            self.reoptimize_routes(model, fleet, &mut winner);
        }

        let outcome = extract(model, &winner, started_at.elapsed().as_millis() as u64);
        info!(
            "Solved: {} routes, {} dropped, {} ms",
            outcome.routes.len(),
            outcome.dropped.len(),
            outcome.solve_time_ms
        );
        Ok(outcome)
    }

    /// Re-order each route from its class's TSP depot where one is set.
    ///
    /// Purely a permutation of the winning routes; real totals are recomputed
    /// from the road matrix during extraction either way.
    fn reoptimize_routes(
        &self,
        model: &Arc<RoutingModel>,
        fleet: &[VehicleConfig],
        winner: &mut Candidate,
    ) {
        for (vehicle, route) in winner.routes.iter_mut().enumerate() {
            if route.len() < 2 {
                continue;
            }
            let spec = &model.vehicles()[vehicle];
            let config = &fleet[spec.config_index];
            if !config.has_distinct_tsp_depot() {
                continue;
            }

            let stops: Vec<_> = route
                .iter()
                .map(|&customer| {
                    model.customers()[customer]
                        .coordinates
                        .expect("routed customer has coordinates")
                })
                .collect();
            let order = reoptimize_order(&config.tsp_depot(), &stops, TSP_BUDGET);
            let reordered: Vec<usize> = order.iter().map(|&idx| route[idx]).collect();

            debug!(
                "TSP reoptimized a {} route with {} stops",
                spec.class,
                route.len()
            );
            *route = reordered;
        }
    }
}

/// Turn the winning candidate into domain routes with real totals.
fn extract(model: &RoutingModel, winner: &Candidate, solve_time_ms: u64) -> SolveOutcome {
    let mut routes = Vec::new();
    for (vehicle, sequence) in winner.routes.iter().enumerate() {
        if sequence.is_empty() {
            continue;
        }
        let spec = &model.vehicles()[vehicle];
        let (distance_m, duration_s, _) = model.route_totals(spec, sequence);
        let customers: Vec<Customer> = sequence
            .iter()
            .map(|&customer| model.customers()[customer].clone())
            .collect();
        let load = customers.iter().map(|c| c.volume).sum();

        routes.push(Route {
            vehicle_class: spec.class,
            vehicle_ordinal: spec.ordinal,
            customers,
            distance_km: distance_m as f64 / 1000.0,
            duration_minutes: duration_s as f64 / 60.0,
            load,
        });
    }

    let dropped = winner
        .dropped
        .iter()
        .map(|&customer| model.customers()[customer].clone())
        .collect();

    SolveOutcome {
        routes,
        dropped,
        solve_time_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CenterZoneSettings, SolverSettings};
    use crate::services::geo;
    use crate::services::routing::DistanceMatrix;
    use crate::types::{Coordinates, VehicleClass};

    fn depot() -> Coordinates {
        Coordinates::new(42.70, 23.32)
    }

    /// Road-like matrix from inflated straight-line distances at 40 km/h.
    fn road_matrix(locations: Vec<Coordinates>) -> Arc<DistanceMatrix> {
        let n = locations.len();
        let mut distances = vec![vec![0u64; n]; n];
        let mut durations = vec![vec![0u64; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    let km = geo::haversine_km(&locations[i], &locations[j]) * 1.3;
                    distances[i][j] = (km * 1000.0).round() as u64;
                    durations[i][j] = (km / 40.0 * 3600.0).round() as u64;
                }
            }
        }
        Arc::new(DistanceMatrix {
            locations,
            distances,
            durations,
        })
    }

    fn vehicle(class: VehicleClass, capacity: u32, count: u32) -> VehicleConfig {
        VehicleConfig {
            class,
            capacity,
            count,
            max_distance_km: None,
            max_time_minutes: 480,
            service_time_minutes: 8,
            enabled: true,
            start_location: depot(),
            max_customers_per_route: None,
            start_time_minutes: 480,
            tsp_depot_location: None,
        }
    }

    fn fast_solver() -> VrpSolver {
        VrpSolver::new(SolverSettings {
            time_limit_seconds: 1,
            parallel_workers: 2,
            ..Default::default()
        })
    }

    fn build_model(
        customers: Vec<Customer>,
        fleet: &[VehicleConfig],
        zone: Option<&CenterZoneSettings>,
    ) -> Arc<RoutingModel> {
        let mut locations = vec![depot()];
        locations.extend(customers.iter().map(|c| c.coordinates.unwrap()));
        let matrix = road_matrix(locations);
        Arc::new(
            RoutingModel::build(
                matrix,
                customers,
                fleet,
                1,
                zone,
                &SolverSettings::default(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_empty_model_solves_to_empty() {
        let fleet = vec![vehicle(VehicleClass::Internal, 30, 1)];
        let model = build_model(vec![], &fleet, None);
        let outcome = fast_solver().solve(&model, &fleet).unwrap();

        assert!(outcome.routes.is_empty());
        assert!(outcome.dropped.is_empty());
    }

    #[test]
    fn test_tiny_feasible_single_route() {
        let customers = vec![
            Customer::with_coordinates("a", "A", Coordinates::new(42.71, 23.33), 5.0),
            Customer::with_coordinates("b", "B", Coordinates::new(42.69, 23.30), 10.0),
            Customer::with_coordinates("c", "C", Coordinates::new(42.72, 23.35), 7.0),
        ];
        let fleet = vec![vehicle(VehicleClass::Internal, 30, 1)];
        let model = build_model(customers, &fleet, None);

        let outcome = fast_solver().solve(&model, &fleet).unwrap();

        assert_eq!(outcome.routes.len(), 1);
        assert!(outcome.dropped.is_empty());
        let route = &outcome.routes[0];
        assert_eq!(route.customers.len(), 3);
        assert!((route.load - 22.0).abs() < 1e-9);
        assert!(route.distance_km > 0.0);
        assert!(route.duration_minutes > 0.0);
    }

    #[test]
    fn test_capacity_split_two_routes() {
        let customers: Vec<Customer> = (0..4)
            .map(|i| {
                Customer::with_coordinates(
                    format!("c{}", i),
                    format!("C{}", i),
                    Coordinates::new(42.71 + 0.01 * i as f64, 23.33),
                    20.0,
                )
            })
            .collect();
        let fleet = vec![vehicle(VehicleClass::Internal, 50, 2)];
        let model = build_model(customers, &fleet, None);

        let outcome = fast_solver().solve(&model, &fleet).unwrap();

        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.routes.len(), 2);
        for route in &outcome.routes {
            assert!(route.load <= 50.0);
        }
        let served: usize = outcome.routes.iter().map(|r| r.customers.len()).sum();
        assert_eq!(served, 4);
    }

    #[test]
    fn test_center_zone_steering() {
        let zone_center = Coordinates::new(42.6977, 23.3219);
        let customers = vec![
            Customer::with_coordinates("downtown", "Downtown", zone_center, 20.0),
            // ~5 km east of the zone
            Customer::with_coordinates(
                "suburb",
                "Suburb",
                Coordinates::new(42.6977, 23.3829),
                20.0,
            ),
        ];
        let fleet = vec![
            vehicle(VehicleClass::Center, 30, 1),
            vehicle(VehicleClass::Internal, 30, 1),
        ];
        let zone = CenterZoneSettings {
            center: zone_center,
            radius_km: 1.8,
            center_class_discount: 0.10,
            other_class_penalty: 40_000,
            symmetric: false,
        };
        let model = build_model(customers, &fleet, Some(&zone));

        let outcome = fast_solver().solve(&model, &fleet).unwrap();

        assert_eq!(outcome.routes.len(), 2);
        let center_route = outcome
            .routes
            .iter()
            .find(|r| r.vehicle_class == VehicleClass::Center)
            .unwrap();
        let internal_route = outcome
            .routes
            .iter()
            .find(|r| r.vehicle_class == VehicleClass::Internal)
            .unwrap();

        assert_eq!(center_route.customers[0].id, "downtown");
        assert_eq!(internal_route.customers[0].id, "suburb");
    }

    #[test]
    fn test_reported_totals_match_matrix() {
        let customers = vec![
            Customer::with_coordinates("a", "A", Coordinates::new(42.71, 23.33), 5.0),
            Customer::with_coordinates("b", "B", Coordinates::new(42.72, 23.34), 5.0),
        ];
        let fleet = vec![vehicle(VehicleClass::Internal, 30, 1)];
        let model = build_model(customers, &fleet, None);

        let outcome = fast_solver().solve(&model, &fleet).unwrap();
        let route = &outcome.routes[0];

        // Re-derive the totals by walking the matrix directly
        let ids: Vec<&str> = route.customers.iter().map(|c| c.id.as_str()).collect();
        let node_of = |id: &str| match id {
            "a" => 1usize,
            "b" => 2usize,
            other => panic!("unexpected id {}", other),
        };
        let matrix = model.matrix();
        let mut expected_m = 0u64;
        let mut expected_s = 0u64;
        let mut prev = 0usize;
        for &id in &ids {
            let node = node_of(id);
            expected_m += matrix.distance(prev, node);
            expected_s += matrix.duration(prev, node) + 8 * 60;
            prev = node;
        }
        expected_m += matrix.distance(prev, 0);
        expected_s += matrix.duration(prev, 0);

        assert!((route.distance_km - expected_m as f64 / 1000.0).abs() < 1e-9);
        assert!((route.duration_minutes - expected_s as f64 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_tsp_reoptimization_orders_from_alternate_depot() {
        // A Regional vehicle starts in Sofia but polishes its tour from a
        // depot far north; three customers form a chain past that depot
        let mut regional = vehicle(VehicleClass::Regional, 30, 1);
        regional.tsp_depot_location = Some(Coordinates::new(43.20, 23.55));
        regional.max_time_minutes = 1200;
        let fleet = vec![regional];

        let customers = vec![
            Customer::with_coordinates("far", "Far", Coordinates::new(43.26, 23.56), 5.0),
            Customer::with_coordinates("near", "Near", Coordinates::new(43.21, 23.56), 5.0),
            Customer::with_coordinates("mid", "Mid", Coordinates::new(43.235, 23.56), 5.0),
        ];
        let model = build_model(customers, &fleet, None);

        let outcome = fast_solver().solve(&model, &fleet).unwrap();

        assert_eq!(outcome.routes.len(), 1);
        let ids: Vec<&str> = outcome.routes[0]
            .customers
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        // From the northern depot the chain reads near -> mid -> far
        assert_eq!(ids, vec!["near", "mid", "far"]);
        // Reported distance still comes from the road matrix, Sofia legs included
        assert!(outcome.routes[0].distance_km > 60.0);
    }

    #[test]
    fn test_solver_skipping_scenario() {
        let customers: Vec<Customer> = (0..5)
            .map(|i| {
                Customer::with_coordinates(
                    format!("c{}", i),
                    format!("C{}", i),
                    Coordinates::new(42.71 + 0.005 * i as f64, 23.33),
                    50.0,
                )
            })
            .collect();
        let fleet = vec![vehicle(VehicleClass::Internal, 100, 1)];
        let model = build_model(customers, &fleet, None);

        let outcome = fast_solver().solve(&model, &fleet).unwrap();

        let served: usize = outcome.routes.iter().map(|r| r.customers.len()).sum();
        assert_eq!(served, 2);
        assert_eq!(outcome.dropped.len(), 3);
        for route in &outcome.routes {
            assert!(route.load <= 100.0);
        }
    }
}
