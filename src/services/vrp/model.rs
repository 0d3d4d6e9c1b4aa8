//! CVRP routing model
//!
//! Nodes are matrix indices: depots occupy the leading positions (main depot
//! at 0), customers follow. Every physical vehicle of a class becomes one
//! model vehicle; all of them share the class's parameters.
//!
//! Quantization, applied here and nowhere else: volumes are scaled ×100 to
//! integer stack-hundredths, distances are meters, times are seconds. All
//! cost and dimension arithmetic is integer.

use std::sync::Arc;

use crate::config::{CenterZoneSettings, SolverSettings};
use crate::error::PlanError;
use crate::services::routing::DistanceMatrix;
use crate::types::{Customer, VehicleClass, VehicleConfig};

/// Ceiling used for dimensions a vehicle leaves uncapped.
pub const UNCAPPED: i64 = i64::MAX / 4;

/// One expanded routing vehicle.
#[derive(Debug, Clone)]
pub struct VehicleSpec {
    pub class: VehicleClass,
    /// Ordinal within the class (0-based)
    pub ordinal: u32,
    /// Capacity in stack-hundredths
    pub capacity_units: i64,
    /// Distance ceiling in meters
    pub max_distance_m: i64,
    /// Stop-count ceiling
    pub max_stops: i64,
    /// Working-time ceiling in seconds
    pub max_time_s: i64,
    /// Service time per customer stop, seconds
    pub service_time_s: i64,
    /// Depot node the route starts and ends at
    pub start_node: usize,
    /// Route start, seconds after midnight
    pub start_time_s: i64,
    /// Index of the originating config in the fleet list
    pub config_index: usize,
}

/// Cumulative totals along a route: the four dimension counters.
///
/// `time_s` is elapsed working time since the route start; the vehicle's
/// absolute start time only shifts the clock, never the ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteState {
    pub load_units: i64,
    pub distance_m: i64,
    pub stops: i64,
    pub time_s: i64,
}

/// A working solution during search: customer indices per model vehicle,
/// plus the customers currently dropped.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Customer indices (model order) per vehicle, aligned with `vehicles()`
    pub routes: Vec<Vec<usize>>,
    /// Customer indices not placed on any route
    pub dropped: Vec<usize>,
}

impl Candidate {
    pub fn empty(vehicle_count: usize) -> Self {
        Self {
            routes: vec![Vec::new(); vehicle_count],
            dropped: Vec::new(),
        }
    }

    pub fn vehicles_used(&self) -> usize {
        self.routes.iter().filter(|r| !r.is_empty()).count()
    }
}

#[derive(Debug, Clone)]
struct ZoneShaping {
    discount: f64,
    penalty: i64,
    symmetric: bool,
}

/// The built routing model, immutable and shared across strategy workers.
#[derive(Debug)]
pub struct RoutingModel {
    matrix: Arc<DistanceMatrix>,
    customers: Vec<Customer>,
    depot_count: usize,
    vehicles: Vec<VehicleSpec>,
    /// Demand per customer, stack-hundredths
    demands: Vec<i64>,
    /// Per node: customer inside the center zone
    in_zone: Vec<bool>,
    shaping: Option<ZoneShaping>,
    /// `None` when customer skipping is disabled
    skip_penalty: Option<i64>,
}

impl RoutingModel {
    /// Build the model over an already-assembled matrix.
    ///
    /// The matrix must hold depots in its leading `depot_count` slots and the
    /// customers after them, in the same order as `customers`.
    pub fn build(
        matrix: Arc<DistanceMatrix>,
        customers: Vec<Customer>,
        fleet: &[VehicleConfig],
        depot_count: usize,
        zone: Option<&CenterZoneSettings>,
        solver: &SolverSettings,
    ) -> Result<Self, PlanError> {
        if matrix.len() != depot_count + customers.len() {
            return Err(PlanError::ModelInfeasible(format!(
                "matrix holds {} locations, expected {} depots + {} customers",
                matrix.len(),
                depot_count,
                customers.len()
            )));
        }

        let mut vehicles = Vec::new();
        for (config_index, config) in fleet.iter().enumerate() {
            if !config.enabled {
                continue;
            }
            let start_node = find_depot_node(&matrix, depot_count, config)?;
            for ordinal in 0..config.count {
                vehicles.push(VehicleSpec {
                    class: config.class,
                    ordinal,
                    capacity_units: config.capacity as i64 * 100,
                    max_distance_m: config
                        .max_distance_km
                        .map(|km| (km * 1000.0).round() as i64)
                        .unwrap_or(UNCAPPED),
                    max_stops: config
                        .max_customers_per_route
                        .map(|n| n as i64)
                        .unwrap_or(UNCAPPED),
                    max_time_s: config.max_time_minutes as i64 * 60,
                    service_time_s: config.service_time_minutes as i64 * 60,
                    start_node,
                    start_time_s: config.start_time_minutes as i64 * 60,
                    config_index,
                });
            }
        }

        if vehicles.is_empty() {
            return Err(PlanError::ModelInfeasible(
                "no enabled vehicles in the fleet".to_string(),
            ));
        }

        let demands: Vec<i64> = customers
            .iter()
            .map(|c| (c.volume * 100.0).round() as i64)
            .collect();

        let skip_penalty = solver
            .allow_customer_skipping
            .then_some(solver.skip_penalty);

        // Trivial infeasibility is rejected before any search runs.
        if skip_penalty.is_none() {
            let total_demand: i64 = demands.iter().sum();
            let total_capacity: i64 = vehicles.iter().map(|v| v.capacity_units).sum();
            if total_demand > total_capacity {
                return Err(PlanError::ModelInfeasible(format!(
                    "total demand {} exceeds total fleet capacity {}",
                    total_demand, total_capacity
                )));
            }
            let max_capacity = vehicles.iter().map(|v| v.capacity_units).max().unwrap_or(0);
            if let Some(over) = demands.iter().position(|&d| d > max_capacity) {
                return Err(PlanError::ModelInfeasible(format!(
                    "customer '{}' exceeds every vehicle's capacity and skipping is disabled",
                    customers[over].id
                )));
            }
        }

        let mut in_zone = vec![false; matrix.len()];
        if let Some(settings) = zone {
            let zone = settings.zone();
            for (idx, customer) in customers.iter().enumerate() {
                if let Some(coords) = customer.coordinates {
                    in_zone[depot_count + idx] = zone.contains(&coords);
                }
            }
        }

        let shaping = zone.map(|settings| ZoneShaping {
            discount: settings.center_class_discount,
            penalty: settings.other_class_penalty,
            symmetric: settings.symmetric,
        });

        Ok(Self {
            matrix,
            customers,
            depot_count,
            vehicles,
            demands,
            in_zone,
            shaping,
            skip_penalty,
        })
    }

    pub fn customers(&self) -> &[Customer] {
        &self.customers
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    pub fn vehicles(&self) -> &[VehicleSpec] {
        &self.vehicles
    }

    pub fn matrix(&self) -> &DistanceMatrix {
        &self.matrix
    }

    pub fn skip_penalty(&self) -> Option<i64> {
        self.skip_penalty
    }

    /// Matrix node of a customer index.
    pub fn customer_node(&self, customer: usize) -> usize {
        self.depot_count + customer
    }

    /// Demand of a customer in stack-hundredths.
    pub fn demand_units(&self, customer: usize) -> i64 {
        self.demands[customer]
    }

    /// Real meters between two nodes.
    pub fn distance_m(&self, from: usize, to: usize) -> i64 {
        self.matrix.distance(from, to) as i64
    }

    /// Real travel seconds between two nodes.
    pub fn travel_s(&self, from: usize, to: usize) -> i64 {
        self.matrix.duration(from, to) as i64
    }

    /// Shaped arc cost driving the objective.
    ///
    /// Arcs arriving at an in-zone customer are discounted for the Center
    /// class and penalized for everyone else; with the symmetric flag the
    /// same rule covers arcs leaving an in-zone customer. The Distance
    /// dimension never sees these adjustments.
    pub fn arc_cost(&self, class: VehicleClass, from: usize, to: usize) -> i64 {
        let base = self.distance_m(from, to);
        let Some(shaping) = &self.shaping else {
            return base;
        };

        let applies = self.in_zone[to] || (shaping.symmetric && self.in_zone[from]);
        if !applies {
            return base;
        }

        if class == VehicleClass::Center {
            (base as f64 * shaping.discount).round() as i64
        } else {
            base + shaping.penalty
        }
    }

    /// Try appending a customer to a route, returning the extended state.
    ///
    /// Checks all four ceilings, including the return leg to the vehicle's
    /// start depot for distance and time. `from` is the current last node.
    pub fn can_append(
        &self,
        spec: &VehicleSpec,
        state: &RouteState,
        from: usize,
        customer: usize,
    ) -> Option<RouteState> {
        let node = self.customer_node(customer);

        let load_units = state.load_units + self.demand_units(customer);
        if load_units > spec.capacity_units {
            return None;
        }

        let stops = state.stops + 1;
        if stops > spec.max_stops {
            return None;
        }

        let distance_m = state.distance_m + self.distance_m(from, node);
        if distance_m + self.distance_m(node, spec.start_node) > spec.max_distance_m {
            return None;
        }

        let time_s = state.time_s + self.travel_s(from, node) + spec.service_time_s;
        if time_s + self.travel_s(node, spec.start_node) > spec.max_time_s {
            return None;
        }

        Some(RouteState {
            load_units,
            distance_m,
            stops,
            time_s,
        })
    }

    /// Whether a whole customer sequence is feasible for a vehicle.
    pub fn route_feasible(&self, spec: &VehicleSpec, route: &[usize]) -> bool {
        let mut state = RouteState::default();
        let mut from = spec.start_node;
        for &customer in route {
            match self.can_append(spec, &state, from, customer) {
                Some(next) => {
                    state = next;
                    from = self.customer_node(customer);
                }
                None => return false,
            }
        }
        true
    }

    /// Shaped cost of one route, depot to depot.
    pub fn route_cost(&self, spec: &VehicleSpec, route: &[usize]) -> i64 {
        if route.is_empty() {
            return 0;
        }
        let mut cost = 0;
        let mut from = spec.start_node;
        for &customer in route {
            let node = self.customer_node(customer);
            cost += self.arc_cost(spec.class, from, node);
            from = node;
        }
        cost + self.arc_cost(spec.class, from, spec.start_node)
    }

    /// Shaped objective of a candidate: route costs plus skip penalties.
    pub fn candidate_cost(&self, candidate: &Candidate) -> i64 {
        let routes: i64 = candidate
            .routes
            .iter()
            .zip(&self.vehicles)
            .map(|(route, spec)| self.route_cost(spec, route))
            .sum();
        let skip = self.skip_penalty.unwrap_or(0) * candidate.dropped.len() as i64;
        routes + skip
    }

    /// Real totals of one route from the unshaped matrices.
    pub fn route_totals(&self, spec: &VehicleSpec, route: &[usize]) -> (i64, i64, i64) {
        if route.is_empty() {
            return (0, 0, 0);
        }
        let mut distance_m = 0;
        let mut duration_s = 0;
        let mut load_units = 0;
        let mut from = spec.start_node;
        for &customer in route {
            let node = self.customer_node(customer);
            distance_m += self.distance_m(from, node);
            duration_s += self.travel_s(from, node) + spec.service_time_s;
            load_units += self.demand_units(customer);
            from = node;
        }
        distance_m += self.distance_m(from, spec.start_node);
        duration_s += self.travel_s(from, spec.start_node);
        (distance_m, duration_s, load_units)
    }

    /// Real distance of a candidate in meters, for the race ranking.
    pub fn candidate_real_distance_m(&self, candidate: &Candidate) -> i64 {
        candidate
            .routes
            .iter()
            .zip(&self.vehicles)
            .map(|(route, spec)| self.route_totals(spec, route).0)
            .sum()
    }

    /// Whether every route of a candidate respects its vehicle's ceilings.
    pub fn candidate_feasible(&self, candidate: &Candidate) -> bool {
        candidate
            .routes
            .iter()
            .zip(&self.vehicles)
            .all(|(route, spec)| self.route_feasible(spec, route))
    }
}

fn find_depot_node(
    matrix: &DistanceMatrix,
    depot_count: usize,
    config: &VehicleConfig,
) -> Result<usize, PlanError> {
    let wanted = config.start_location;
    matrix.locations[..depot_count]
        .iter()
        .position(|loc| (loc.lat - wanted.lat).abs() < 1e-6 && (loc.lng - wanted.lng).abs() < 1e-6)
        .ok_or_else(|| {
            PlanError::ModelInfeasible(format!(
                "start depot of class {} is missing from the distance matrix",
                config.class
            ))
        })
}
