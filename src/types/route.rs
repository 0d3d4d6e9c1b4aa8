//! Route and solution types

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::customer::Customer;
use super::vehicle::{VehicleClass, VehicleConfig};

/// Why a customer ended up unserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverflowReason {
    /// Coordinates missing or outside plausible bounds
    InvalidCoordinates,
    /// Volume exceeds every enabled vehicle's capacity
    ExceedsFleetCapacity,
    /// Volume exceeds the per-customer policy ceiling
    ExceedsPerCustomerPolicy,
    /// The solver chose to skip the customer rather than break a constraint
    DroppedBySolver,
}

/// A customer that could not be served, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverflowCustomer {
    pub customer: Customer,
    pub reason: OverflowReason,
}

/// One vehicle's planned route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Owning vehicle class
    pub vehicle_class: VehicleClass,
    /// Ordinal of the vehicle within its class (0-based)
    pub vehicle_ordinal: u32,
    /// Customers in visit order
    pub customers: Vec<Customer>,
    /// Real driving distance in kilometers, from the unshaped matrix
    pub distance_km: f64,
    /// Real duration in minutes, travel plus service
    pub duration_minutes: f64,
    /// Total load in stack units
    pub load: f64,
}

impl Route {
    pub fn stop_count(&self) -> usize {
        self.customers.len()
    }
}

/// Final planning result: routes plus the unserved overflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    pub routes: Vec<Route>,
    pub overflow: Vec<OverflowCustomer>,
    /// Sum of route distances, kilometers
    pub total_distance_km: f64,
    /// Sum of route durations, minutes
    pub total_duration_minutes: f64,
    /// Number of vehicles with at least one stop
    pub vehicles_used: usize,
    /// Wall-clock solve time in milliseconds
    pub solve_time_ms: u64,
}

impl Solution {
    /// An empty but successful solution (zero customers in, zero out).
    pub fn empty() -> Self {
        Self {
            routes: vec![],
            overflow: vec![],
            total_distance_km: 0.0,
            total_duration_minutes: 0.0,
            vehicles_used: 0,
            solve_time_ms: 0,
        }
    }

    /// All customer IDs appearing in routes, in visit order.
    pub fn routed_customer_ids(&self) -> Vec<&str> {
        self.routes
            .iter()
            .flat_map(|r| r.customers.iter().map(|c| c.id.as_str()))
            .collect()
    }

    /// Check the solution against the fleet and the full input set.
    ///
    /// Returns human-readable violations; an empty list means the solution is
    /// consistent. Used by tests and logged after every solve.
    pub fn validate(&self, fleet: &[VehicleConfig], input: &[Customer]) -> Vec<String> {
        let mut violations = Vec::new();

        // Partition: every input customer exactly once, routed or overflowed.
        let mut seen: HashSet<&str> = HashSet::new();
        for id in self.routed_customer_ids() {
            if !seen.insert(id) {
                violations.push(format!("customer '{}' appears in more than one route", id));
            }
        }
        for item in &self.overflow {
            if !seen.insert(item.customer.id.as_str()) {
                violations.push(format!(
                    "customer '{}' is both routed and in overflow",
                    item.customer.id
                ));
            }
        }
        for customer in input {
            if !seen.contains(customer.id.as_str()) {
                violations.push(format!("customer '{}' is missing from the solution", customer.id));
            }
        }

        for (idx, route) in self.routes.iter().enumerate() {
            let Some(config) = fleet.iter().find(|v| v.class == route.vehicle_class) else {
                violations.push(format!(
                    "route {} references unknown vehicle class {}",
                    idx, route.vehicle_class
                ));
                continue;
            };

            let load: f64 = route.customers.iter().map(|c| c.volume).sum();
            if load > config.capacity as f64 + 1e-6 {
                violations.push(format!(
                    "route {} load {:.1} exceeds capacity {}",
                    idx, load, config.capacity
                ));
            }
            if route.duration_minutes > config.max_time_minutes as f64 + 1e-6 {
                violations.push(format!(
                    "route {} duration {:.1} min exceeds limit {} min",
                    idx, route.duration_minutes, config.max_time_minutes
                ));
            }
            if let Some(max_km) = config.max_distance_km {
                if route.distance_km > max_km + 1e-6 {
                    violations.push(format!(
                        "route {} distance {:.1} km exceeds limit {:.1} km",
                        idx, route.distance_km, max_km
                    ));
                }
            }
            if let Some(max_stops) = config.max_customers_per_route {
                if route.stop_count() > max_stops as usize {
                    violations.push(format!(
                        "route {} has {} stops, limit is {}",
                        idx,
                        route.stop_count(),
                        max_stops
                    ));
                }
            }
            if route.customers.iter().any(|c| c.coordinates.is_none()) {
                violations.push(format!("route {} contains a customer without coordinates", idx));
            }
        }

        violations
    }
}
