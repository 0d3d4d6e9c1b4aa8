//! Warehouse allocator
//!
//! Pre-solve filter that diverts customers the fleet can never serve into the
//! overflow set, so the solver only sees placeable demand.

use tracing::{debug, info};

use crate::services::geo;
use crate::types::{
    max_enabled_capacity, Coordinates, Customer, OverflowCustomer, OverflowReason, VehicleConfig,
};

/// Result of the pre-solve split.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Customers handed to the solver, in deterministic seed order
    pub served: Vec<Customer>,
    /// Customers the solver will never see, each with a reason
    pub overflow: Vec<OverflowCustomer>,
}

/// Split customers into served and overflow.
///
/// Rules apply in order, first match wins:
/// 1. unset or out-of-bounds coordinates,
/// 2. volume above every enabled vehicle's capacity,
/// 3. volume above the per-customer policy ceiling.
///
/// Served customers are ordered by ascending volume, ties broken by
/// descending great-circle distance to the main depot, which seeds the
/// first-solution heuristics with small far-away customers first.
pub fn allocate(
    customers: &[Customer],
    fleet: &[VehicleConfig],
    max_customer_volume: f64,
    main_depot: &Coordinates,
) -> Allocation {
    let fleet_ceiling = max_enabled_capacity(fleet) as f64;

    let mut served = Vec::new();
    let mut overflow = Vec::new();

    for customer in customers {
        let reason = classify(customer, fleet_ceiling, max_customer_volume);
        match reason {
            Some(reason) => {
                debug!("Customer '{}' overflows: {:?}", customer.id, reason);
                overflow.push(OverflowCustomer {
                    customer: customer.clone(),
                    reason,
                });
            }
            None => served.push(customer.clone()),
        }
    }

    served.sort_by(|a, b| {
        a.volume
            .partial_cmp(&b.volume)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let da = depot_distance(a, main_depot);
                let db = depot_distance(b, main_depot);
                db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    info!(
        "Allocated {} customers to the solver, {} to overflow",
        served.len(),
        overflow.len()
    );

    Allocation { served, overflow }
}

fn classify(
    customer: &Customer,
    fleet_ceiling: f64,
    max_customer_volume: f64,
) -> Option<OverflowReason> {
    match customer.coordinates {
        None => return Some(OverflowReason::InvalidCoordinates),
        Some(coords) if !geo::in_bounds(&coords) => {
            return Some(OverflowReason::InvalidCoordinates)
        }
        Some(_) => {}
    }

    if customer.volume > fleet_ceiling {
        return Some(OverflowReason::ExceedsFleetCapacity);
    }

    if customer.volume > max_customer_volume {
        return Some(OverflowReason::ExceedsPerCustomerPolicy);
    }

    None
}

fn depot_distance(customer: &Customer, main_depot: &Coordinates) -> f64 {
    customer
        .coordinates
        .map(|coords| geo::haversine_km(&coords, main_depot))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VehicleClass;

    fn depot() -> Coordinates {
        Coordinates::new(42.70, 23.32)
    }

    fn fleet() -> Vec<VehicleConfig> {
        vec![
            VehicleConfig {
                class: VehicleClass::Internal,
                capacity: 30,
                count: 2,
                max_distance_km: None,
                max_time_minutes: 480,
                service_time_minutes: 8,
                enabled: true,
                start_location: depot(),
                max_customers_per_route: None,
                start_time_minutes: 480,
                tsp_depot_location: None,
            },
            VehicleConfig {
                class: VehicleClass::External,
                capacity: 150,
                count: 1,
                max_distance_km: None,
                max_time_minutes: 480,
                service_time_minutes: 8,
                enabled: true,
                start_location: depot(),
                max_customers_per_route: None,
                start_time_minutes: 480,
                tsp_depot_location: None,
            },
        ]
    }

    fn customer(id: &str, lat: f64, lng: f64, volume: f64) -> Customer {
        Customer::with_coordinates(id, id, Coordinates::new(lat, lng), volume)
    }

    #[test]
    fn test_unset_coordinates_overflow() {
        let customers = vec![Customer::new("c1", "No Coords", "unknown address", 5.0)];
        let result = allocate(&customers, &fleet(), 120.0, &depot());

        assert!(result.served.is_empty());
        assert_eq!(result.overflow.len(), 1);
        assert_eq!(result.overflow[0].reason, OverflowReason::InvalidCoordinates);
    }

    #[test]
    fn test_out_of_bounds_coordinates_overflow() {
        let customers = vec![customer("c1", 0.0, 0.0, 5.0)];
        let result = allocate(&customers, &fleet(), 120.0, &depot());

        assert_eq!(result.overflow[0].reason, OverflowReason::InvalidCoordinates);
    }

    #[test]
    fn test_fleet_capacity_rule_beats_policy_rule() {
        // 200 exceeds both the biggest vehicle (150) and the policy (120);
        // the fleet rule comes first
        let customers = vec![customer("c1", 42.71, 23.33, 200.0)];
        let result = allocate(&customers, &fleet(), 120.0, &depot());

        assert_eq!(result.overflow[0].reason, OverflowReason::ExceedsFleetCapacity);
    }

    #[test]
    fn test_policy_ceiling_overflow() {
        // 130 fits the External vehicle (150) but breaks the policy (120)
        let customers = vec![customer("c1", 42.71, 23.33, 130.0)];
        let result = allocate(&customers, &fleet(), 120.0, &depot());

        assert_eq!(
            result.overflow[0].reason,
            OverflowReason::ExceedsPerCustomerPolicy
        );
    }

    #[test]
    fn test_disabled_vehicles_do_not_raise_ceiling() {
        let mut fleet = fleet();
        fleet[1].enabled = false; // External 150 gone, ceiling is 30

        let customers = vec![customer("c1", 42.71, 23.33, 50.0)];
        let result = allocate(&customers, &fleet, 120.0, &depot());

        assert_eq!(result.overflow[0].reason, OverflowReason::ExceedsFleetCapacity);
    }

    #[test]
    fn test_served_sorted_by_volume_then_distance_desc() {
        let customers = vec![
            customer("near-big", 42.705, 23.325, 20.0),
            customer("far-small", 42.90, 23.50, 5.0),
            customer("near-small", 42.705, 23.325, 5.0),
        ];
        let result = allocate(&customers, &fleet(), 120.0, &depot());

        let ids: Vec<&str> = result.served.iter().map(|c| c.id.as_str()).collect();
        // Small volumes first; among equals, farther from the depot first
        assert_eq!(ids, vec!["far-small", "near-small", "near-big"]);
    }

    #[test]
    fn test_all_served_when_feasible() {
        let customers = vec![
            customer("c1", 42.71, 23.33, 5.0),
            customer("c2", 42.69, 23.30, 10.0),
        ];
        let result = allocate(&customers, &fleet(), 120.0, &depot());

        assert_eq!(result.served.len(), 2);
        assert!(result.overflow.is_empty());
    }
}
