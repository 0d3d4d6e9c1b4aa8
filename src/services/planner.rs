//! Planning pipeline
//!
//! Wires the stages together: allocation, matrix retrieval, model build, the
//! strategy race, TSP polish, and final assembly into a validated solution.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::PlanError;
use crate::services::allocator::allocate;
use crate::services::routing::{DistanceMatrix, MatrixService};
use crate::services::vrp::{RoutingModel, VrpSolver};
use crate::types::{Customer, OverflowCustomer, OverflowReason, Solution};

/// A finished run: the solution plus the matrix it was computed against,
/// which the map adapter needs for drawing real road legs.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub solution: Solution,
    /// Absent when nothing was routed
    pub matrix: Option<Arc<DistanceMatrix>>,
}

/// End-to-end planner for one configuration.
pub struct Planner {
    config: Config,
    matrix_service: MatrixService,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner").finish_non_exhaustive()
    }
}

impl Planner {
    /// Validate the configuration and set up the matrix service.
    pub fn new(config: Config) -> Result<Self, PlanError> {
        config.validate()?;
        let matrix_service = MatrixService::from_config(&config.matrix, &config.cache);
        Ok(Self {
            config,
            matrix_service,
        })
    }

    /// Planner that never touches the network; estimates every leg.
    pub fn offline(config: Config) -> Result<Self, PlanError> {
        config.validate()?;
        let matrix_service = MatrixService::offline(&config.matrix);
        Ok(Self {
            config,
            matrix_service,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Plan routes for one batch of customers.
    pub async fn plan(&self, customers: Vec<Customer>) -> Result<PlanOutcome, PlanError> {
        let run_id = Uuid::new_v4();
        let started_at = Instant::now();
        info!("Planning run {} over {} customers", run_id, customers.len());

        let allocation = allocate(
            &customers,
            &self.config.fleet,
            self.config.solver.max_customer_volume,
            &self.config.depot.main,
        );
        let mut overflow = allocation.overflow;

        if allocation.served.is_empty() {
            info!("Run {}: nothing to route", run_id);
            let mut solution = Solution::empty();
            solution.overflow = overflow;
            solution.solve_time_ms = started_at.elapsed().as_millis() as u64;
            return Ok(PlanOutcome {
                solution,
                matrix: None,
            });
        }

        // Main depot first, then every alternate depot any class references,
        // then the served customers; the model relies on this layout.
        let alternates = self.config.alternate_depots();
        let depot_count = 1 + alternates.len();
        let mut locations = vec![self.config.depot.main];
        locations.extend(alternates);
        locations.extend(
            allocation
                .served
                .iter()
                .map(|c| c.coordinates.expect("served customer has coordinates")),
        );

        let matrix = Arc::new(self.matrix_service.matrix(&locations).await?);

        let model = Arc::new(RoutingModel::build(
            Arc::clone(&matrix),
            allocation.served,
            &self.config.fleet,
            depot_count,
            self.config.center_zone.as_ref(),
            &self.config.solver,
        )?);

        let solver = VrpSolver::new(self.config.solver.clone());
        let fleet = self.config.fleet.clone();
        let solve_model = Arc::clone(&model);
        let outcome = tokio::task::spawn_blocking(move || solver.solve(&solve_model, &fleet))
            .await
            .map_err(|err| {
                // A crashed solver contributes no candidate
                error!("Run {}: solver task crashed: {}", run_id, err);
                PlanError::NoSolution
            })??;

        overflow.extend(outcome.dropped.into_iter().map(|customer| OverflowCustomer {
            customer,
            reason: OverflowReason::DroppedBySolver,
        }));

        let total_distance_km = outcome.routes.iter().map(|r| r.distance_km).sum();
        let total_duration_minutes = outcome.routes.iter().map(|r| r.duration_minutes).sum();
        let vehicles_used = outcome.routes.len();

        let solution = Solution {
            routes: outcome.routes,
            overflow,
            total_distance_km,
            total_duration_minutes,
            vehicles_used,
            solve_time_ms: started_at.elapsed().as_millis() as u64,
        };

        for violation in solution.validate(&self.config.fleet, &customers) {
            warn!("Run {}: solution violation: {}", run_id, violation);
        }

        info!(
            "Run {} done: {} routes, {:.1} km, {} unserved, {} ms",
            run_id,
            solution.routes.len(),
            solution.total_distance_km,
            solution.overflow.len(),
            solution.solve_time_ms
        );
        Ok(PlanOutcome {
            solution,
            matrix: Some(matrix),
        })
    }
}
