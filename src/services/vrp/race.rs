//! Parallel strategy race
//!
//! Runs one solver worker per (first-solution, metaheuristic) pair from a
//! fixed catalog, all over the same immutable model, and keeps the candidate
//! with the smallest real driving distance.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SolverSettings;
use crate::error::PlanError;

use super::construct::{construct, FirstSolutionStrategy};
use super::improve::{improve, Metaheuristic};
use super::model::{Candidate, RoutingModel};

/// One worker's search configuration.
#[derive(Debug, Clone, Copy)]
pub struct StrategyPair {
    pub strategy: FirstSolutionStrategy,
    pub metaheuristic: Metaheuristic,
}

/// The fixed catalog workers draw from, in launch order.
pub static STRATEGY_CATALOG: Lazy<Vec<StrategyPair>> = Lazy::new(|| {
    vec![
        StrategyPair {
            strategy: FirstSolutionStrategy::GlobalBestInsertion,
            metaheuristic: Metaheuristic::GuidedLocalSearch,
        },
        StrategyPair {
            strategy: FirstSolutionStrategy::Savings,
            metaheuristic: Metaheuristic::GuidedLocalSearch,
        },
        StrategyPair {
            strategy: FirstSolutionStrategy::GlobalCheapestArc,
            metaheuristic: Metaheuristic::GuidedLocalSearch,
        },
        StrategyPair {
            strategy: FirstSolutionStrategy::PathCheapestArc,
            metaheuristic: Metaheuristic::GuidedLocalSearch,
        },
        StrategyPair {
            strategy: FirstSolutionStrategy::Savings,
            metaheuristic: Metaheuristic::SimulatedAnnealing,
        },
        StrategyPair {
            strategy: FirstSolutionStrategy::ParallelCheapestInsertion,
            metaheuristic: Metaheuristic::GuidedLocalSearch,
        },
    ]
});

struct RaceEntry {
    worker: usize,
    pair: StrategyPair,
    candidate: Candidate,
    real_distance_m: i64,
}

/// Run the race and return the winning candidate.
///
/// A worker that panics is logged and contributes nothing; the race fails
/// with `NoSolution` only when no worker produced a candidate.
pub fn race(model: &Arc<RoutingModel>, settings: &SolverSettings) -> Result<Candidate, PlanError> {
    let worker_count = settings.worker_count().min(STRATEGY_CATALOG.len()).max(1);
    let budget = Duration::from_secs(settings.time_limit_seconds);

    info!(
        "Racing {} strategy workers, {}s budget each",
        worker_count, settings.time_limit_seconds
    );

    let results: Mutex<Vec<RaceEntry>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for worker in 0..worker_count {
            let pair = STRATEGY_CATALOG[worker];
            let model = Arc::clone(model);
            let results = &results;
            scope.spawn(move || {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    run_worker(&model, pair, budget, worker as u64)
                }));
                match outcome {
                    Ok(Some(candidate)) => {
                        let real_distance_m = model.candidate_real_distance_m(&candidate);
                        debug!(
                            "Worker {} ({} + {}) finished, {} m real distance, {} dropped",
                            worker,
                            pair.strategy,
                            pair.metaheuristic,
                            real_distance_m,
                            candidate.dropped.len()
                        );
                        results.lock().push(RaceEntry {
                            worker,
                            pair,
                            candidate,
                            real_distance_m,
                        });
                    }
                    Ok(None) => {
                        debug!(
                            "Worker {} ({} + {}) found no feasible first solution",
                            worker, pair.strategy, pair.metaheuristic
                        );
                    }
                    Err(_) => {
                        warn!("Worker {} crashed, dropping its result", worker);
                    }
                }
            });
        }
    });

    let mut entries = results.into_inner();
    if entries.is_empty() {
        return Err(PlanError::NoSolution);
    }

    // Smallest real distance; ties by fewer vehicles, then fewer unserved
    entries.sort_by_key(|entry| {
        (
            entry.real_distance_m,
            entry.candidate.vehicles_used(),
            entry.candidate.dropped.len(),
            entry.worker,
        )
    });
    let winner = entries.remove(0);

    info!(
        "Race won by {} + {} with {:.1} km",
        winner.pair.strategy,
        winner.pair.metaheuristic,
        winner.real_distance_m as f64 / 1000.0
    );
    Ok(winner.candidate)
}

fn run_worker(
    model: &RoutingModel,
    pair: StrategyPair,
    budget: Duration,
    seed: u64,
) -> Option<Candidate> {
    let deadline = Instant::now() + budget;
    let first = construct(model, pair.strategy)?;
    Some(improve(model, first, pair.metaheuristic, deadline, seed))
}
