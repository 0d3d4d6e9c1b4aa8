//! Local-search improvement
//!
//! A shared operator kit (intra-route 2-opt, inter-route relocate and
//! exchange, reinsertion of dropped customers) driven by one of two
//! metaheuristics. All moves preserve feasibility; infeasible neighbors are
//! discarded, never repaired.

use std::collections::HashMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::model::{Candidate, RoutingModel};

/// Improvement procedure applied after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metaheuristic {
    /// Penalize overused arcs, re-descend, keep the true-cost best
    GuidedLocalSearch,
    /// Random neighborhood walk with a cooling acceptance temperature
    SimulatedAnnealing,
}

impl std::fmt::Display for Metaheuristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Metaheuristic::GuidedLocalSearch => "GUIDED_LOCAL_SEARCH",
            Metaheuristic::SimulatedAnnealing => "SIMULATED_ANNEALING",
        };
        f.write_str(name)
    }
}

/// Arc-feature penalties for guided local search.
type ArcPenalties = HashMap<(usize, usize), i64>;

/// GLS penalty weight relative to the mean arc cost of the first solution.
const GLS_ALPHA: f64 = 0.3;

/// Penalty rounds without a new best before GLS is considered converged.
const GLS_STALL_LIMIT: u32 = 200;

/// Geometric cooling factor per annealing step.
const SA_COOLING: f64 = 0.9995;

/// Improve a feasible candidate until the deadline.
pub fn improve(
    model: &RoutingModel,
    candidate: Candidate,
    metaheuristic: Metaheuristic,
    deadline: Instant,
    seed: u64,
) -> Candidate {
    match metaheuristic {
        Metaheuristic::GuidedLocalSearch => guided_local_search(model, candidate, deadline),
        Metaheuristic::SimulatedAnnealing => simulated_annealing(model, candidate, deadline, seed),
    }
}

/// Arcs of one route including both depot legs.
fn route_arcs(model: &RoutingModel, vehicle: usize, route: &[usize]) -> Vec<(usize, usize)> {
    if route.is_empty() {
        return vec![];
    }
    let start = model.vehicles()[vehicle].start_node;
    let mut arcs = Vec::with_capacity(route.len() + 1);
    let mut from = start;
    for &customer in route {
        let node = model.customer_node(customer);
        arcs.push((from, node));
        from = node;
    }
    arcs.push((from, start));
    arcs
}

fn augmented_route_cost(
    model: &RoutingModel,
    vehicle: usize,
    route: &[usize],
    penalties: &ArcPenalties,
    lambda: i64,
) -> i64 {
    let spec = &model.vehicles()[vehicle];
    let base = model.route_cost(spec, route);
    if lambda == 0 {
        return base;
    }
    let penalty: i64 = route_arcs(model, vehicle, route)
        .iter()
        .map(|arc| penalties.get(arc).copied().unwrap_or(0))
        .sum();
    base + lambda * penalty
}

/// First-improvement descent over the full operator kit.
///
/// Costs are augmented by the arc penalties; with `lambda == 0` this is plain
/// local search on the shaped objective.
fn descend(
    model: &RoutingModel,
    candidate: &mut Candidate,
    penalties: &ArcPenalties,
    lambda: i64,
    deadline: Instant,
) {
    let mut improved = true;
    while improved && Instant::now() < deadline {
        improved = false;
        improved |= two_opt_pass(model, candidate, penalties, lambda);
        improved |= relocate_pass(model, candidate, penalties, lambda);
        improved |= exchange_pass(model, candidate, penalties, lambda);
        improved |= reinsert_pass(model, candidate, penalties, lambda);
    }
}

fn two_opt_pass(
    model: &RoutingModel,
    candidate: &mut Candidate,
    penalties: &ArcPenalties,
    lambda: i64,
) -> bool {
    let mut improved = false;
    for vehicle in 0..candidate.routes.len() {
        let spec = &model.vehicles()[vehicle];
        let mut route = candidate.routes[vehicle].clone();
        if route.len() < 2 {
            continue;
        }
        let mut cost = augmented_route_cost(model, vehicle, &route, penalties, lambda);
        let mut pass_improved = true;
        while pass_improved {
            pass_improved = false;
            let n = route.len();
            'scan: for i in 0..n - 1 {
                for j in i + 1..n {
                    let mut reversed = route.clone();
                    reversed[i..=j].reverse();
                    let new_cost =
                        augmented_route_cost(model, vehicle, &reversed, penalties, lambda);
                    if new_cost < cost && model.route_feasible(spec, &reversed) {
                        route = reversed;
                        cost = new_cost;
                        pass_improved = true;
                        improved = true;
                        break 'scan;
                    }
                }
            }
        }
        candidate.routes[vehicle] = route;
    }
    improved
}

fn relocate_pass(
    model: &RoutingModel,
    candidate: &mut Candidate,
    penalties: &ArcPenalties,
    lambda: i64,
) -> bool {
    let vehicle_count = candidate.routes.len();
    for from_vehicle in 0..vehicle_count {
        for from_pos in 0..candidate.routes[from_vehicle].len() {
            let customer = candidate.routes[from_vehicle][from_pos];

            let mut removed = candidate.routes[from_vehicle].clone();
            removed.remove(from_pos);
            let removed_delta = augmented_route_cost(model, from_vehicle, &removed, penalties, lambda)
                - augmented_route_cost(
                    model,
                    from_vehicle,
                    &candidate.routes[from_vehicle],
                    penalties,
                    lambda,
                );

            for to_vehicle in 0..vehicle_count {
                if to_vehicle == from_vehicle {
                    continue;
                }
                let target = &candidate.routes[to_vehicle];
                let target_cost =
                    augmented_route_cost(model, to_vehicle, target, penalties, lambda);
                for pos in 0..=target.len() {
                    let mut extended = target.clone();
                    extended.insert(pos, customer);
                    let insert_delta =
                        augmented_route_cost(model, to_vehicle, &extended, penalties, lambda)
                            - target_cost;

                    if removed_delta + insert_delta < 0
                        && model.route_feasible(&model.vehicles()[to_vehicle], &extended)
                    {
                        candidate.routes[from_vehicle] = removed;
                        candidate.routes[to_vehicle] = extended;
                        return true;
                    }
                }
            }
        }
    }
    false
}

fn exchange_pass(
    model: &RoutingModel,
    candidate: &mut Candidate,
    penalties: &ArcPenalties,
    lambda: i64,
) -> bool {
    let vehicle_count = candidate.routes.len();
    for a in 0..vehicle_count {
        for b in a + 1..vehicle_count {
            let cost_a = augmented_route_cost(model, a, &candidate.routes[a], penalties, lambda);
            let cost_b = augmented_route_cost(model, b, &candidate.routes[b], penalties, lambda);

            for pos_a in 0..candidate.routes[a].len() {
                for pos_b in 0..candidate.routes[b].len() {
                    let mut new_a = candidate.routes[a].clone();
                    let mut new_b = candidate.routes[b].clone();
                    std::mem::swap(&mut new_a[pos_a], &mut new_b[pos_b]);

                    let delta = augmented_route_cost(model, a, &new_a, penalties, lambda)
                        + augmented_route_cost(model, b, &new_b, penalties, lambda)
                        - cost_a
                        - cost_b;

                    if delta < 0
                        && model.route_feasible(&model.vehicles()[a], &new_a)
                        && model.route_feasible(&model.vehicles()[b], &new_b)
                    {
                        candidate.routes[a] = new_a;
                        candidate.routes[b] = new_b;
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Pull dropped customers back in whenever an insertion beats the skip
/// penalty. No-op when skipping is disabled (nothing is ever dropped then).
fn reinsert_pass(
    model: &RoutingModel,
    candidate: &mut Candidate,
    penalties: &ArcPenalties,
    lambda: i64,
) -> bool {
    let Some(skip_penalty) = model.skip_penalty() else {
        return false;
    };

    for idx in 0..candidate.dropped.len() {
        let customer = candidate.dropped[idx];
        for vehicle in 0..candidate.routes.len() {
            let route = &candidate.routes[vehicle];
            let route_cost = augmented_route_cost(model, vehicle, route, penalties, lambda);
            for pos in 0..=route.len() {
                let mut extended = route.clone();
                extended.insert(pos, customer);
                let insert_delta =
                    augmented_route_cost(model, vehicle, &extended, penalties, lambda) - route_cost;

                if insert_delta < skip_penalty
                    && model.route_feasible(&model.vehicles()[vehicle], &extended)
                {
                    candidate.routes[vehicle] = extended;
                    candidate.dropped.remove(idx);
                    return true;
                }
            }
        }
    }
    false
}

fn guided_local_search(
    model: &RoutingModel,
    mut candidate: Candidate,
    deadline: Instant,
) -> Candidate {
    let no_penalties = ArcPenalties::new();
    descend(model, &mut candidate, &no_penalties, 0, deadline);

    let mut best = candidate.clone();
    let mut best_cost = model.candidate_cost(&best);

    // Lambda scales with the mean arc cost of the first local optimum
    let arcs: Vec<(usize, usize)> = candidate
        .routes
        .iter()
        .enumerate()
        .flat_map(|(v, route)| route_arcs(model, v, route))
        .collect();
    if arcs.is_empty() {
        return best;
    }
    let mean_arc: i64 = arcs
        .iter()
        .map(|&(from, to)| model.distance_m(from, to))
        .sum::<i64>()
        / arcs.len() as i64;
    let lambda = ((mean_arc as f64) * GLS_ALPHA).round() as i64;

    let mut penalties = ArcPenalties::new();
    let mut rounds = 0u32;
    let mut stalled = 0u32;
    while Instant::now() < deadline && stalled < GLS_STALL_LIMIT {
        // Penalize the highest-utility arcs of the current local optimum
        let mut utilities: Vec<((usize, usize), f64)> = candidate
            .routes
            .iter()
            .enumerate()
            .flat_map(|(v, route)| route_arcs(model, v, route))
            .map(|arc| {
                let penalty = penalties.get(&arc).copied().unwrap_or(0);
                let cost = model.distance_m(arc.0, arc.1);
                (arc, cost as f64 / (1.0 + penalty as f64))
            })
            .collect();
        utilities.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (arc, _) in utilities.into_iter().take(2) {
            *penalties.entry(arc).or_insert(0) += 1;
        }

        descend(model, &mut candidate, &penalties, lambda.max(1), deadline);
        rounds += 1;

        let cost = model.candidate_cost(&candidate);
        if cost < best_cost {
            best_cost = cost;
            best = candidate.clone();
            stalled = 0;
        } else {
            stalled += 1;
        }
    }

    debug!("GLS finished after {} penalty rounds, cost {}", rounds, best_cost);
    best
}

fn simulated_annealing(
    model: &RoutingModel,
    candidate: Candidate,
    deadline: Instant,
    seed: u64,
) -> Candidate {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut current = candidate;

    let no_penalties = ArcPenalties::new();
    descend(model, &mut current, &no_penalties, 0, deadline);

    let mut current_cost = model.candidate_cost(&current);
    let mut best = current.clone();
    let mut best_cost = current_cost;

    let mut temperature = (current_cost as f64 / 20.0).max(100.0);
    let mut steps = 0u64;

    while Instant::now() < deadline && temperature > 1.0 {
        steps += 1;
        temperature *= SA_COOLING;

        let Some((neighbor, neighbor_cost)) = random_neighbor(model, &current, &mut rng) else {
            continue;
        };

        let delta = neighbor_cost - current_cost;
        let accept = delta < 0 || rng.gen::<f64>() < (-(delta as f64) / temperature).exp();
        if accept {
            current = neighbor;
            current_cost = neighbor_cost;
            if current_cost < best_cost {
                best_cost = current_cost;
                best = current.clone();
            }
        }
    }

    // Polish the annealed best with a plain descent for the remaining budget
    descend(model, &mut best, &no_penalties, 0, deadline);
    let polished = model.candidate_cost(&best);
    debug!("SA finished after {} steps, cost {}", steps, polished);
    best
}

/// One random feasible neighbor, or `None` when the draw was infeasible.
fn random_neighbor(
    model: &RoutingModel,
    current: &Candidate,
    rng: &mut StdRng,
) -> Option<(Candidate, i64)> {
    let mut neighbor = current.clone();
    let vehicle_count = neighbor.routes.len();

    match rng.gen_range(0..4) {
        // Relocate a random customer to a random position
        0 => {
            let from = rng.gen_range(0..vehicle_count);
            if neighbor.routes[from].is_empty() {
                return None;
            }
            let pos = rng.gen_range(0..neighbor.routes[from].len());
            let customer = neighbor.routes[from].remove(pos);
            let to = rng.gen_range(0..vehicle_count);
            let at = rng.gen_range(0..=neighbor.routes[to].len());
            neighbor.routes[to].insert(at, customer);
            if !model.route_feasible(&model.vehicles()[to], &neighbor.routes[to]) {
                return None;
            }
        }
        // Swap two random customers between routes
        1 => {
            let a = rng.gen_range(0..vehicle_count);
            let b = rng.gen_range(0..vehicle_count);
            if a == b || neighbor.routes[a].is_empty() || neighbor.routes[b].is_empty() {
                return None;
            }
            let pos_a = rng.gen_range(0..neighbor.routes[a].len());
            let pos_b = rng.gen_range(0..neighbor.routes[b].len());
            let (left, right) = if a < b {
                let (l, r) = neighbor.routes.split_at_mut(b);
                (&mut l[a], &mut r[0])
            } else {
                let (l, r) = neighbor.routes.split_at_mut(a);
                (&mut r[0], &mut l[b])
            };
            std::mem::swap(&mut left[pos_a], &mut right[pos_b]);
            if !model.route_feasible(&model.vehicles()[a], &neighbor.routes[a])
                || !model.route_feasible(&model.vehicles()[b], &neighbor.routes[b])
            {
                return None;
            }
        }
        // Reverse a random segment of one route
        2 => {
            let vehicle = rng.gen_range(0..vehicle_count);
            let len = neighbor.routes[vehicle].len();
            if len < 2 {
                return None;
            }
            let i = rng.gen_range(0..len - 1);
            let j = rng.gen_range(i + 1..len);
            neighbor.routes[vehicle][i..=j].reverse();
            if !model.route_feasible(&model.vehicles()[vehicle], &neighbor.routes[vehicle]) {
                return None;
            }
        }
        // Reinsert a random dropped customer
        _ => {
            if neighbor.dropped.is_empty() {
                return None;
            }
            let idx = rng.gen_range(0..neighbor.dropped.len());
            let customer = neighbor.dropped.remove(idx);
            let vehicle = rng.gen_range(0..vehicle_count);
            let at = rng.gen_range(0..=neighbor.routes[vehicle].len());
            neighbor.routes[vehicle].insert(at, customer);
            if !model.route_feasible(&model.vehicles()[vehicle], &neighbor.routes[vehicle]) {
                return None;
            }
        }
    }

    let cost = model.candidate_cost(&neighbor);
    Some((neighbor, cost))
}
