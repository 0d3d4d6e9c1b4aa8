//! First-solution construction strategies
//!
//! Every strategy produces a feasible candidate under the model's four
//! dimensions; customers that fit nowhere are dropped when skipping is
//! enabled, otherwise construction reports failure.

use tracing::debug;

use super::model::{Candidate, RouteState, RoutingModel};

/// The heuristic that builds the initial routes for one strategy worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstSolutionStrategy {
    /// Clarke-Wright savings merges, then fleet assignment
    Savings,
    /// Each vehicle in turn follows its cheapest outgoing arc
    PathCheapestArc,
    /// Globally cheapest (route end, customer) arc across all vehicles
    GlobalCheapestArc,
    /// Repeatedly insert the customer with the cheapest insertion anywhere
    ParallelCheapestInsertion,
    /// Customers in seed order, each at its best feasible position
    GlobalBestInsertion,
}

impl std::fmt::Display for FirstSolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FirstSolutionStrategy::Savings => "SAVINGS",
            FirstSolutionStrategy::PathCheapestArc => "PATH_CHEAPEST_ARC",
            FirstSolutionStrategy::GlobalCheapestArc => "GLOBAL_CHEAPEST_ARC",
            FirstSolutionStrategy::ParallelCheapestInsertion => "PARALLEL_CHEAPEST_INSERTION",
            FirstSolutionStrategy::GlobalBestInsertion => "GLOBAL_BEST_INSERTION",
        };
        f.write_str(name)
    }
}

/// Build a first solution, or `None` when skipping is disabled and some
/// customer cannot be placed.
pub fn construct(model: &RoutingModel, strategy: FirstSolutionStrategy) -> Option<Candidate> {
    let mut candidate = match strategy {
        FirstSolutionStrategy::Savings => savings(model),
        FirstSolutionStrategy::PathCheapestArc => path_cheapest_arc(model),
        FirstSolutionStrategy::GlobalCheapestArc => global_cheapest_arc(model),
        FirstSolutionStrategy::ParallelCheapestInsertion => parallel_cheapest_insertion(model),
        FirstSolutionStrategy::GlobalBestInsertion => global_best_insertion(model),
    };
    candidate.dropped.sort_unstable();

    debug!(
        "{} built {} routes, {} dropped",
        strategy,
        candidate.vehicles_used(),
        candidate.dropped.len()
    );

    if model.skip_penalty().is_none() && !candidate.dropped.is_empty() {
        return None;
    }
    Some(candidate)
}

struct Builder<'a> {
    model: &'a RoutingModel,
    routes: Vec<Vec<usize>>,
    states: Vec<RouteState>,
    ends: Vec<usize>,
    unrouted: Vec<usize>,
}

impl<'a> Builder<'a> {
    fn new(model: &'a RoutingModel) -> Self {
        let vehicle_count = model.vehicles().len();
        Self {
            model,
            routes: vec![Vec::new(); vehicle_count],
            states: vec![RouteState::default(); vehicle_count],
            ends: model.vehicles().iter().map(|v| v.start_node).collect(),
            unrouted: (0..model.customer_count()).collect(),
        }
    }

    fn append(&mut self, vehicle: usize, customer: usize, state: RouteState) {
        self.routes[vehicle].push(customer);
        self.states[vehicle] = state;
        self.ends[vehicle] = self.model.customer_node(customer);
        self.unrouted.retain(|&c| c != customer);
    }

    fn finish(self) -> Candidate {
        Candidate {
            routes: self.routes,
            dropped: self.unrouted,
        }
    }
}

fn path_cheapest_arc(model: &RoutingModel) -> Candidate {
    let mut builder = Builder::new(model);

    for vehicle in 0..model.vehicles().len() {
        loop {
            let spec = &model.vehicles()[vehicle];
            let from = builder.ends[vehicle];
            let state = builder.states[vehicle];

            let best = builder
                .unrouted
                .iter()
                .filter_map(|&customer| {
                    model
                        .can_append(spec, &state, from, customer)
                        .map(|next| (customer, next, model.arc_cost(spec.class, from, model.customer_node(customer))))
                })
                .min_by_key(|&(_, _, cost)| cost);

            match best {
                Some((customer, next, _)) => builder.append(vehicle, customer, next),
                None => break,
            }
        }
    }

    builder.finish()
}

fn global_cheapest_arc(model: &RoutingModel) -> Candidate {
    let mut builder = Builder::new(model);

    loop {
        let mut best: Option<(usize, usize, RouteState, i64)> = None;
        for (vehicle, spec) in model.vehicles().iter().enumerate() {
            let from = builder.ends[vehicle];
            let state = builder.states[vehicle];
            for &customer in &builder.unrouted {
                if let Some(next) = model.can_append(spec, &state, from, customer) {
                    let cost = model.arc_cost(spec.class, from, model.customer_node(customer));
                    if best.map_or(true, |(_, _, _, c)| cost < c) {
                        best = Some((vehicle, customer, next, cost));
                    }
                }
            }
        }

        match best {
            Some((vehicle, customer, next, _)) => builder.append(vehicle, customer, next),
            None => break,
        }
    }

    builder.finish()
}

/// Cheapest feasible insertion of a customer into one route; shaped delta.
fn best_insertion(
    model: &RoutingModel,
    vehicle: usize,
    route: &[usize],
    customer: usize,
) -> Option<(usize, i64)> {
    let spec = &model.vehicles()[vehicle];
    let mut best: Option<(usize, i64)> = None;

    for pos in 0..=route.len() {
        let mut extended = Vec::with_capacity(route.len() + 1);
        extended.extend_from_slice(&route[..pos]);
        extended.push(customer);
        extended.extend_from_slice(&route[pos..]);

        if !model.route_feasible(spec, &extended) {
            continue;
        }
        let delta = model.route_cost(spec, &extended) - model.route_cost(spec, route);
        if best.map_or(true, |(_, d)| delta < d) {
            best = Some((pos, delta));
        }
    }

    best
}

fn global_best_insertion(model: &RoutingModel) -> Candidate {
    let mut builder = Builder::new(model);

    // Seed order is the allocator's: small volumes first, far ones earlier
    let order: Vec<usize> = builder.unrouted.clone();
    for customer in order {
        let mut best: Option<(usize, usize, i64)> = None;
        for vehicle in 0..model.vehicles().len() {
            if let Some((pos, delta)) = best_insertion(model, vehicle, &builder.routes[vehicle], customer)
            {
                if best.map_or(true, |(_, _, d)| delta < d) {
                    best = Some((vehicle, pos, delta));
                }
            }
        }

        if let Some((vehicle, pos, _)) = best {
            builder.routes[vehicle].insert(pos, customer);
            builder.unrouted.retain(|&c| c != customer);
            resync(model, &mut builder, vehicle);
        }
    }

    builder.finish()
}

fn parallel_cheapest_insertion(model: &RoutingModel) -> Candidate {
    let mut builder = Builder::new(model);

    loop {
        let mut best: Option<(usize, usize, usize, i64)> = None;
        for &customer in &builder.unrouted {
            for vehicle in 0..model.vehicles().len() {
                if let Some((pos, delta)) =
                    best_insertion(model, vehicle, &builder.routes[vehicle], customer)
                {
                    if best.map_or(true, |(_, _, _, d)| delta < d) {
                        best = Some((customer, vehicle, pos, delta));
                    }
                }
            }
        }

        match best {
            Some((customer, vehicle, pos, _)) => {
                builder.routes[vehicle].insert(pos, customer);
                builder.unrouted.retain(|&c| c != customer);
                resync(model, &mut builder, vehicle);
            }
            None => break,
        }
    }

    builder.finish()
}

/// Recompute a route's cached state and end node after an arbitrary edit.
fn resync(model: &RoutingModel, builder: &mut Builder<'_>, vehicle: usize) {
    let spec = &model.vehicles()[vehicle];
    let mut state = RouteState::default();
    let mut from = spec.start_node;
    for &customer in &builder.routes[vehicle] {
        state = model
            .can_append(spec, &state, from, customer)
            .expect("resync over an infeasible route");
        from = model.customer_node(customer);
    }
    builder.states[vehicle] = state;
    builder.ends[vehicle] = from;
}

fn savings(model: &RoutingModel) -> Candidate {
    let n = model.customer_count();
    let vehicle_count = model.vehicles().len();
    if n == 0 {
        return Candidate::empty(vehicle_count);
    }

    // Pool merge ceilings: the loosest vehicle in the fleet. Per-vehicle
    // ceilings are re-validated at assignment time.
    let max_capacity = model
        .vehicles()
        .iter()
        .map(|v| v.capacity_units)
        .max()
        .unwrap_or(0);
    let max_stops = model
        .vehicles()
        .iter()
        .map(|v| v.max_stops)
        .max()
        .unwrap_or(0);

    // s(i, j) = d(0, i) + d(0, j) - d(i, j), from the main depot
    let mut savings = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in i + 1..n {
            let ni = model.customer_node(i);
            let nj = model.customer_node(j);
            let value = model.distance_m(0, ni) + model.distance_m(0, nj) - model.distance_m(ni, nj);
            if value > 0 {
                savings.push((i, j, value));
            }
        }
    }
    savings.sort_by(|a, b| b.2.cmp(&a.2));

    // Endpoint-merge bookkeeping: each customer starts alone
    let mut route_of: Vec<usize> = (0..n).collect();
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut loads: Vec<i64> = (0..n).map(|i| model.demand_units(i)).collect();

    for &(i, j, _) in &savings {
        let ri = route_of[i];
        let rj = route_of[j];
        if ri == rj {
            continue;
        }
        let combined_load = loads[ri] + loads[rj];
        if combined_load > max_capacity {
            continue;
        }
        if (members[ri].len() + members[rj].len()) as i64 > max_stops {
            continue;
        }

        let i_at_end = members[ri].last() == Some(&i);
        let i_at_start = members[ri].first() == Some(&i);
        let j_at_end = members[rj].last() == Some(&j);
        let j_at_start = members[rj].first() == Some(&j);

        let (from, into, reverse_from, reverse_into) = if i_at_end && j_at_start {
            (rj, ri, false, false)
        } else if j_at_end && i_at_start {
            (ri, rj, false, false)
        } else if i_at_end && j_at_end {
            (rj, ri, true, false)
        } else if i_at_start && j_at_start {
            (rj, ri, false, true)
        } else {
            continue;
        };

        let mut moved = std::mem::take(&mut members[from]);
        if reverse_from {
            moved.reverse();
        }
        if reverse_into {
            members[into].reverse();
        }
        members[into].append(&mut moved);
        loads[into] = combined_load;
        loads[from] = 0;
        for &customer in &members[into] {
            route_of[customer] = into;
        }
    }

    // Assign merged sequences to concrete vehicles, heaviest first, each to
    // the tightest vehicle that can actually run it.
    let mut merged: Vec<Vec<usize>> = members.into_iter().filter(|m| !m.is_empty()).collect();
    merged.sort_by_key(|route| {
        std::cmp::Reverse(route.iter().map(|&c| model.demand_units(c)).sum::<i64>())
    });

    let mut routes: Vec<Vec<usize>> = vec![Vec::new(); vehicle_count];
    let mut taken = vec![false; vehicle_count];
    let mut pending: Vec<usize> = Vec::new();

    for route in merged {
        let mut choice: Option<(usize, i64, bool)> = None;
        for (vehicle, spec) in model.vehicles().iter().enumerate() {
            if taken[vehicle] {
                continue;
            }
            let forward = model.route_feasible(spec, &route);
            let mut reversed_route = route.clone();
            reversed_route.reverse();
            let backward = model.route_feasible(spec, &reversed_route);
            if !forward && !backward {
                continue;
            }
            if choice.map_or(true, |(_, cap, _)| spec.capacity_units < cap) {
                choice = Some((vehicle, spec.capacity_units, forward));
            }
        }

        match choice {
            Some((vehicle, _, forward)) => {
                taken[vehicle] = true;
                routes[vehicle] = if forward {
                    route
                } else {
                    let mut reversed_route = route;
                    reversed_route.reverse();
                    reversed_route
                };
            }
            None => pending.extend(route),
        }
    }

    // Rescue pass: squeeze the leftovers into assigned routes
    let mut dropped = Vec::new();
    for customer in pending {
        let mut best: Option<(usize, usize, i64)> = None;
        for vehicle in 0..vehicle_count {
            if let Some((pos, delta)) = best_insertion(model, vehicle, &routes[vehicle], customer) {
                if best.map_or(true, |(_, _, d)| delta < d) {
                    best = Some((vehicle, pos, delta));
                }
            }
        }
        match best {
            Some((vehicle, pos, _)) => routes[vehicle].insert(pos, customer),
            None => dropped.push(customer),
        }
    }

    Candidate { routes, dropped }
}
