//! Single-route TSP reoptimization
//!
//! Re-orders one route's customers as an open tour from a vehicle-specific
//! depot, over straight-line distances. Strictly a permutation: customers are
//! neither added nor removed, and the route's capacity and stop-count
//! feasibility cannot change.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::services::geo;
use crate::types::Coordinates;

/// Compute an improved visit order for stops, starting from `depot`.
///
/// Returns indices into `stops`. Cheapest-arc construction seeds the tour,
/// 2-opt polishes it until convergence or the budget runs out.
pub fn reoptimize_order(
    depot: &Coordinates,
    stops: &[Coordinates],
    budget: Duration,
) -> Vec<usize> {
    let n = stops.len();
    if n < 2 {
        return (0..n).collect();
    }

    let deadline = Instant::now() + budget;

    // Distance table over depot (index 0) + stops (1..=n), kilometers
    let mut points = Vec::with_capacity(n + 1);
    points.push(*depot);
    points.extend_from_slice(stops);
    let mut table = vec![vec![0.0f64; n + 1]; n + 1];
    for i in 0..=n {
        for j in 0..=n {
            if i != j {
                table[i][j] = geo::haversine_km(&points[i], &points[j]);
            }
        }
    }

    // Cheapest-arc start: always extend with the nearest unvisited stop
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    let mut current = 0usize;
    for _ in 0..n {
        let mut best: Option<(usize, f64)> = None;
        for stop in 0..n {
            if visited[stop] {
                continue;
            }
            let d = table[current][stop + 1];
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((stop, d));
            }
        }
        let (stop, _) = best.expect("unvisited stop must exist");
        visited[stop] = true;
        order.push(stop);
        current = stop + 1;
    }

    // 2-opt over the open tour depot -> ... -> last (no closing leg)
    let mut improved = true;
    while improved && Instant::now() < deadline {
        improved = false;
        for i in 0..n - 1 {
            for j in i + 1..n {
                let prev = if i == 0 { 0 } else { order[i - 1] + 1 };
                let next = if j == n - 1 { None } else { Some(order[j + 1] + 1) };

                let old = table[prev][order[i] + 1]
                    + next.map_or(0.0, |next| table[order[j] + 1][next]);
                let new = table[prev][order[j] + 1]
                    + next.map_or(0.0, |next| table[order[i] + 1][next]);

                if new + 1e-12 < old {
                    order[i..=j].reverse();
                    improved = true;
                }
            }
        }
    }

    debug!("TSP reoptimized {} stops", n);
    order
}

/// Tour length of an order, depot to last stop, kilometers. Test helper and
/// logging aid.
pub fn tour_length_km(depot: &Coordinates, stops: &[Coordinates], order: &[usize]) -> f64 {
    let mut length = 0.0;
    let mut from = *depot;
    for &idx in order {
        length += geo::haversine_km(&from, &stops[idx]);
        from = stops[idx];
    }
    length
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Duration {
        Duration::from_millis(500)
    }

    #[test]
    fn test_empty_and_single() {
        let depot = Coordinates::new(43.20, 23.55);
        assert!(reoptimize_order(&depot, &[], budget()).is_empty());
        assert_eq!(
            reoptimize_order(&depot, &[Coordinates::new(43.21, 23.56)], budget()),
            vec![0]
        );
    }

    #[test]
    fn test_result_is_permutation() {
        let depot = Coordinates::new(43.20, 23.55);
        let stops = vec![
            Coordinates::new(43.21, 23.56),
            Coordinates::new(43.22, 23.57),
            Coordinates::new(43.215, 23.555),
            Coordinates::new(43.205, 23.565),
        ];

        let mut order = reoptimize_order(&depot, &stops, budget());
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_chain_is_visited_in_line_order() {
        // Stops on a line north of the depot, given out of order
        let depot = Coordinates::new(43.20, 23.55);
        let stops = vec![
            Coordinates::new(43.23, 23.55),
            Coordinates::new(43.21, 23.55),
            Coordinates::new(43.22, 23.55),
        ];

        let order = reoptimize_order(&depot, &stops, budget());
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_no_worse_than_input_order() {
        let depot = Coordinates::new(43.20, 23.55);
        let stops = vec![
            Coordinates::new(43.26, 23.56),
            Coordinates::new(43.21, 23.54),
            Coordinates::new(43.24, 23.58),
            Coordinates::new(43.22, 23.60),
            Coordinates::new(43.25, 23.53),
        ];

        let input_order: Vec<usize> = (0..stops.len()).collect();
        let input_length = tour_length_km(&depot, &stops, &input_order);
        let order = reoptimize_order(&depot, &stops, budget());
        let optimized_length = tour_length_km(&depot, &stops, &order);

        assert!(optimized_length <= input_length + 1e-9);
    }
}
