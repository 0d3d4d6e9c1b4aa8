//! Planner error kinds

use thiserror::Error;

/// Errors surfaced by the planning core.
///
/// Overflow is not represented here: an unserved customer is an outcome
/// carried on the solution, not a failure of the run.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Configuration or input data rejected before any solve began
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Every distance-matrix tier failed for at least one required pair
    #[error("distance matrix unavailable: {0}")]
    MatrixUnavailable(String),

    /// The routing model is unsatisfiable as built
    #[error("model infeasible: {0}")]
    ModelInfeasible(String),

    /// No strategy found a feasible first solution within the time budget
    #[error("no feasible solution found within the time budget")]
    NoSolution,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanError::InvalidInput("vehicle capacity must be positive".to_string());
        assert_eq!(err.to_string(), "invalid input: vehicle capacity must be positive");

        let err = PlanError::NoSolution;
        assert!(err.to_string().contains("time budget"));
    }
}
