use std::sync::Arc;

use crate::domain::solver::Solver;
use crate::domain::solvers::SearchSolver;

/// Available solver backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverType {
    Search,
}

impl SolverType {
    /// Parse solver type from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "search" | "branch-and-bound" => Some(SolverType::Search),
            _ => None,
        }
    }
}

/// Create a solver instance based on the specified type
pub fn create_solver(solver_type: SolverType, poll_interval: u64) -> Arc<dyn Solver> {
    match solver_type {
        SolverType::Search => Arc::new(SearchSolver::with_poll_interval(poll_interval)),
    }
}
