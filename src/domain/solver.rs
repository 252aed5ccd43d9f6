use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::model::SolverModel;
use crate::domain::problem::TieBreakPolicy;
use crate::error::InternalSolverError;

/// Knobs a backend receives alongside the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveParams {
    /// Hard wall-clock budget for this solve.
    pub time_limit: Duration,
    /// Threads the backend may use for this one solve.
    pub worker_count: usize,
    pub tie_break: TieBreakPolicy,
}

/// Shared advisory cancellation flag. Backends poll it; raising it never
/// interrupts anything by itself.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a backend run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    /// Search space exhausted with an incumbent and an objective.
    Optimal,
    /// A solution without optimality proof (satisfaction problems).
    Feasible,
    /// Search space exhausted, nothing found.
    Infeasible,
    /// Deadline reached; `values` holds the incumbent if any.
    TimeLimit,
    /// Cancel flag observed.
    Interrupted,
}

/// Raw backend output. `values` is indexed like `SolverModel::vars`.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeSolution {
    pub status: NativeStatus,
    pub values: Option<Vec<f64>>,
    pub objective: Option<f64>,
    pub nodes: u64,
}

impl NativeSolution {
    pub fn empty(status: NativeStatus, nodes: u64) -> Self {
        NativeSolution {
            status,
            values: None,
            objective: None,
            nodes,
        }
    }
}

/// Common interface for constraint/optimization backends
pub trait Solver: Send + Sync {
    /// Solve `model` within `params.time_limit`, polling `cancel`.
    ///
    /// Infeasibility and timeouts are reported through `NativeSolution::status`.
    /// `Err` is reserved for faults inside the backend itself.
    fn solve_model(
        &self,
        model: &SolverModel,
        params: &SolveParams,
        cancel: &CancelFlag,
    ) -> Result<NativeSolution, InternalSolverError>;

    /// Get the solver name for logging/debugging
    fn name(&self) -> &str;
}
