use thiserror::Error;

/// Input rejected by the normalizer. Client-caused, never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Problem declares no variables")]
    NoVariables,

    #[error("Variable id cannot be empty")]
    EmptyVariableId,

    #[error("Duplicate variable id '{id}'")]
    DuplicateVariable { id: String },

    #[error("Domain of variable '{id}' is unbounded")]
    UnboundedDomain { id: String },

    #[error("Domain of variable '{id}' is empty: {reason}")]
    EmptyDomain { id: String, reason: String },

    #[error("Constraint {index} references undeclared variable '{id}'")]
    UndeclaredConstraintVariable { index: usize, id: String },

    #[error("Objective references undeclared variable '{id}'")]
    UndeclaredObjectiveVariable { id: String },

    #[error("Constraint {index} is malformed: {reason}")]
    MalformedConstraint { index: usize, reason: String },

    #[error("Objective is malformed: {reason}")]
    MalformedObjective { reason: String },

    #[error("Invalid solve configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// The model builder cannot encode a constraint shape. Permanent.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Unsupported constraint: {reason}")]
pub struct UnsupportedConstraintError {
    pub reason: String,
}

/// Fault raised inside a solver backend. Transient: the orchestrator retries
/// it once with the same model before reporting an `ERROR` result.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Internal solver error: {0}")]
pub struct InternalSolverError(pub String);

/// Everything `Orchestrator::solve` can fail with. Infeasibility and timeouts
/// are results, not errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    UnsupportedConstraint(#[from] UnsupportedConstraintError),

    #[error("Solver queue is full ({capacity} pending), retry later")]
    QueueFull { capacity: usize },

    #[error("Solve was cancelled")]
    Cancelled,

    #[error("Solver service is shutting down")]
    ShuttingDown,
}

impl SolveError {
    /// Whether the caller may retry the same request later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SolveError::QueueFull { .. })
    }
}
