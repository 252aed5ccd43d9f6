//! Continuous sub-problem solved at search leaves via good_lp.
//!
//! Once every discrete variable is fixed, what remains is a plain LP over the
//! continuous variables. microlp is pure Rust, so no native solver library
//! is needed at build time.

use good_lp::solvers::microlp::microlp;
use good_lp::{
    constraint, variable, variables, Expression, ResolutionError, Solution,
    SolverModel as LpModel, Variable,
};

use crate::domain::model::SolverModel;
use crate::domain::problem::SolverDirection;
use crate::error::InternalSolverError;

/// Rows whose bounds differ by less than this are treated as equalities.
const EQUALITY_WIDTH: f64 = 1e-9;

/// Solve the continuous remainder of `model`.
///
/// `bounds[i]` is the current interval of model variable `i`; discrete
/// variables are fixed (`lo == hi`). Returns the full value vector, or
/// `None` when the remainder is infeasible.
pub fn solve_leaf(
    model: &SolverModel,
    bounds: &[(f64, f64)],
) -> Result<Option<Vec<f64>>, InternalSolverError> {
    let mut vars = variables!();
    let handles: Vec<Option<Variable>> = model
        .vars
        .iter()
        .zip(bounds)
        .map(|(var, &(lo, hi))| {
            var.domain
                .is_continuous()
                .then(|| vars.add(variable().min(lo).max(hi)))
        })
        .collect();

    let mut objective: Expression = 0.into();
    let mut maximize = false;
    if let Some(obj) = &model.objective {
        maximize = obj.direction == SolverDirection::Maximize;
        for &(i, c) in &obj.coefs {
            if let Some(v) = handles[i] {
                objective += c * v;
            }
        }
    }

    let mut problem = if maximize {
        vars.maximise(objective).using(microlp)
    } else {
        vars.minimise(objective).using(microlp)
    };

    for row in &model.rows {
        let mut lhs: Expression = 0.into();
        let mut fixed = 0.0;
        let mut touches_continuous = false;
        for &(i, c) in &row.coefs {
            match handles[i] {
                Some(v) => {
                    lhs += c * v;
                    touches_continuous = true;
                }
                None => fixed += c * bounds[i].0,
            }
        }
        // Purely discrete rows were already checked by the search.
        if !touches_continuous {
            continue;
        }
        let (lower, upper) = (row.lower - fixed, row.upper - fixed);
        if lower.is_finite() && upper.is_finite() && upper - lower <= EQUALITY_WIDTH {
            problem = problem.with(constraint!(lhs == lower));
            continue;
        }
        if lower.is_finite() {
            let expr = lhs.clone();
            problem = problem.with(constraint!(expr >= lower));
        }
        if upper.is_finite() {
            problem = problem.with(constraint!(lhs <= upper));
        }
    }

    match problem.solve() {
        Ok(solution) => Ok(Some(
            handles
                .iter()
                .zip(bounds)
                .map(|(handle, &(lo, _))| handle.map_or(lo, |v| solution.value(v)))
                .collect(),
        )),
        Err(ResolutionError::Infeasible) => Ok(None),
        Err(ResolutionError::Unbounded) => Err(InternalSolverError(
            "LP reported unbounded over bounded domains".to_string(),
        )),
        Err(err) => Err(InternalSolverError(format!("LP solve failed: {err}"))),
    }
}
