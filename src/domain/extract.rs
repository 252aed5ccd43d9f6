use log::warn;
use std::time::Duration;

use crate::domain::model::SolverModel;
use crate::domain::problem::{Assignment, Domain, FEASIBILITY_TOLERANCE};
use crate::domain::result::{SolveResult, SolveStatus};
use crate::domain::solver::{NativeSolution, NativeStatus};

/// Precision of reported real values.
const ROUNDING: f64 = 1e6;

/// Convert raw backend output into a `SolveResult`.
///
/// Values are mapped back to declared ids (auxiliary variables are dropped)
/// and rounded; the objective is recomputed from the declared objective over
/// the rounded assignment rather than trusted from the backend.
pub fn extract(model: &SolverModel, native: NativeSolution, elapsed: Duration) -> SolveResult {
    let status = match native.status {
        NativeStatus::Optimal => SolveStatus::Optimal,
        NativeStatus::Feasible => SolveStatus::Feasible,
        NativeStatus::Infeasible => return SolveResult::infeasible(elapsed),
        NativeStatus::TimeLimit | NativeStatus::Interrupted => SolveStatus::Timeout,
    };

    let mut diagnostics = Vec::new();
    match native.status {
        NativeStatus::TimeLimit if native.values.is_some() => {
            diagnostics.push("time limit reached, returning best solution found".to_string())
        }
        NativeStatus::TimeLimit => {
            diagnostics.push("time limit reached before any solution was found".to_string())
        }
        NativeStatus::Interrupted => diagnostics.push("solve interrupted".to_string()),
        _ => {}
    }

    let values = match native.values {
        Some(values) if values.len() == model.vars.len() => values,
        Some(values) => {
            return SolveResult::error(
                format!(
                    "backend returned {} values for {} model variables",
                    values.len(),
                    model.vars.len()
                ),
                elapsed,
            )
        }
        None if status == SolveStatus::Timeout => {
            return SolveResult {
                status,
                assignment: None,
                objective_value: None,
                elapsed_time: elapsed,
                diagnostic_message: Some(diagnostics.join("; ")),
            }
        }
        None => {
            return SolveResult::error(
                format!("backend reported {status:?} without values"),
                elapsed,
            )
        }
    };

    let assignment: Assignment = model
        .spec
        .variables
        .iter()
        .zip(&values)
        .map(|(var, value)| (var.id.clone(), round_value(&var.domain, *value)))
        .collect();

    let objective_value = model
        .spec
        .objective
        .as_ref()
        .and_then(|objective| objective.evaluate(&assignment))
        .map(round_real);

    if let (Some(reported), Some(recomputed)) = (native.objective, objective_value) {
        let tolerance = FEASIBILITY_TOLERANCE * reported.abs().max(1.0);
        if (reported - recomputed).abs() > tolerance {
            warn!(
                "Backend objective {reported} differs from recomputed objective {recomputed}"
            );
            diagnostics.push(format!(
                "solver reported objective {reported}, recomputed {recomputed}"
            ));
        }
    }

    for constraint in &model.spec.constraints {
        if constraint.is_satisfied(&assignment) == Some(false) {
            warn!("Extracted assignment violates constraint `{constraint}`");
            diagnostics.push(format!("assignment violates constraint `{constraint}`"));
        }
    }

    SolveResult {
        status,
        assignment: Some(assignment),
        objective_value,
        elapsed_time: elapsed,
        diagnostic_message: (!diagnostics.is_empty()).then(|| diagnostics.join("; ")),
    }
}

fn round_real(value: f64) -> f64 {
    let rounded = (value * ROUNDING).round() / ROUNDING;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

fn round_value(domain: &Domain, value: f64) -> f64 {
    match domain {
        Domain::Integer { .. } => value.round(),
        Domain::Real { .. } => round_real(value),
        // Snap to the nearest member so that set values are reported verbatim.
        Domain::Set { values } => values
            .iter()
            .copied()
            .min_by(|a, b| (a - value).abs().total_cmp(&(b - value).abs()))
            .unwrap_or(value),
    }
}
