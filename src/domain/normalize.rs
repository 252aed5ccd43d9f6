use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Duration;

use crate::domain::fingerprint::Fingerprint;
use crate::domain::problem::{
    Constraint, Domain, Expression, Objective, ProblemSpec, SolveConfig, SolveRequest, Term,
    Variable,
};
use crate::error::ValidationError;
use crate::models::{
    ApiConstraint, ApiDomain, ApiObjective, ApiProblem, ApiRelation, ApiSolveConfig,
    ApiSolveRequest, ApiTerm,
};

/// Integer bounds beyond this magnitude are treated as unbounded; past it an
/// `f64` no longer represents every integer exactly.
pub const MAX_INTEGER_BOUND: f64 = 1e15;

/// Validate a raw problem and bring it into canonical form.
pub fn normalize(raw: ApiProblem) -> Result<(ProblemSpec, Fingerprint), ValidationError> {
    let spec = canonicalize(raw)?;
    let fingerprint = Fingerprint::of(&spec);
    Ok((spec, fingerprint))
}

/// Like [`normalize`], for a full request. The returned fingerprint is the
/// request key used for caching and deduplication.
pub fn normalize_request(
    raw: ApiSolveRequest,
) -> Result<(SolveRequest, Fingerprint), ValidationError> {
    let config = normalize_config(&raw.config)?;
    let problem = canonicalize(raw.problem)?;
    let fingerprint = Fingerprint::for_request(&problem, config.tie_break);
    Ok((SolveRequest { problem, config }, fingerprint))
}

fn normalize_config(raw: &ApiSolveConfig) -> Result<SolveConfig, ValidationError> {
    let time_limit = match raw.time_limit_ms {
        Some(0) => {
            return Err(ValidationError::InvalidConfig {
                reason: "time_limit_ms must be greater than zero".to_string(),
            })
        }
        Some(ms) => Some(Duration::from_millis(ms)),
        None => None,
    };
    if raw.worker_count == Some(0) {
        return Err(ValidationError::InvalidConfig {
            reason: "worker_count must be at least 1".to_string(),
        });
    }
    Ok(SolveConfig {
        time_limit,
        worker_count: raw.worker_count,
        tie_break: raw.tie_break.unwrap_or_default(),
    })
}

fn canonicalize(raw: ApiProblem) -> Result<ProblemSpec, ValidationError> {
    if raw.variables.is_empty() {
        return Err(ValidationError::NoVariables);
    }

    let mut variables = Vec::with_capacity(raw.variables.len());
    for var in raw.variables {
        if var.id.is_empty() {
            return Err(ValidationError::EmptyVariableId);
        }
        let domain = normalize_domain(&var.id, var.domain)?;
        variables.push(Variable { id: var.id, domain });
    }
    variables.sort_by(|a, b| a.id.cmp(&b.id));
    if let Some(pair) = variables.windows(2).find(|w| w[0].id == w[1].id) {
        return Err(ValidationError::DuplicateVariable {
            id: pair[0].id.clone(),
        });
    }

    let declared: HashSet<&str> = variables.iter().map(|v| v.id.as_str()).collect();

    let mut constraints = Vec::with_capacity(raw.constraints.len());
    for (index, constraint) in raw.constraints.into_iter().enumerate() {
        constraints.push(normalize_constraint(index, constraint, &declared)?);
    }
    constraints.sort_by(cmp_constraints);
    constraints.dedup();

    let objective = raw
        .objective
        .map(|objective| normalize_objective(objective, &declared))
        .transpose()?;

    Ok(ProblemSpec {
        variables,
        constraints,
        objective,
    })
}

fn normalize_domain(id: &str, raw: ApiDomain) -> Result<Domain, ValidationError> {
    let unbounded = || ValidationError::UnboundedDomain { id: id.to_string() };
    let empty = |reason: &str| ValidationError::EmptyDomain {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    match raw {
        ApiDomain::Range {
            lower,
            upper,
            integer,
        } => {
            let (lower, upper) = match (lower, upper) {
                (Some(l), Some(u)) if l.is_finite() && u.is_finite() => (l, u),
                _ => return Err(unbounded()),
            };
            if lower > upper {
                return Err(empty("lower bound exceeds upper bound"));
            }
            if !integer {
                return Ok(Domain::Real {
                    lower: canonical_zero(lower),
                    upper: canonical_zero(upper),
                });
            }
            if lower.abs() > MAX_INTEGER_BOUND || upper.abs() > MAX_INTEGER_BOUND {
                return Err(unbounded());
            }
            let (lo, hi) = (lower.ceil(), upper.floor());
            if lo > hi {
                return Err(empty("range contains no integer"));
            }
            Ok(Domain::Integer {
                lower: lo as i64,
                upper: hi as i64,
            })
        }
        ApiDomain::Set { mut values } => {
            if values.is_empty() {
                return Err(empty("set has no values"));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(unbounded());
            }
            for v in values.iter_mut() {
                *v = canonical_zero(*v);
            }
            values.sort_by(|a, b| a.total_cmp(b));
            values.dedup();

            // A run of consecutive integers is the same domain as the range.
            let integral = values
                .iter()
                .all(|v| v.fract() == 0.0 && v.abs() <= MAX_INTEGER_BOUND);
            let contiguous = values.windows(2).all(|w| w[1] - w[0] == 1.0);
            if integral && contiguous {
                let (lo, hi) = (values[0], values[values.len() - 1]);
                return Ok(Domain::Integer {
                    lower: lo as i64,
                    upper: hi as i64,
                });
            }
            Ok(Domain::Set { values })
        }
    }
}

fn normalize_constraint(
    index: usize,
    raw: ApiConstraint,
    declared: &HashSet<&str>,
) -> Result<Constraint, ValidationError> {
    let malformed = |reason: String| ValidationError::MalformedConstraint { index, reason };
    let undeclared = |id: String| ValidationError::UndeclaredConstraintVariable { index, id };

    match raw {
        ApiConstraint::Linear { terms, op, rhs } => {
            if !rhs.is_finite() {
                return Err(malformed(format!("right-hand side {rhs} is not finite")));
            }
            let expr = normalize_expression(terms, declared, &malformed, &undeclared)?;
            let rhs = canonical_zero(rhs);
            let (lower, upper) = match op {
                ApiRelation::Le => (None, Some(rhs)),
                ApiRelation::Ge => (Some(rhs), None),
                ApiRelation::Eq => (Some(rhs), Some(rhs)),
            };
            Ok(Constraint::Bounded { expr, lower, upper })
        }
        ApiConstraint::Range {
            terms,
            lower,
            upper,
        } => {
            if lower.is_none() && upper.is_none() {
                return Err(malformed("range needs a lower or an upper bound".to_string()));
            }
            for bound in lower.iter().chain(upper.iter()) {
                if !bound.is_finite() {
                    return Err(malformed(format!("bound {bound} is not finite")));
                }
            }
            if let (Some(l), Some(u)) = (lower, upper) {
                if l > u {
                    return Err(malformed(format!("lower bound {l} exceeds upper bound {u}")));
                }
            }
            let expr = normalize_expression(terms, declared, &malformed, &undeclared)?;
            Ok(Constraint::Bounded {
                expr,
                lower: lower.map(canonical_zero),
                upper: upper.map(canonical_zero),
            })
        }
        ApiConstraint::AllDifferent { mut vars } => {
            if let Some(id) = vars.iter().find(|id| !declared.contains(id.as_str())) {
                return Err(undeclared(id.clone()));
            }
            vars.sort();
            if let Some(pair) = vars.windows(2).find(|w| w[0] == w[1]) {
                return Err(malformed(format!("variable '{}' listed twice", pair[0])));
            }
            Ok(Constraint::AllDifferent { vars })
        }
    }
}

fn normalize_objective(
    raw: ApiObjective,
    declared: &HashSet<&str>,
) -> Result<Objective, ValidationError> {
    let malformed = |reason: String| ValidationError::MalformedObjective { reason };
    let undeclared = |id: String| ValidationError::UndeclaredObjectiveVariable { id };

    if !raw.constant.is_finite() {
        return Err(malformed(format!("constant {} is not finite", raw.constant)));
    }
    let expr = normalize_expression(raw.terms, declared, &malformed, &undeclared)?;
    Ok(Objective {
        direction: raw.direction,
        expr,
        constant: canonical_zero(raw.constant),
    })
}

/// Sort factors, merge terms over the same factors and drop zero terms.
fn normalize_expression(
    raw: Vec<ApiTerm>,
    declared: &HashSet<&str>,
    malformed: &dyn Fn(String) -> ValidationError,
    undeclared: &dyn Fn(String) -> ValidationError,
) -> Result<Expression, ValidationError> {
    let mut terms: Vec<Term> = Vec::with_capacity(raw.len());
    for term in raw {
        if !term.coef.is_finite() {
            return Err(malformed(format!("coefficient {} is not finite", term.coef)));
        }
        if term.vars.is_empty() {
            return Err(malformed("term has no variables".to_string()));
        }
        if let Some(id) = term.vars.iter().find(|id| !declared.contains(id.as_str())) {
            return Err(undeclared(id.clone()));
        }
        let mut factors = term.vars;
        factors.sort();
        terms.push(Term {
            coef: term.coef,
            factors,
        });
    }

    terms.sort_by(|a, b| a.factors.cmp(&b.factors));
    let mut merged: Vec<Term> = Vec::with_capacity(terms.len());
    for term in terms {
        match merged.last_mut() {
            Some(last) if last.factors == term.factors => last.coef += term.coef,
            _ => merged.push(term),
        }
    }
    merged.retain(|t| t.coef != 0.0);

    Ok(Expression { terms: merged })
}

fn canonical_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

fn cmp_opt(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.total_cmp(&y),
    }
}

fn cmp_expressions(a: &Expression, b: &Expression) -> Ordering {
    for (x, y) in a.terms.iter().zip(b.terms.iter()) {
        let ord = x
            .factors
            .cmp(&y.factors)
            .then_with(|| x.coef.total_cmp(&y.coef));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.terms.len().cmp(&b.terms.len())
}

fn cmp_constraints(a: &Constraint, b: &Constraint) -> Ordering {
    match (a, b) {
        (
            Constraint::Bounded {
                expr: ea,
                lower: la,
                upper: ua,
            },
            Constraint::Bounded {
                expr: eb,
                lower: lb,
                upper: ub,
            },
        ) => cmp_expressions(ea, eb)
            .then_with(|| cmp_opt(*la, *lb))
            .then_with(|| cmp_opt(*ua, *ub)),
        (Constraint::Bounded { .. }, Constraint::AllDifferent { .. }) => Ordering::Less,
        (Constraint::AllDifferent { .. }, Constraint::Bounded { .. }) => Ordering::Greater,
        (Constraint::AllDifferent { vars: va }, Constraint::AllDifferent { vars: vb }) => {
            va.cmp(vb)
        }
    }
}
