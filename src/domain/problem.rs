use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub type VarId = String;

/// Values keyed by declared variable id.
pub type Assignment = BTreeMap<VarId, f64>;

/// Absolute tolerance used when checking constraints against an assignment.
pub const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Terms shown when a constraint is rendered in a message.
const DISPLAY_TERMS: usize = 6;

/// Validated, bounded, non-empty variable domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Integer { lower: i64, upper: i64 },
    Real { lower: f64, upper: f64 },
    /// Sorted, deduplicated.
    Set { values: Vec<f64> },
}

impl Domain {
    /// True when the domain is exactly {0, 1}.
    pub fn is_binary(&self) -> bool {
        match self {
            Domain::Integer { lower, upper } => *lower == 0 && *upper == 1,
            Domain::Set { values } => values.as_slice() == [0.0, 1.0],
            Domain::Real { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: VarId,
    pub domain: Domain,
}

/// `coef * factors[0] * factors[1] * ...`, factors sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub coef: f64,
    pub factors: Vec<VarId>,
}

impl Term {
    pub fn evaluate(&self, values: &Assignment) -> Option<f64> {
        self.factors
            .iter()
            .try_fold(self.coef, |acc, id| values.get(id).map(|v| acc * v))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expression {
    pub terms: Vec<Term>,
}

impl Expression {
    pub fn evaluate(&self, values: &Assignment) -> Option<f64> {
        self.terms
            .iter()
            .try_fold(0.0, |acc, term| term.evaluate(values).map(|v| acc + v))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// `lower <= expr <= upper`; at least one side is present.
    Bounded {
        expr: Expression,
        lower: Option<f64>,
        upper: Option<f64>,
    },
    /// Sorted, no duplicates.
    AllDifferent { vars: Vec<VarId> },
}

impl Constraint {
    /// `None` when the assignment misses a referenced variable.
    pub fn is_satisfied(&self, values: &Assignment) -> Option<bool> {
        match self {
            Constraint::Bounded { expr, lower, upper } => {
                let activity = expr.evaluate(values)?;
                let above = lower.map_or(true, |l| activity >= l - FEASIBILITY_TOLERANCE);
                let below = upper.map_or(true, |u| activity <= u + FEASIBILITY_TOLERANCE);
                Some(above && below)
            }
            Constraint::AllDifferent { vars } => {
                let mut seen: Vec<f64> = Vec::with_capacity(vars.len());
                for id in vars {
                    let value = *values.get(id)?;
                    if seen
                        .iter()
                        .any(|v| (v - value).abs() <= FEASIBILITY_TOLERANCE)
                    {
                        return Some(false);
                    }
                    seen.push(value);
                }
                Some(true)
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factors = self.factors.join("*");
        if self.coef == 1.0 {
            write!(f, "{factors}")
        } else {
            write!(f, "{}*{factors}", self.coef)
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "0");
        }
        for (i, term) in self.terms.iter().take(DISPLAY_TERMS).enumerate() {
            match (i, term.coef < 0.0) {
                (0, _) => write!(f, "{term}")?,
                (_, true) => write!(f, " - {}", Term { coef: -term.coef, factors: term.factors.clone() })?,
                (_, false) => write!(f, " + {term}")?,
            }
        }
        if self.terms.len() > DISPLAY_TERMS {
            write!(f, " + ...")?;
        }
        Ok(())
    }
}

/// Renders the canonical form, e.g. `2*x + y <= 4` or `all_different(a, b)`.
/// Messages name constraints this way because positions change under
/// canonical ordering.
impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Bounded { expr, lower, upper } => match (lower, upper) {
                (Some(l), Some(u)) if l == u => write!(f, "{expr} = {u}"),
                (Some(l), Some(u)) => write!(f, "{l} <= {expr} <= {u}"),
                (Some(l), None) => write!(f, "{expr} >= {l}"),
                (None, Some(u)) => write!(f, "{expr} <= {u}"),
                (None, None) => write!(f, "{expr}"),
            },
            Constraint::AllDifferent { vars } => write!(f, "all_different({})", vars.join(", ")),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SolverDirection {
    Maximize,
    Minimize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub direction: SolverDirection,
    pub expr: Expression,
    pub constant: f64,
}

impl Objective {
    pub fn evaluate(&self, values: &Assignment) -> Option<f64> {
        self.expr.evaluate(values).map(|v| v + self.constant)
    }
}

/// A normalized optimization problem. Variables are sorted by id and
/// constraints are in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemSpec {
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
    pub objective: Option<Objective>,
}

/// Which value a search tries first, and therefore which of several equally
/// good assignments is reported.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TieBreakPolicy {
    #[default]
    Lowest,
    Highest,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveConfig {
    pub time_limit: Option<Duration>,
    pub worker_count: Option<usize>,
    pub tie_break: TieBreakPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveRequest {
    pub problem: ProblemSpec,
    pub config: SolveConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> Assignment {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_expression_evaluate_with_product_term() {
        let expr = Expression {
            terms: vec![
                Term { coef: 2.0, factors: vec!["x".into()] },
                Term { coef: 3.0, factors: vec!["x".into(), "y".into()] },
            ],
        };
        assert_eq!(expr.evaluate(&values(&[("x", 1.0), ("y", 1.0)])), Some(5.0));
        assert_eq!(expr.evaluate(&values(&[("x", 1.0)])), None);
    }

    #[test]
    fn test_all_different_detects_repeated_value() {
        let constraint = Constraint::AllDifferent { vars: vec!["a".into(), "b".into()] };
        assert_eq!(constraint.is_satisfied(&values(&[("a", 1.0), ("b", 2.0)])), Some(true));
        assert_eq!(constraint.is_satisfied(&values(&[("a", 2.0), ("b", 2.0)])), Some(false));
    }

    #[test]
    fn test_constraint_display_uses_content() {
        let row = Constraint::Bounded {
            expr: Expression {
                terms: vec![
                    Term { coef: 2.0, factors: vec!["x".into()] },
                    Term { coef: -1.0, factors: vec!["a".into(), "b".into()] },
                ],
            },
            lower: None,
            upper: Some(4.0),
        };
        assert_eq!(row.to_string(), "2*x - a*b <= 4");

        let eq = Constraint::Bounded {
            expr: Expression { terms: vec![Term { coef: 1.0, factors: vec!["y".into()] }] },
            lower: Some(1.5),
            upper: Some(1.5),
        };
        assert_eq!(eq.to_string(), "y = 1.5");

        let group = Constraint::AllDifferent { vars: vec!["a".into(), "b".into()] };
        assert_eq!(group.to_string(), "all_different(a, b)");
    }

    #[test]
    fn test_domain_binary_detection() {
        assert!(Domain::Integer { lower: 0, upper: 1 }.is_binary());
        assert!(Domain::Set { values: vec![0.0, 1.0] }.is_binary());
        assert!(!Domain::Integer { lower: 0, upper: 2 }.is_binary());
        assert!(!Domain::Real { lower: 0.0, upper: 1.0 }.is_binary());
    }
}
