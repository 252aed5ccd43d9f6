use std::collections::{BTreeMap, HashMap};

use crate::domain::problem::{Constraint, Domain, Expression, ProblemSpec, SolverDirection};
use crate::error::UnsupportedConstraintError;

/// Integer ranges up to this many values are expanded into explicit value
/// lists so that individual values can be removed during search.
pub const ENUMERATION_LIMIT: i64 = 4096;

/// Variable domain in the form the search backend works with.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeDomain {
    /// Sorted ascending, non-empty.
    Values(Vec<f64>),
    IntRange { lower: i64, upper: i64 },
    Continuous { lower: f64, upper: f64 },
}

impl NativeDomain {
    pub fn is_continuous(&self) -> bool {
        matches!(self, NativeDomain::Continuous { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelVar {
    pub name: String,
    pub domain: NativeDomain,
}

/// `lower <= sum(coef * x) <= upper`; infinite bounds mean "absent".
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRow {
    pub coefs: Vec<(usize, f64)>,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelObjective {
    pub direction: SolverDirection,
    pub coefs: Vec<(usize, f64)>,
    pub constant: f64,
}

impl ModelObjective {
    /// Objective value in "maximize" orientation.
    pub fn oriented(&self, value: f64) -> f64 {
        match self.direction {
            SolverDirection::Maximize => value,
            SolverDirection::Minimize => -value,
        }
    }
}

/// Solver-ready model. The first `spec.variables.len()` entries of `vars` are
/// the declared variables in declaration order; auxiliary variables follow.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverModel {
    pub vars: Vec<ModelVar>,
    pub rows: Vec<LinearRow>,
    pub all_different: Vec<Vec<usize>>,
    pub objective: Option<ModelObjective>,
    pub spec: ProblemSpec,
}

impl SolverModel {
    pub fn declared_count(&self) -> usize {
        self.spec.variables.len()
    }

    pub fn auxiliary_count(&self) -> usize {
        self.vars.len() - self.declared_count()
    }
}

/// Translate a normalized problem into a solver model.
///
/// Linear terms map one to one onto row coefficients. A product of two 0/1
/// variables becomes an auxiliary 0/1 variable `z` with `z <= a`, `z <= b`
/// and `z >= a + b - 1`. Anything else non-linear is rejected.
pub fn build(spec: ProblemSpec) -> Result<SolverModel, UnsupportedConstraintError> {
    let mut builder = ModelBuilder::new(&spec);

    for constraint in &spec.constraints {
        let context = format!("constraint `{constraint}`");
        match constraint {
            Constraint::Bounded { expr, lower, upper } => {
                let coefs = builder.linearize(expr, &context)?;
                builder.rows.push(LinearRow {
                    coefs,
                    lower: lower.unwrap_or(f64::NEG_INFINITY),
                    upper: upper.unwrap_or(f64::INFINITY),
                });
            }
            Constraint::AllDifferent { vars } => {
                let mut group = Vec::with_capacity(vars.len());
                for id in vars {
                    let idx = builder.index_of(id, &context)?;
                    if builder.vars[idx].domain.is_continuous() {
                        return Err(UnsupportedConstraintError {
                            reason: format!(
                                "all_different over continuous variable '{id}' in {context}"
                            ),
                        });
                    }
                    group.push(idx);
                }
                if group.len() > 1 {
                    builder.all_different.push(group);
                }
            }
        }
    }

    let objective = match &spec.objective {
        Some(objective) => Some(ModelObjective {
            direction: objective.direction,
            coefs: builder.linearize(&objective.expr, "objective")?,
            constant: objective.constant,
        }),
        None => None,
    };

    let (vars, rows, all_different) = builder.finish();

    Ok(SolverModel {
        vars,
        rows,
        all_different,
        objective,
        spec,
    })
}

fn native_domain(domain: &Domain) -> NativeDomain {
    match domain {
        Domain::Integer { lower, upper } if upper - lower < ENUMERATION_LIMIT => {
            NativeDomain::Values((*lower..=*upper).map(|v| v as f64).collect())
        }
        Domain::Integer { lower, upper } => NativeDomain::IntRange {
            lower: *lower,
            upper: *upper,
        },
        Domain::Real { lower, upper } => NativeDomain::Continuous {
            lower: *lower,
            upper: *upper,
        },
        Domain::Set { values } => NativeDomain::Values(values.clone()),
    }
}

struct ModelBuilder<'a> {
    spec: &'a ProblemSpec,
    index: HashMap<&'a str, usize>,
    vars: Vec<ModelVar>,
    rows: Vec<LinearRow>,
    all_different: Vec<Vec<usize>>,
    products: HashMap<(usize, usize), usize>,
}

impl<'a> ModelBuilder<'a> {
    fn new(spec: &'a ProblemSpec) -> Self {
        let vars = spec
            .variables
            .iter()
            .map(|v| ModelVar {
                name: v.id.clone(),
                domain: native_domain(&v.domain),
            })
            .collect();
        let index = spec
            .variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id.as_str(), i))
            .collect();
        ModelBuilder {
            spec,
            index,
            vars,
            rows: Vec::new(),
            all_different: Vec::new(),
            products: HashMap::new(),
        }
    }

    fn finish(self) -> (Vec<ModelVar>, Vec<LinearRow>, Vec<Vec<usize>>) {
        (self.vars, self.rows, self.all_different)
    }

    fn index_of(&self, id: &str, context: &str) -> Result<usize, UnsupportedConstraintError> {
        // The normalizer rejects undeclared ids; this only guards hand-built specs.
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| UnsupportedConstraintError {
                reason: format!("unknown variable '{id}' in {context}"),
            })
    }

    fn is_binary(&self, idx: usize) -> bool {
        self.spec
            .variables
            .get(idx)
            .map_or(false, |v| v.domain.is_binary())
    }

    fn linearize(
        &mut self,
        expr: &Expression,
        context: &str,
    ) -> Result<Vec<(usize, f64)>, UnsupportedConstraintError> {
        let mut coefs: BTreeMap<usize, f64> = BTreeMap::new();
        for term in &expr.terms {
            let idx = match term.factors.as_slice() {
                [single] => self.index_of(single, context)?,
                [a, b] => {
                    let (ia, ib) = (self.index_of(a, context)?, self.index_of(b, context)?);
                    if !self.is_binary(ia) || !self.is_binary(ib) {
                        return Err(UnsupportedConstraintError {
                            reason: format!(
                                "product '{a}' * '{b}' in {context} needs both variables in {{0, 1}}"
                            ),
                        });
                    }
                    if ia == ib {
                        ia
                    } else {
                        self.product_var(ia, ib)
                    }
                }
                factors => {
                    return Err(UnsupportedConstraintError {
                        reason: format!("term of degree {} in {context}", factors.len()),
                    })
                }
            };
            *coefs.entry(idx).or_insert(0.0) += term.coef;
        }
        Ok(coefs.into_iter().filter(|(_, c)| *c != 0.0).collect())
    }

    fn product_var(&mut self, a: usize, b: usize) -> usize {
        let key = (a.min(b), a.max(b));
        if let Some(&z) = self.products.get(&key) {
            return z;
        }
        let z = self.vars.len();
        self.vars.push(ModelVar {
            name: format!("{}*{}", self.vars[key.0].name, self.vars[key.1].name),
            domain: NativeDomain::Values(vec![0.0, 1.0]),
        });
        self.rows.push(LinearRow {
            coefs: vec![(z, 1.0), (a, -1.0)],
            lower: f64::NEG_INFINITY,
            upper: 0.0,
        });
        self.rows.push(LinearRow {
            coefs: vec![(z, 1.0), (b, -1.0)],
            lower: f64::NEG_INFINITY,
            upper: 0.0,
        });
        self.rows.push(LinearRow {
            coefs: vec![(z, 1.0), (a, -1.0), (b, -1.0)],
            lower: -1.0,
            upper: f64::INFINITY,
        });
        self.products.insert(key, z);
        z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::normalize::normalize;
    use crate::models::ApiProblem;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> ProblemSpec {
        let raw: ApiProblem = serde_json::from_value(value).expect("valid json");
        normalize(raw).expect("valid problem").0
    }

    fn binary_pair(terms: serde_json::Value) -> ProblemSpec {
        spec(json!({
            "variables": [
                {"id": "a", "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}},
                {"id": "b", "domain": {"kind": "set", "values": [0, 1]}},
                {"id": "c", "domain": {"kind": "range", "lower": 0, "upper": 3, "integer": true}},
                {"id": "r", "domain": {"kind": "range", "lower": 0, "upper": 2.5}}
            ],
            "constraints": [
                {"kind": "linear", "terms": terms, "op": "le", "rhs": 1}
            ]
        }))
    }

    #[test]
    fn test_build_maps_domains() {
        let model = build(binary_pair(json!([{"coef": 1, "vars": ["a"]}]))).expect("builds");
        assert_eq!(model.vars[0].domain, NativeDomain::Values(vec![0.0, 1.0]));
        assert_eq!(
            model.vars[2].domain,
            NativeDomain::Values(vec![0.0, 1.0, 2.0, 3.0])
        );
        assert_eq!(
            model.vars[3].domain,
            NativeDomain::Continuous { lower: 0.0, upper: 2.5 }
        );
        assert_eq!(model.rows.len(), 1);
        assert_eq!(model.rows[0].upper, 1.0);
        assert!(model.rows[0].lower.is_infinite());
    }

    #[test]
    fn test_build_linearizes_binary_product() {
        let model = build(binary_pair(json!([
            {"coef": 2, "vars": ["a", "b"]},
            {"coef": 1, "vars": ["b", "a"]}
        ])))
        .expect("builds");
        assert_eq!(model.auxiliary_count(), 1);
        // three linking rows plus the constraint itself
        assert_eq!(model.rows.len(), 4);
        assert_eq!(model.rows[3].coefs, vec![(4, 3.0)]);
    }

    #[test]
    fn test_build_reduces_square_of_binary() {
        let model = build(binary_pair(json!([{"coef": 1, "vars": ["a", "a"]}]))).expect("builds");
        assert_eq!(model.auxiliary_count(), 0);
        assert_eq!(model.rows[0].coefs, vec![(0, 1.0)]);
    }

    #[test]
    fn test_build_given_non_binary_product_should_return_error() {
        let err = build(binary_pair(json!([{"coef": 1, "vars": ["a", "c"]}]))).unwrap_err();
        assert!(err.reason.contains("'a' * 'c'"));
    }

    #[test]
    fn test_build_error_names_constraint_by_content() {
        let problem = spec(json!({
            "variables": [
                {"id": "a", "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}},
                {"id": "b", "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}},
                {"id": "x", "domain": {"kind": "range", "lower": 0, "upper": 3, "integer": true}}
            ],
            "constraints": [
                {"kind": "linear", "terms": [{"coef": 1, "vars": ["x"]}], "op": "le", "rhs": 1},
                {"kind": "linear", "terms": [{"coef": 1, "vars": ["a", "b", "x"]}], "op": "le", "rhs": 2}
            ]
        }));
        let err = build(problem).unwrap_err();
        assert!(err.reason.contains("a*b*x <= 2"), "{}", err.reason);
        assert!(!err.reason.contains("constraint 0"));
    }

    #[test]
    fn test_build_given_cubic_term_should_return_error() {
        let err = build(binary_pair(json!([{"coef": 1, "vars": ["a", "b", "a"]}]))).unwrap_err();
        assert!(err.reason.contains("degree 3"));
    }

    #[test]
    fn test_build_given_all_different_over_reals_should_return_error() {
        let problem = spec(json!({
            "variables": [
                {"id": "a", "domain": {"kind": "range", "lower": 0, "upper": 3, "integer": true}},
                {"id": "r", "domain": {"kind": "range", "lower": 0, "upper": 3}}
            ],
            "constraints": [{"kind": "all_different", "vars": ["a", "r"]}]
        }));
        assert!(build(problem).is_err());
    }

    #[test]
    fn test_build_keeps_large_integer_range_as_interval() {
        let problem = spec(json!({
            "variables": [
                {"id": "big", "domain": {"kind": "range", "lower": 0, "upper": 1000000, "integer": true}}
            ]
        }));
        let model = build(problem).expect("builds");
        assert_eq!(
            model.vars[0].domain,
            NativeDomain::IntRange { lower: 0, upper: 1_000_000 }
        );
    }
}
