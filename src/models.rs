use serde::{Deserialize, Serialize};

use crate::domain::problem::{SolverDirection, TieBreakPolicy};

// ---------- API (wire) types: owned & serde-friendly ----------
//
// Nothing here is validated. The normalizer turns these into the typed
// `ProblemSpec` and rejects anything inconsistent.

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiDomain {
    Range {
        lower: Option<f64>,
        upper: Option<f64>,
        #[serde(default)]
        integer: bool,
    },
    Set {
        values: Vec<f64>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiVariable {
    pub id: String,
    pub domain: ApiDomain,
}

/// `coef * vars[0] * vars[1] * ...`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiTerm {
    pub coef: f64,
    pub vars: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiRelation {
    Le,
    Ge,
    Eq,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiConstraint {
    Linear {
        terms: Vec<ApiTerm>,
        op: ApiRelation,
        rhs: f64,
    },
    Range {
        terms: Vec<ApiTerm>,
        lower: Option<f64>,
        upper: Option<f64>,
    },
    AllDifferent {
        vars: Vec<String>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiObjective {
    pub direction: SolverDirection,
    #[serde(default)]
    pub terms: Vec<ApiTerm>,
    #[serde(default)]
    pub constant: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiProblem {
    pub variables: Vec<ApiVariable>,
    #[serde(default)]
    pub constraints: Vec<ApiConstraint>,
    #[serde(default)]
    pub objective: Option<ApiObjective>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ApiSolveConfig {
    pub time_limit_ms: Option<u64>,
    pub worker_count: Option<usize>,
    pub tie_break: Option<TieBreakPolicy>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiSolveRequest {
    pub problem: ApiProblem,
    #[serde(default)]
    pub config: ApiSolveConfig,
}
