#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::{json, Value};

use optimizer_api::domain::model::SolverModel;
use optimizer_api::domain::solver::{CancelFlag, NativeSolution, NativeStatus, SolveParams, Solver};
use optimizer_api::domain::solvers::SearchSolver;
use optimizer_api::error::InternalSolverError;
use optimizer_api::models::ApiSolveRequest;
use optimizer_api::service::OrchestratorConfig;

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        workers: 2,
        queue_capacity: 16,
        default_time_limit: Duration::from_secs(5),
        max_time_limit: Duration::from_secs(10),
        cache_capacity: 64,
        cache_ttl: Duration::from_secs(60),
        shards: 4,
    }
}

pub fn request(value: Value) -> ApiSolveRequest {
    serde_json::from_value(value).expect("valid request json")
}

/// Small knapsack with a unique optimum: b = d = 1, objective 13.
pub fn knapsack() -> Value {
    json!({
        "problem": {
            "variables": [
                {"id": "a", "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}},
                {"id": "b", "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}},
                {"id": "c", "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}},
                {"id": "d", "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}}
            ],
            "constraints": [
                {"kind": "linear", "op": "le", "rhs": 10, "terms": [
                    {"coef": 3, "vars": ["a"]}, {"coef": 4, "vars": ["b"]},
                    {"coef": 5, "vars": ["c"]}, {"coef": 6, "vars": ["d"]}
                ]}
            ],
            "objective": {"direction": "maximize", "terms": [
                {"coef": 4, "vars": ["a"]}, {"coef": 5, "vars": ["b"]},
                {"coef": 6, "vars": ["c"]}, {"coef": 8, "vars": ["d"]}
            ]}
        }
    })
}

/// `x = 1` and `x = 2` over {1, 2}.
pub fn contradictory() -> Value {
    json!({
        "problem": {
            "variables": [{"id": "x", "domain": {"kind": "set", "values": [1, 2]}}],
            "constraints": [
                {"kind": "linear", "terms": [{"coef": 1, "vars": ["x"]}], "op": "eq", "rhs": 1},
                {"kind": "linear", "terms": [{"coef": 1, "vars": ["x"]}], "op": "eq", "rhs": 2}
            ]
        }
    })
}

/// Even weights can never reach an odd total, and bound propagation cannot
/// see it, so the search runs until its deadline.
pub fn parity(time_limit_ms: u64) -> Value {
    let variables: Vec<Value> = (0..36)
        .map(|i| json!({"id": format!("x{i:02}"), "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}}))
        .collect();
    let terms: Vec<Value> = (0..36)
        .map(|i| json!({"coef": 2 * (i + 1), "vars": [format!("x{i:02}")]}))
        .collect();
    json!({
        "problem": {
            "variables": variables,
            "constraints": [{"kind": "linear", "terms": terms, "op": "eq", "rhs": 333}]
        },
        "config": {"time_limit_ms": time_limit_ms}
    })
}

/// Maximize the packed weight of 40 even-weight items under an odd capacity.
/// The first leaf is already feasible, but the objective bound ignores the
/// capacity row, so optimality cannot be proven within a short budget.
pub fn even_knapsack(time_limit_ms: u64) -> Value {
    let variables: Vec<Value> = (0..40)
        .map(|i| json!({"id": format!("item{i:02}"), "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}}))
        .collect();
    let terms: Vec<Value> = (0..40)
        .map(|i| json!({"coef": 2 * (i + 1), "vars": [format!("item{i:02}")]}))
        .collect();
    json!({
        "problem": {
            "variables": variables,
            "constraints": [{"kind": "linear", "terms": terms.clone(), "op": "le", "rhs": 801}],
            "objective": {"direction": "maximize", "terms": terms}
        },
        "config": {"time_limit_ms": time_limit_ms}
    })
}

/// Weight of item `id` in [`even_knapsack`].
pub fn even_knapsack_weight(id: &str) -> f64 {
    id.trim_start_matches("item")
        .parse::<f64>()
        .map_or(0.0, |i| 2.0 * (i + 1.0))
}

/// One free integer variable; `upper` makes otherwise identical requests
/// distinct.
pub fn single(upper: i64) -> Value {
    json!({
        "problem": {
            "variables": [{"id": "x", "domain": {"kind": "range", "lower": 0, "upper": upper, "integer": true}}],
            "objective": {"direction": "maximize", "terms": [{"coef": 1, "vars": ["x"]}]}
        }
    })
}

/// Real search backend that counts calls and can be slowed down.
pub struct CountingSolver {
    inner: SearchSolver,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingSolver {
    pub fn new(delay: Duration) -> Self {
        CountingSolver {
            inner: SearchSolver::new(),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Solver for CountingSolver {
    fn solve_model(
        &self,
        model: &SolverModel,
        params: &SolveParams,
        cancel: &CancelFlag,
    ) -> Result<NativeSolution, InternalSolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.inner.solve_model(model, params, cancel)
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Error,
    Panic,
}

/// Fails the first `failures` calls, then behaves like the search backend.
pub struct FlakySolver {
    inner: SearchSolver,
    fault: Fault,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakySolver {
    pub fn new(fault: Fault, failures: usize) -> Self {
        FlakySolver {
            inner: SearchSolver::new(),
            fault,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Solver for FlakySolver {
    fn solve_model(
        &self,
        model: &SolverModel,
        params: &SolveParams,
        cancel: &CancelFlag,
    ) -> Result<NativeSolution, InternalSolverError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            match self.fault {
                Fault::Error => return Err(InternalSolverError(format!("fault #{call}"))),
                Fault::Panic => panic!("backend panic #{call}"),
            }
        }
        self.inner.solve_model(model, params, cancel)
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Runs until cancelled or out of time, announcing each start.
pub struct BlockingSolver {
    calls: AtomicUsize,
    started: Sender<()>,
}

impl BlockingSolver {
    pub fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = unbounded();
        (
            BlockingSolver {
                calls: AtomicUsize::new(0),
                started: tx,
            },
            rx,
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Solver for BlockingSolver {
    fn solve_model(
        &self,
        _model: &SolverModel,
        params: &SolveParams,
        cancel: &CancelFlag,
    ) -> Result<NativeSolution, InternalSolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.started.send(());
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Ok(NativeSolution::empty(NativeStatus::Interrupted, 0));
            }
            if started.elapsed() >= params.time_limit {
                return Ok(NativeSolution::empty(NativeStatus::TimeLimit, 0));
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn name(&self) -> &str {
        "blocking"
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
