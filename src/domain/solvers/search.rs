//! Native branch-and-bound backend.
//!
//! Depth-first search over the discrete variables with bound propagation on
//! linear rows and value elimination for all-different groups. Leaves that
//! still contain continuous variables are finished with an LP solve. The
//! deadline and the cancel flag are polled every `poll_interval` nodes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use log::{debug, trace};

use crate::domain::model::{LinearRow, ModelObjective, NativeDomain, SolverModel};
use crate::domain::problem::TieBreakPolicy;
use crate::domain::solver::{CancelFlag, NativeSolution, NativeStatus, SolveParams, Solver};
use crate::domain::solvers::lp_leaf::solve_leaf;
use crate::error::InternalSolverError;

pub const DEFAULT_POLL_INTERVAL: u64 = 256;

/// Propagation stops after this many sweeps even if bounds still move.
const MAX_PROPAGATION_SWEEPS: usize = 32;

/// Value lists up to this size are branched on value by value; larger
/// domains are split in half.
const ENUMERATE_BRANCH_LIMIT: usize = 16;

const EPS: f64 = 1e-6;

/// Branch-and-bound solver implementation
pub struct SearchSolver {
    poll_interval: u64,
}

impl SearchSolver {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: u64) -> Self {
        SearchSolver {
            poll_interval: poll_interval.max(1),
        }
    }
}

impl Default for SearchSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for SearchSolver {
    fn solve_model(
        &self,
        model: &SolverModel,
        params: &SolveParams,
        cancel: &CancelFlag,
    ) -> Result<NativeSolution, InternalSolverError> {
        let limits = Limits {
            deadline: Instant::now() + params.time_limit,
            cancel,
            poll_interval: self.poll_interval,
            best: SharedBest::new(),
        };

        let mut root = Node::root(model);
        if root.propagate(model).is_err() {
            debug!("Root propagation proved infeasibility");
            return Ok(NativeSolution::empty(NativeStatus::Infeasible, 1));
        }

        let partitions = if params.worker_count > 1 && model.objective.is_some() {
            root.partition(params.worker_count, params.tie_break)
        } else {
            vec![root]
        };

        let outcomes: Vec<Result<Outcome, InternalSolverError>> = if partitions.len() == 1 {
            partitions
                .into_iter()
                .map(|node| Search::new(model, params.tie_break, &limits).run(node))
                .collect()
        } else {
            debug!("Splitting root into {} partitions", partitions.len());
            thread::scope(|scope| {
                let handles: Vec<_> = partitions
                    .into_iter()
                    .map(|node| {
                        let limits = &limits;
                        scope.spawn(move || Search::new(model, params.tie_break, limits).run(node))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join().unwrap_or_else(|_| {
                            Err(InternalSolverError("search worker panicked".to_string()))
                        })
                    })
                    .collect()
            })
        };

        merge(model, outcomes)
    }

    fn name(&self) -> &str {
        "search"
    }
}

/// Combine per-partition outcomes. Ties go to the earliest partition, which
/// is the one explored first under the tie-break policy.
fn merge(
    model: &SolverModel,
    outcomes: Vec<Result<Outcome, InternalSolverError>>,
) -> Result<NativeSolution, InternalSolverError> {
    let mut nodes = 0;
    let mut halted: Option<Halt> = None;
    let mut best: Option<Incumbent> = None;

    for outcome in outcomes {
        let outcome = outcome?;
        nodes += outcome.nodes;
        halted = match (halted, outcome.halted) {
            (Some(Halt::Cancelled), _) | (_, Some(Halt::Cancelled)) => Some(Halt::Cancelled),
            (Some(h), _) | (None, Some(h)) => Some(h),
            (None, None) => None,
        };
        if let Some(candidate) = outcome.incumbent {
            let better = best
                .as_ref()
                .map_or(true, |b| candidate.score > b.score + EPS);
            if better {
                best = Some(candidate);
            }
        }
    }

    let status = match (halted, &best) {
        (Some(Halt::Cancelled), _) => NativeStatus::Interrupted,
        (Some(Halt::Deadline), _) => NativeStatus::TimeLimit,
        (None, Some(_)) if model.objective.is_some() => NativeStatus::Optimal,
        (None, Some(_)) => NativeStatus::Feasible,
        (None, None) => NativeStatus::Infeasible,
    };

    Ok(match best {
        Some(inc) => NativeSolution {
            status,
            values: Some(inc.values),
            objective: inc.objective,
            nodes,
        },
        None => NativeSolution::empty(status, nodes),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Deadline,
    Cancelled,
}

struct Limits<'a> {
    deadline: Instant,
    cancel: &'a CancelFlag,
    poll_interval: u64,
    best: SharedBest,
}

/// Best oriented objective seen by any partition, stored as `f64` bits.
struct SharedBest {
    bits: AtomicU64,
    set: AtomicBool,
}

impl SharedBest {
    fn new() -> Self {
        SharedBest {
            bits: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
            set: AtomicBool::new(false),
        }
    }

    fn get(&self) -> Option<f64> {
        self.set
            .load(Ordering::Acquire)
            .then(|| f64::from_bits(self.bits.load(Ordering::Acquire)))
    }

    fn offer(&self, score: f64) {
        let mut current = self.bits.load(Ordering::Acquire);
        while score > f64::from_bits(current) {
            match self.bits.compare_exchange_weak(
                current,
                score.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.set.store(true, Ordering::Release);
    }
}

struct Incumbent {
    values: Vec<f64>,
    objective: Option<f64>,
    /// Objective in maximize orientation; 0 for satisfaction problems.
    score: f64,
}

struct Outcome {
    incumbent: Option<Incumbent>,
    halted: Option<Halt>,
    nodes: u64,
}

struct Wipeout;

#[derive(Debug, Clone, PartialEq)]
enum Dom {
    /// Sorted, non-empty.
    Values(Vec<f64>),
    Range { lo: i64, hi: i64 },
    Continuous { lo: f64, hi: f64 },
}

impl Dom {
    fn from_native(domain: &NativeDomain) -> Self {
        match domain {
            NativeDomain::Values(values) => Dom::Values(values.clone()),
            NativeDomain::IntRange { lower, upper } => Dom::Range {
                lo: *lower,
                hi: *upper,
            },
            NativeDomain::Continuous { lower, upper } => Dom::Continuous {
                lo: *lower,
                hi: *upper,
            },
        }
    }

    fn bounds(&self) -> (f64, f64) {
        match self {
            Dom::Values(values) => (values[0], values[values.len() - 1]),
            Dom::Range { lo, hi } => (*lo as f64, *hi as f64),
            Dom::Continuous { lo, hi } => (*lo, *hi),
        }
    }

    fn is_discrete(&self) -> bool {
        !matches!(self, Dom::Continuous { .. })
    }

    /// Number of values; `u64::MAX` for continuous domains.
    fn size(&self) -> u64 {
        match self {
            Dom::Values(values) => values.len() as u64,
            Dom::Range { lo, hi } => (hi - lo) as u64 + 1,
            Dom::Continuous { .. } => u64::MAX,
        }
    }

    fn fixed_value(&self) -> Option<f64> {
        match self {
            Dom::Values(values) if values.len() == 1 => Some(values[0]),
            Dom::Range { lo, hi } if lo == hi => Some(*lo as f64),
            _ => None,
        }
    }

    fn tighten_max(&mut self, bound: f64) -> Result<bool, Wipeout> {
        match self {
            Dom::Values(values) => {
                let keep = values.partition_point(|v| *v <= bound + EPS);
                if keep == 0 {
                    return Err(Wipeout);
                }
                let changed = keep < values.len();
                values.truncate(keep);
                Ok(changed)
            }
            Dom::Range { lo, hi } => {
                let b = (bound + EPS).floor();
                if b >= *hi as f64 {
                    Ok(false)
                } else if b < *lo as f64 {
                    Err(Wipeout)
                } else {
                    *hi = b as i64;
                    Ok(true)
                }
            }
            Dom::Continuous { lo, hi } => {
                if bound < *lo - EPS {
                    Err(Wipeout)
                } else if bound < *hi - EPS {
                    *hi = bound.max(*lo);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn tighten_min(&mut self, bound: f64) -> Result<bool, Wipeout> {
        match self {
            Dom::Values(values) => {
                let drop = values.partition_point(|v| *v < bound - EPS);
                if drop == values.len() {
                    return Err(Wipeout);
                }
                values.drain(..drop);
                Ok(drop > 0)
            }
            Dom::Range { lo, hi } => {
                let b = (bound - EPS).ceil();
                if b <= *lo as f64 {
                    Ok(false)
                } else if b > *hi as f64 {
                    Err(Wipeout)
                } else {
                    *lo = b as i64;
                    Ok(true)
                }
            }
            Dom::Continuous { lo, hi } => {
                if bound > *hi + EPS {
                    Err(Wipeout)
                } else if bound > *lo + EPS {
                    *lo = bound.min(*hi);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Remove one value. Interval domains can only lose their endpoints.
    fn remove(&mut self, value: f64) -> Result<bool, Wipeout> {
        match self {
            Dom::Values(values) => {
                let before = values.len();
                values.retain(|v| (v - value).abs() > EPS);
                if values.is_empty() {
                    return Err(Wipeout);
                }
                Ok(values.len() != before)
            }
            Dom::Range { lo, hi } => {
                if (*lo as f64 - value).abs() <= EPS {
                    if lo == hi {
                        return Err(Wipeout);
                    }
                    *lo += 1;
                    Ok(true)
                } else if (*hi as f64 - value).abs() <= EPS {
                    *hi -= 1;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Dom::Continuous { .. } => Ok(false),
        }
    }

    /// Child domains in exploration order.
    fn branches(&self, tie_break: TieBreakPolicy) -> Vec<Dom> {
        let mut children = match self {
            Dom::Values(values) if values.len() <= ENUMERATE_BRANCH_LIMIT => {
                values.iter().map(|v| Dom::Values(vec![*v])).collect()
            }
            Dom::Values(values) => {
                let mid = values.len() / 2;
                vec![
                    Dom::Values(values[..mid].to_vec()),
                    Dom::Values(values[mid..].to_vec()),
                ]
            }
            Dom::Range { lo, hi } => {
                let mid = lo + (hi - lo) / 2;
                vec![
                    Dom::Range { lo: *lo, hi: mid },
                    Dom::Range { lo: mid + 1, hi: *hi },
                ]
            }
            Dom::Continuous { .. } => Vec::new(),
        };
        if tie_break == TieBreakPolicy::Highest {
            children.reverse();
        }
        children
    }

    /// Split into at most `parts` contiguous pieces, in exploration order.
    fn split(&self, parts: usize, tie_break: TieBreakPolicy) -> Vec<Dom> {
        let parts = (parts as u64).min(self.size()).max(1);
        let mut pieces = match self {
            Dom::Values(values) => {
                let chunk = (values.len() as u64).div_ceil(parts) as usize;
                values.chunks(chunk).map(|c| Dom::Values(c.to_vec())).collect()
            }
            Dom::Range { lo, hi } => {
                let width = ((hi - lo) as u64 + 1).div_ceil(parts) as i64;
                let mut pieces = Vec::with_capacity(parts as usize);
                let mut start = *lo;
                while start <= *hi {
                    let end = (start + width - 1).min(*hi);
                    pieces.push(Dom::Range { lo: start, hi: end });
                    start = end + 1;
                }
                pieces
            }
            Dom::Continuous { .. } => vec![self.clone()],
        };
        if tie_break == TieBreakPolicy::Highest {
            pieces.reverse();
        }
        pieces
    }
}

#[derive(Debug, Clone)]
struct Node {
    doms: Vec<Dom>,
}

impl Node {
    fn root(model: &SolverModel) -> Self {
        Node {
            doms: model
                .vars
                .iter()
                .map(|v| Dom::from_native(&v.domain))
                .collect(),
        }
    }

    fn propagate(&mut self, model: &SolverModel) -> Result<(), Wipeout> {
        for _ in 0..MAX_PROPAGATION_SWEEPS {
            let mut changed = false;
            for row in &model.rows {
                changed |= self.propagate_row(row)?;
            }
            for group in &model.all_different {
                changed |= self.propagate_all_different(group)?;
            }
            if !changed {
                break;
            }
        }
        Ok(())
    }

    fn activity_bounds(&self, row: &LinearRow) -> (f64, f64) {
        row.coefs.iter().fold((0.0, 0.0), |(min, max), &(i, c)| {
            let (lo, hi) = self.doms[i].bounds();
            if c > 0.0 {
                (min + c * lo, max + c * hi)
            } else {
                (min + c * hi, max + c * lo)
            }
        })
    }

    fn propagate_row(&mut self, row: &LinearRow) -> Result<bool, Wipeout> {
        let (min_act, max_act) = self.activity_bounds(row);
        if min_act > row.upper + EPS || max_act < row.lower - EPS {
            return Err(Wipeout);
        }

        let mut changed = false;
        for &(i, c) in &row.coefs {
            let (lo, hi) = self.doms[i].bounds();
            let (own_min, own_max) = if c > 0.0 {
                (c * lo, c * hi)
            } else {
                (c * hi, c * lo)
            };
            if row.upper.is_finite() {
                // c * x <= upper - (rest at its minimum)
                let slack = (row.upper - (min_act - own_min)) / c;
                changed |= if c > 0.0 {
                    self.doms[i].tighten_max(slack)?
                } else {
                    self.doms[i].tighten_min(slack)?
                };
            }
            if row.lower.is_finite() {
                let need = (row.lower - (max_act - own_max)) / c;
                changed |= if c > 0.0 {
                    self.doms[i].tighten_min(need)?
                } else {
                    self.doms[i].tighten_max(need)?
                };
            }
        }
        Ok(changed)
    }

    fn propagate_all_different(&mut self, group: &[usize]) -> Result<bool, Wipeout> {
        let mut changed = false;
        for (pos, &i) in group.iter().enumerate() {
            let Some(value) = self.doms[i].fixed_value() else {
                continue;
            };
            for (other_pos, &j) in group.iter().enumerate() {
                if other_pos == pos {
                    continue;
                }
                if let Some(other) = self.doms[j].fixed_value() {
                    if (other - value).abs() <= EPS {
                        return Err(Wipeout);
                    }
                    continue;
                }
                changed |= self.doms[j].remove(value)?;
            }
        }
        Ok(changed)
    }

    /// Upper bound on the oriented objective over this node's box.
    fn objective_bound(&self, objective: &ModelObjective) -> f64 {
        let sign = objective.oriented(1.0);
        objective
            .coefs
            .iter()
            .fold(sign * objective.constant, |acc, &(i, c)| {
                let (lo, hi) = self.doms[i].bounds();
                acc + (sign * c * lo).max(sign * c * hi)
            })
    }

    /// Unfixed discrete variable with the smallest domain.
    fn select_variable(&self) -> Option<usize> {
        self.doms
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_discrete() && d.fixed_value().is_none())
            .min_by_key(|(i, d)| (d.size(), *i))
            .map(|(i, _)| i)
    }

    fn partition(self, parts: usize, tie_break: TieBreakPolicy) -> Vec<Node> {
        let Some(i) = self.select_variable() else {
            return vec![self];
        };
        self.doms[i]
            .split(parts, tie_break)
            .into_iter()
            .map(|dom| {
                let mut child = self.clone();
                child.doms[i] = dom;
                child
            })
            .collect()
    }

    fn has_continuous(&self) -> bool {
        self.doms.iter().any(|d| !d.is_discrete())
    }

    fn rows_hold(&self, model: &SolverModel) -> bool {
        model.rows.iter().all(|row| {
            let discrete_only = row.coefs.iter().all(|&(i, _)| self.doms[i].is_discrete());
            if !discrete_only {
                return true;
            }
            let (activity, _) = self.activity_bounds(row);
            activity >= row.lower - EPS && activity <= row.upper + EPS
        })
    }
}

struct Search<'a> {
    model: &'a SolverModel,
    tie_break: TieBreakPolicy,
    limits: &'a Limits<'a>,
    nodes: u64,
    halted: Option<Halt>,
    incumbent: Option<Incumbent>,
}

impl<'a> Search<'a> {
    fn new(model: &'a SolverModel, tie_break: TieBreakPolicy, limits: &'a Limits<'a>) -> Self {
        Search {
            model,
            tie_break,
            limits,
            nodes: 0,
            halted: None,
            incumbent: None,
        }
    }

    fn run(mut self, node: Node) -> Result<Outcome, InternalSolverError> {
        self.dfs(node)?;
        trace!(
            "Partition finished after {} nodes (halted: {:?})",
            self.nodes,
            self.halted
        );
        Ok(Outcome {
            incumbent: self.incumbent,
            halted: self.halted,
            nodes: self.nodes,
        })
    }

    fn poll(&mut self) -> bool {
        if self.halted.is_some() {
            return true;
        }
        if self.limits.cancel.is_cancelled() {
            self.halted = Some(Halt::Cancelled);
        } else if Instant::now() >= self.limits.deadline {
            self.halted = Some(Halt::Deadline);
        }
        self.halted.is_some()
    }

    /// Returns `true` when the whole search should stop.
    fn dfs(&mut self, mut node: Node) -> Result<bool, InternalSolverError> {
        self.nodes += 1;
        if self.nodes % self.limits.poll_interval == 0 && self.poll() {
            return Ok(true);
        }
        if node.propagate(self.model).is_err() {
            return Ok(false);
        }
        if let Some(objective) = &self.model.objective {
            if !self.can_improve(node.objective_bound(objective)) {
                return Ok(false);
            }
        }

        let Some(i) = node.select_variable() else {
            self.evaluate_leaf(&node)?;
            let satisfied = self.model.objective.is_none() && self.incumbent.is_some();
            return Ok(satisfied || self.poll_after_leaf(&node));
        };

        for dom in node.doms[i].branches(self.tie_break) {
            let mut child = node.clone();
            child.doms[i] = dom;
            if self.dfs(child)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// LP leaves can be slow; check the clock after each one.
    fn poll_after_leaf(&mut self, node: &Node) -> bool {
        node.has_continuous() && self.poll()
    }

    fn can_improve(&self, bound: f64) -> bool {
        if let Some(inc) = &self.incumbent {
            if bound <= inc.score + EPS {
                return false;
            }
        }
        // Other partitions only prune what is strictly worse, so ties stay
        // with the partition explored first.
        match self.limits.best.get() {
            Some(shared) => bound >= shared - EPS,
            None => true,
        }
    }

    fn evaluate_leaf(&mut self, node: &Node) -> Result<(), InternalSolverError> {
        if !node.rows_hold(self.model) {
            return Ok(());
        }
        for group in &self.model.all_different {
            let mut seen: Vec<f64> = Vec::with_capacity(group.len());
            for &i in group {
                let value = node.doms[i].bounds().0;
                if seen.iter().any(|v| (v - value).abs() <= EPS) {
                    return Ok(());
                }
                seen.push(value);
            }
        }

        let values = if node.has_continuous() {
            let bounds: Vec<(f64, f64)> = node.doms.iter().map(Dom::bounds).collect();
            match solve_leaf(self.model, &bounds)? {
                Some(values) => values,
                None => return Ok(()),
            }
        } else {
            node.doms.iter().map(|d| d.bounds().0).collect()
        };

        let (objective, score) = match &self.model.objective {
            Some(obj) => {
                let value = obj
                    .coefs
                    .iter()
                    .fold(obj.constant, |acc, &(i, c)| acc + c * values[i]);
                (Some(value), obj.oriented(value))
            }
            None => (None, 0.0),
        };

        let improves = self
            .incumbent
            .as_ref()
            .map_or(true, |inc| score > inc.score + EPS);
        if improves {
            trace!("New incumbent with score {score} after {} nodes", self.nodes);
            self.limits.best.offer(score);
            self.incumbent = Some(Incumbent {
                values,
                objective,
                score,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::build;
    use crate::domain::normalize::normalize;
    use crate::models::ApiProblem;
    use serde_json::json;
    use std::time::Duration;

    fn model(value: serde_json::Value) -> SolverModel {
        let raw: ApiProblem = serde_json::from_value(value).expect("valid json");
        build(normalize(raw).expect("valid").0).expect("builds")
    }

    fn params(workers: usize, tie_break: TieBreakPolicy) -> SolveParams {
        SolveParams {
            time_limit: Duration::from_secs(10),
            worker_count: workers,
            tie_break,
        }
    }

    fn knapsack() -> SolverModel {
        // weights 3, 4, 5, 6; values 4, 5, 6, 8; capacity 10 -> best 13 with b and d
        model(json!({
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
        }))
    }

    #[test]
    fn test_solver_name() {
        assert_eq!(SearchSolver::new().name(), "search");
    }

    #[test]
    fn test_knapsack_optimum() {
        let m = knapsack();
        let solution = SearchSolver::new()
            .solve_model(&m, &params(1, TieBreakPolicy::Lowest), &CancelFlag::new())
            .expect("no fault");
        assert_eq!(solution.status, NativeStatus::Optimal);
        assert_eq!(solution.objective, Some(13.0));
        assert_eq!(solution.values, Some(vec![0.0, 1.0, 0.0, 1.0]));
    }

    #[test]
    fn test_parallel_search_matches_sequential() {
        let m = knapsack();
        let sequential = SearchSolver::new()
            .solve_model(&m, &params(1, TieBreakPolicy::Lowest), &CancelFlag::new())
            .expect("no fault");
        let parallel = SearchSolver::new()
            .solve_model(&m, &params(4, TieBreakPolicy::Lowest), &CancelFlag::new())
            .expect("no fault");
        assert_eq!(parallel.status, NativeStatus::Optimal);
        assert_eq!(parallel.objective, sequential.objective);
    }

    #[test]
    fn test_contradictory_equalities_are_infeasible() {
        let m = model(json!({
            "variables": [{"id": "x", "domain": {"kind": "set", "values": [1, 2]}}],
            "constraints": [
                {"kind": "linear", "terms": [{"coef": 1, "vars": ["x"]}], "op": "eq", "rhs": 1},
                {"kind": "linear", "terms": [{"coef": 1, "vars": ["x"]}], "op": "eq", "rhs": 2}
            ]
        }));
        let solution = SearchSolver::new()
            .solve_model(&m, &params(1, TieBreakPolicy::Lowest), &CancelFlag::new())
            .expect("no fault");
        assert_eq!(solution.status, NativeStatus::Infeasible);
        assert_eq!(solution.values, None);
    }

    #[test]
    fn test_tie_break_selects_lowest_or_highest() {
        let m = model(json!({
            "variables": [{"id": "x", "domain": {"kind": "range", "lower": 0, "upper": 9, "integer": true}}]
        }));
        let low = SearchSolver::new()
            .solve_model(&m, &params(1, TieBreakPolicy::Lowest), &CancelFlag::new())
            .expect("no fault");
        let high = SearchSolver::new()
            .solve_model(&m, &params(1, TieBreakPolicy::Highest), &CancelFlag::new())
            .expect("no fault");
        assert_eq!(low.status, NativeStatus::Feasible);
        assert_eq!(low.values, Some(vec![0.0]));
        assert_eq!(high.values, Some(vec![9.0]));
    }

    #[test]
    fn test_all_different_assignment() {
        let m = model(json!({
            "variables": [
                {"id": "a", "domain": {"kind": "range", "lower": 1, "upper": 3, "integer": true}},
                {"id": "b", "domain": {"kind": "range", "lower": 1, "upper": 3, "integer": true}},
                {"id": "c", "domain": {"kind": "range", "lower": 1, "upper": 3, "integer": true}}
            ],
            "constraints": [
                {"kind": "all_different", "vars": ["a", "b", "c"]},
                {"kind": "linear", "terms": [{"coef": 1, "vars": ["a"]}], "op": "ge", "rhs": 3}
            ],
            "objective": {"direction": "minimize", "terms": [{"coef": 1, "vars": ["b"]}]}
        }));
        let solution = SearchSolver::new()
            .solve_model(&m, &params(1, TieBreakPolicy::Lowest), &CancelFlag::new())
            .expect("no fault");
        assert_eq!(solution.status, NativeStatus::Optimal);
        assert_eq!(solution.values, Some(vec![3.0, 1.0, 2.0]));
    }

    #[test]
    fn test_large_integer_range_is_bisected() {
        let m = model(json!({
            "variables": [{"id": "x", "domain": {"kind": "range", "lower": 0, "upper": 1000000, "integer": true}}],
            "constraints": [{"kind": "linear", "terms": [{"coef": 3, "vars": ["x"]}], "op": "le", "rhs": 1000}],
            "objective": {"direction": "maximize", "terms": [{"coef": 1, "vars": ["x"]}]}
        }));
        let solution = SearchSolver::new()
            .solve_model(&m, &params(1, TieBreakPolicy::Lowest), &CancelFlag::new())
            .expect("no fault");
        assert_eq!(solution.status, NativeStatus::Optimal);
        assert_eq!(solution.objective, Some(333.0));
    }

    #[test]
    fn test_mixed_problem_uses_lp_leaves() {
        let m = model(json!({
            "variables": [
                {"id": "k", "domain": {"kind": "range", "lower": 0, "upper": 3, "integer": true}},
                {"id": "r", "domain": {"kind": "range", "lower": 0, "upper": 10}}
            ],
            "constraints": [
                {"kind": "linear", "terms": [{"coef": 2, "vars": ["k"]}, {"coef": 1, "vars": ["r"]}], "op": "le", "rhs": 7.5}
            ],
            "objective": {"direction": "maximize", "terms": [{"coef": 3, "vars": ["k"]}, {"coef": 1, "vars": ["r"]}]}
        }));
        let solution = SearchSolver::new()
            .solve_model(&m, &params(1, TieBreakPolicy::Lowest), &CancelFlag::new())
            .expect("no fault");
        assert_eq!(solution.status, NativeStatus::Optimal);
        let objective = solution.objective.expect("objective");
        assert!((objective - 10.5).abs() < 1e-6, "got {objective}");
    }

    #[test]
    fn test_cancelled_search_is_interrupted() {
        let m = knapsack();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let solution = SearchSolver::with_poll_interval(1)
            .solve_model(&m, &params(1, TieBreakPolicy::Lowest), &cancel)
            .expect("no fault");
        assert_eq!(solution.status, NativeStatus::Interrupted);
    }

    #[test]
    fn test_deadline_returns_time_limit() {
        // 36 even weights can never sum to an odd target.
        let terms: Vec<_> = (0..36)
            .map(|i| json!({"coef": 2 * (i + 1), "vars": [format!("x{i:02}")]}))
            .collect();
        let variables: Vec<_> = (0..36)
            .map(|i| json!({"id": format!("x{i:02}"), "domain": {"kind": "range", "lower": 0, "upper": 1, "integer": true}}))
            .collect();
        let m = model(json!({
            "variables": variables,
            "constraints": [{"kind": "linear", "terms": terms, "op": "eq", "rhs": 333}]
        }));
        let started = Instant::now();
        let solution = SearchSolver::new()
            .solve_model(
                &m,
                &SolveParams {
                    time_limit: Duration::from_millis(50),
                    worker_count: 1,
                    tie_break: TieBreakPolicy::Lowest,
                },
                &CancelFlag::new(),
            )
            .expect("no fault");
        assert_eq!(solution.status, NativeStatus::TimeLimit);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
