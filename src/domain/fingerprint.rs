//! Stable digest of a canonical `ProblemSpec`.
//!
//! The encoding is length-prefixed and tagged so that no two distinct
//! canonical problems share a byte stream. Floats are hashed by their bit
//! pattern; the normalizer has already folded `-0.0` into `0.0`.

use blake3::Hasher;
use std::fmt;

use crate::domain::problem::{
    Constraint, Domain, Expression, Objective, ProblemSpec, SolverDirection, TieBreakPolicy,
};

const ENCODING_TAG: &[u8] = b"optimizer-api/problem/v1";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest of the problem alone.
    pub fn of(spec: &ProblemSpec) -> Self {
        let mut enc = Encoder::new();
        enc.problem(spec);
        Fingerprint(*enc.hasher.finalize().as_bytes())
    }

    /// Cache and deduplication key for a request: the problem plus the
    /// tie-break policy, which changes which optimum is reported.
    pub fn for_request(spec: &ProblemSpec, tie_break: TieBreakPolicy) -> Self {
        let mut enc = Encoder::new();
        enc.problem(spec);
        enc.tag(b"tie-break");
        enc.u8(match tie_break {
            TieBreakPolicy::Lowest => 0,
            TieBreakPolicy::Highest => 1,
        });
        Fingerprint(*enc.hasher.finalize().as_bytes())
    }

    /// Stable small integer used to pick a shard.
    pub fn shard_index(&self, shards: usize) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_le_bytes(prefix) % shards.max(1) as u64) as usize
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

struct Encoder {
    hasher: Hasher,
}

impl Encoder {
    fn new() -> Self {
        let mut hasher = Hasher::new();
        hasher.update(ENCODING_TAG);
        Encoder { hasher }
    }

    fn u8(&mut self, v: u8) {
        self.hasher.update(&[v]);
    }

    fn len(&mut self, n: usize) {
        self.hasher.update(&(n as u64).to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.hasher.update(&v.to_bits().to_le_bytes());
    }

    fn opt_f64(&mut self, v: Option<f64>) {
        match v {
            Some(v) => {
                self.u8(1);
                self.f64(v);
            }
            None => self.u8(0),
        }
    }

    fn str(&mut self, s: &str) {
        self.len(s.len());
        self.hasher.update(s.as_bytes());
    }

    fn tag(&mut self, t: &[u8]) {
        self.len(t.len());
        self.hasher.update(t);
    }

    fn problem(&mut self, spec: &ProblemSpec) {
        self.tag(b"variables");
        self.len(spec.variables.len());
        for var in &spec.variables {
            self.str(&var.id);
            self.domain(&var.domain);
        }

        self.tag(b"constraints");
        self.len(spec.constraints.len());
        for constraint in &spec.constraints {
            self.constraint(constraint);
        }

        self.tag(b"objective");
        match &spec.objective {
            Some(objective) => {
                self.u8(1);
                self.objective(objective);
            }
            None => self.u8(0),
        }
    }

    fn domain(&mut self, domain: &Domain) {
        match domain {
            Domain::Integer { lower, upper } => {
                self.u8(0);
                self.hasher.update(&lower.to_le_bytes());
                self.hasher.update(&upper.to_le_bytes());
            }
            Domain::Real { lower, upper } => {
                self.u8(1);
                self.f64(*lower);
                self.f64(*upper);
            }
            Domain::Set { values } => {
                self.u8(2);
                self.len(values.len());
                for v in values {
                    self.f64(*v);
                }
            }
        }
    }

    fn expression(&mut self, expr: &Expression) {
        self.len(expr.terms.len());
        for term in &expr.terms {
            self.f64(term.coef);
            self.len(term.factors.len());
            for factor in &term.factors {
                self.str(factor);
            }
        }
    }

    fn constraint(&mut self, constraint: &Constraint) {
        match constraint {
            Constraint::Bounded { expr, lower, upper } => {
                self.u8(0);
                self.expression(expr);
                self.opt_f64(*lower);
                self.opt_f64(*upper);
            }
            Constraint::AllDifferent { vars } => {
                self.u8(1);
                self.len(vars.len());
                for v in vars {
                    self.str(v);
                }
            }
        }
    }

    fn objective(&mut self, objective: &Objective) {
        self.u8(match objective.direction {
            SolverDirection::Maximize => 0,
            SolverDirection::Minimize => 1,
        });
        self.expression(&objective.expr);
        self.f64(objective.constant);
    }
}
