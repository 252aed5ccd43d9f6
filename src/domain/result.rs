use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::problem::Assignment;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Timeout,
    Error,
}

impl SolveStatus {
    /// Whether a result with this status may be cached.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, SolveStatus::Error)
    }
}

/// Domain-level outcome of one solve.
///
/// `assignment` is present for `OPTIMAL` and `FEASIBLE`, absent for
/// `INFEASIBLE` and `ERROR`, and holds the best incumbent (if one was found)
/// for `TIMEOUT`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub assignment: Option<Assignment>,
    pub objective_value: Option<f64>,
    #[serde(rename = "elapsed_ms", with = "millis")]
    pub elapsed_time: Duration,
    pub diagnostic_message: Option<String>,
}

impl SolveResult {
    pub fn infeasible(elapsed_time: Duration) -> Self {
        SolveResult {
            status: SolveStatus::Infeasible,
            assignment: None,
            objective_value: None,
            elapsed_time,
            diagnostic_message: None,
        }
    }

    pub fn error(message: impl Into<String>, elapsed_time: Duration) -> Self {
        SolveResult {
            status: SolveStatus::Error,
            assignment: None,
            objective_value: None,
            elapsed_time,
            diagnostic_message: Some(message.into()),
        }
    }

    pub fn with_elapsed(mut self, elapsed_time: Duration) -> Self {
        self.elapsed_time = elapsed_time;
        self
    }
}

/// `Duration` as fractional milliseconds on the wire.
mod millis {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_nanos() as f64 / 1_000_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(ms / 1000.0).map_err(D::Error::custom)
    }
}
