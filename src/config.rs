use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::solver_factory::SolverType;
use crate::domain::solvers::search::DEFAULT_POLL_INTERVAL;
use crate::service::OrchestratorConfig;

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub port: u16,
    pub json_payload_limit: usize,
    pub solver: SolverType,
    /// Search nodes between deadline/cancellation checks.
    pub poll_interval: u64,
    pub sentry_dsn: Option<String>,
    pub orchestrator: OrchestratorConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            port: 9000,
            json_payload_limit: 2 * 1024 * 1024, // default 2 MB
            solver: SolverType::Search,
            poll_interval: DEFAULT_POLL_INTERVAL,
            sentry_dsn: None,
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

fn var<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl ServiceConfig {
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = ServiceConfig::default();
        let base = defaults.orchestrator.clone();

        let default_time_limit = var::<u64>("DEFAULT_TIME_LIMIT_MS")
            .filter(|ms| *ms > 0)
            .map_or(base.default_time_limit, Duration::from_millis);
        let max_time_limit = var::<u64>("MAX_TIME_LIMIT_MS")
            .filter(|ms| *ms > 0)
            .map_or(base.max_time_limit, Duration::from_millis);

        ServiceConfig {
            port: var("PORT").unwrap_or(defaults.port),
            json_payload_limit: var("JSON_PAYLOAD_LIMIT").unwrap_or(defaults.json_payload_limit),
            solver: env::var("SOLVER_BACKEND")
                .ok()
                .and_then(|s| SolverType::from_str(s.trim()))
                .unwrap_or(defaults.solver),
            poll_interval: var::<u64>("SOLVER_POLL_INTERVAL")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.poll_interval),
            sentry_dsn: env::var("SENTRY_DSN").ok().filter(|s| !s.trim().is_empty()),
            orchestrator: OrchestratorConfig {
                workers: var::<usize>("SOLVER_WORKERS")
                    .filter(|n| *n > 0)
                    .unwrap_or(base.workers),
                queue_capacity: var::<usize>("SOLVER_QUEUE_CAPACITY")
                    .filter(|n| *n > 0)
                    .unwrap_or(base.queue_capacity),
                default_time_limit: default_time_limit.min(max_time_limit),
                max_time_limit,
                cache_capacity: var("CACHE_CAPACITY").unwrap_or(base.cache_capacity),
                cache_ttl: var::<u64>("CACHE_TTL_SECS").map_or(base.cache_ttl, Duration::from_secs),
                shards: var::<usize>("REGISTRY_SHARDS")
                    .filter(|n| *n > 0)
                    .unwrap_or(base.shards),
            },
        }
    }
}
