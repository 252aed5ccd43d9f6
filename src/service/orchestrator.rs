//! Request lifecycle: cache lookup, deduplication, model building, dispatch
//! to the worker pool, retry of backend faults, and publication.
//!
//! Per request: `PENDING -> BUILDING -> SOLVING -> {SOLVED(status), FAILED}`.
//! Validation and model building run on the calling thread; only solvable
//! models reach the pool.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::extract::extract;
use crate::domain::fingerprint::Fingerprint;
use crate::domain::model::{build, SolverModel};
use crate::domain::normalize::normalize_request;
use crate::domain::result::SolveResult;
use crate::domain::solver::{CancelFlag, NativeStatus, SolveParams, Solver};
use crate::error::SolveError;
use crate::models::ApiSolveRequest;
use crate::service::cache::ResultCache;
use crate::service::inflight::{InFlightHandle, InFlightRegistry, Outcome, Registration, SolvePhase};
use crate::service::pool::WorkerPool;

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub default_time_limit: Duration,
    pub max_time_limit: Duration,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    /// Lock shards for the cache and the in-flight registry.
    pub shards: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            queue_capacity: 64,
            default_time_limit: Duration::from_secs(10),
            max_time_limit: Duration::from_secs(60),
            cache_capacity: 1024,
            cache_ttl: Duration::from_secs(600),
            shards: 64,
        }
    }
}

/// Snapshot of the service counters, as served on `/stats`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrchestratorStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub deduplicated: u64,
    pub solves_started: u64,
    pub solves_completed: u64,
    pub retries: u64,
    pub errors: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub cache_expired: u64,
    pub in_flight: usize,
    pub queued: usize,
    pub cached_entries: usize,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    deduplicated: AtomicU64,
    solves_started: AtomicU64,
    solves_completed: AtomicU64,
    retries: AtomicU64,
    errors: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Inner {
    config: OrchestratorConfig,
    backend: Arc<dyn Solver>,
    cache: ResultCache,
    inflight: InFlightRegistry,
    counters: Counters,
    shutting_down: AtomicBool,
}

pub struct Orchestrator {
    inner: Arc<Inner>,
    pool: RwLock<Option<WorkerPool>>,
}

/// Claim on the outcome of one request.
///
/// Dropping a ticket (or calling [`SolveTicket::cancel`]) withdraws its
/// interest; when the last interested ticket goes, the solve is cancelled.
pub struct SolveTicket {
    fingerprint: Fingerprint,
    state: TicketState,
}

enum TicketState {
    Ready(Outcome),
    Waiting(Arc<InFlightHandle>),
}

impl SolveTicket {
    fn ready(fingerprint: Fingerprint, outcome: Outcome) -> Self {
        SolveTicket {
            fingerprint,
            state: TicketState::Ready(outcome),
        }
    }

    fn waiting(handle: Arc<InFlightHandle>) -> Self {
        SolveTicket {
            fingerprint: handle.fingerprint(),
            state: TicketState::Waiting(handle),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn phase(&self) -> SolvePhase {
        match &self.state {
            TicketState::Ready(Ok(result)) => SolvePhase::Solved(result.status),
            TicketState::Ready(Err(_)) => SolvePhase::Failed,
            TicketState::Waiting(handle) => handle.phase(),
        }
    }

    /// Block until the outcome is available.
    pub fn wait(self) -> Result<SolveResult, SolveError> {
        match &self.state {
            TicketState::Ready(outcome) => outcome.clone(),
            TicketState::Waiting(handle) => handle.wait(),
        }
    }

    /// Give up on the outcome.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for SolveTicket {
    fn drop(&mut self) {
        if let TicketState::Waiting(handle) = &self.state {
            handle.detach();
        }
    }
}

impl Orchestrator {
    /// Start the worker pool and create empty registries.
    pub fn new(config: OrchestratorConfig, backend: Arc<dyn Solver>) -> io::Result<Self> {
        let pool = WorkerPool::start(config.workers, config.queue_capacity)?;
        info!(
            "Starting orchestrator with backend '{}', {} workers, queue capacity {}",
            backend.name(),
            pool.size(),
            config.queue_capacity
        );
        let inner = Inner {
            cache: ResultCache::new(config.cache_capacity, config.cache_ttl, config.shards),
            inflight: InFlightRegistry::new(config.shards),
            counters: Counters::default(),
            shutting_down: AtomicBool::new(false),
            backend,
            config,
        };
        Ok(Orchestrator {
            inner: Arc::new(inner),
            pool: RwLock::new(Some(pool)),
        })
    }

    /// Solve a request, blocking until its outcome is known.
    pub fn solve(&self, raw: ApiSolveRequest) -> Result<SolveResult, SolveError> {
        self.submit(raw)?.wait()
    }

    /// Validate and schedule a request without waiting for it.
    ///
    /// Fails immediately on validation errors, unsupported constraints, a
    /// full queue or shutdown. Everything else is delivered through the
    /// returned ticket.
    pub fn submit(&self, raw: ApiSolveRequest) -> Result<SolveTicket, SolveError> {
        let inner = &self.inner;
        if inner.shutting_down.load(Ordering::Acquire) {
            return Err(SolveError::ShuttingDown);
        }
        let started = Instant::now();
        bump(&inner.counters.requests);

        let (request, fingerprint) = normalize_request(raw).map_err(|err| {
            debug!("Rejected request: {err}");
            err
        })?;
        let time_limit = inner.time_limit_for(request.config.time_limit);

        if let Some(result) = inner.cached(&fingerprint, time_limit) {
            bump(&inner.counters.cache_hits);
            debug!("Cache hit for {fingerprint:?}");
            return Ok(SolveTicket::ready(
                fingerprint,
                Ok(result.with_elapsed(started.elapsed())),
            ));
        }

        let handle = match inner
            .inflight
            .join_or_register(fingerprint, || inner.cached(&fingerprint, time_limit))
        {
            Registration::Joined(handle) => {
                bump(&inner.counters.deduplicated);
                debug!("Joined in-flight solve for {fingerprint:?}");
                return Ok(SolveTicket::waiting(handle));
            }
            Registration::Cached(result) => {
                bump(&inner.counters.cache_hits);
                return Ok(SolveTicket::ready(
                    fingerprint,
                    Ok(result.with_elapsed(started.elapsed())),
                ));
            }
            Registration::Leader(handle) => handle,
        };
        let ticket = SolveTicket::waiting(Arc::clone(&handle));

        handle.set_phase(SolvePhase::Building);
        debug!("Building model for {fingerprint:?}");
        let model = match build(request.problem) {
            Ok(model) => model,
            Err(err) => {
                warn!("Cannot encode problem {fingerprint:?}: {err}");
                return Err(inner.fail(&handle, SolveError::from(err)));
            }
        };

        let params = SolveParams {
            time_limit,
            worker_count: request
                .config
                .worker_count
                .unwrap_or(1)
                .clamp(1, inner.config.workers.max(1)),
            tie_break: request.config.tie_break,
        };

        handle.set_phase(SolvePhase::Solving);
        let job = {
            let inner = Arc::clone(inner);
            let handle = Arc::clone(&handle);
            Box::new(move || inner.run(&handle, &model, &params))
        };
        let submitted = match self.pool.read().as_ref() {
            Some(pool) => pool.try_submit(job),
            None => Err(SolveError::ShuttingDown),
        };
        if let Err(err) = submitted {
            bump(&inner.counters.rejected);
            warn!("Rejected solve for {fingerprint:?}: {err}");
            return Err(inner.fail(&handle, err));
        }
        debug!("Queued solve for {fingerprint:?} with budget {time_limit:?}");
        Ok(ticket)
    }

    pub fn stats(&self) -> OrchestratorStats {
        let inner = &self.inner;
        let c = &inner.counters;
        OrchestratorStats {
            requests: c.requests.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            deduplicated: c.deduplicated.load(Ordering::Relaxed),
            solves_started: c.solves_started.load(Ordering::Relaxed),
            solves_completed: c.solves_completed.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            cache_expired: inner.cache.expired_count(),
            in_flight: inner.inflight.len(),
            queued: self.pool.read().as_ref().map_or(0, WorkerPool::queued),
            cached_entries: inner.cache.len(),
        }
    }

    /// Drop expired cache entries.
    pub fn purge_expired(&self) -> usize {
        self.inner.cache.purge_expired()
    }

    /// Stop accepting requests, cancel running solves and join the workers.
    /// Waiters of interrupted solves receive `ShuttingDown`. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self.inner.inflight.cancel_all();
        info!("Shutting down orchestrator, cancelling {cancelled} in-flight solves");
        if let Some(pool) = self.pool.write().take() {
            pool.shutdown();
        }
        self.inner.cache.clear();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn time_limit_for(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.config.default_time_limit)
            .min(self.config.max_time_limit)
    }

    fn cached(&self, fingerprint: &Fingerprint, time_limit: Duration) -> Option<SolveResult> {
        self.cache
            .lookup(fingerprint)
            .filter(|entry| entry.serves(time_limit))
            .map(|entry| entry.result)
    }

    /// Terminate a solve that never reached a worker.
    fn fail(&self, handle: &Arc<InFlightHandle>, err: SolveError) -> SolveError {
        handle.publish(Err(err.clone()));
        self.inflight.remove(handle);
        err
    }

    /// Worker-side half of a solve.
    fn run(&self, handle: &Arc<InFlightHandle>, model: &SolverModel, params: &SolveParams) {
        let fingerprint = handle.fingerprint();
        let outcome = if handle.is_cancelled() {
            debug!("Skipping cancelled solve for {fingerprint:?}");
            Err(self.cancellation())
        } else {
            bump(&self.counters.solves_started);
            self.solve_with_retry(model, params, handle.cancel_flag())
        };

        match &outcome {
            Ok(result) => {
                bump(&self.counters.solves_completed);
                info!(
                    "Solved {fingerprint:?}: {:?} in {:?}",
                    result.status, result.elapsed_time
                );
            }
            Err(err) => {
                bump(&self.counters.cancelled);
                debug!("Solve for {fingerprint:?} ended without result: {err}");
            }
        }

        // Store before waking waiters: a waiter that immediately repeats the
        // request must find the result, since it can no longer join `handle`.
        if let Ok(result) = &outcome {
            self.cache.put(fingerprint, result.clone(), params.time_limit);
        }
        handle.publish(outcome);
        self.inflight.remove(handle);
    }

    fn cancellation(&self) -> SolveError {
        if self.shutting_down.load(Ordering::Acquire) {
            SolveError::ShuttingDown
        } else {
            SolveError::Cancelled
        }
    }

    /// Run the backend, retrying a fault once. Two faults in a row yield an
    /// `ERROR` result.
    fn solve_with_retry(
        &self,
        model: &SolverModel,
        params: &SolveParams,
        cancel: &CancelFlag,
    ) -> Result<SolveResult, SolveError> {
        let started = Instant::now();
        let first = match self.attempt(model, params, cancel, started) {
            Ok(outcome) => return outcome,
            Err(fault) => fault,
        };
        bump(&self.counters.retries);
        warn!("Backend '{}' failed, retrying once: {first}", self.backend.name());

        let retry_params = SolveParams {
            time_limit: params.time_limit.saturating_sub(started.elapsed()),
            ..*params
        };
        match self.attempt(model, &retry_params, cancel, started) {
            Ok(outcome) => outcome,
            Err(second) => {
                bump(&self.counters.errors);
                error!("Backend '{}' failed twice: {second}", self.backend.name());
                Ok(SolveResult::error(
                    format!("internal solver error: {second} (first attempt: {first})"),
                    started.elapsed(),
                ))
            }
        }
    }

    /// One backend call. `Err` carries a description of a backend fault.
    fn attempt(
        &self,
        model: &SolverModel,
        params: &SolveParams,
        cancel: &CancelFlag,
        started: Instant,
    ) -> Result<Result<SolveResult, SolveError>, String> {
        let call = panic::catch_unwind(AssertUnwindSafe(|| {
            self.backend.solve_model(model, params, cancel)
        }));
        match call {
            Ok(Ok(native)) if native.status == NativeStatus::Interrupted && cancel.is_cancelled() => {
                Ok(Err(self.cancellation()))
            }
            Ok(Ok(native)) => {
                debug!("Backend explored {} nodes", native.nodes);
                Ok(Ok(extract(model, native, started.elapsed())))
            }
            Ok(Err(err)) => Err(err.to_string()),
            Err(payload) => Err(format!("backend panicked: {}", panic_message(&*payload))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
