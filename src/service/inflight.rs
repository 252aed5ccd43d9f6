//! Registry of solves currently in progress, keyed by fingerprint.
//!
//! At most one handle per fingerprint is live at a time. Requests for a
//! fingerprint that is already being solved attach to the existing handle and
//! all receive the outcome it publishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::domain::fingerprint::Fingerprint;
use crate::domain::result::{SolveResult, SolveStatus};
use crate::domain::solver::CancelFlag;
use crate::error::SolveError;

pub type Outcome = Result<SolveResult, SolveError>;

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolvePhase {
    Pending,
    Building,
    Solving,
    Solved(SolveStatus),
    Failed,
}

impl SolvePhase {
    fn of(outcome: &Outcome) -> Self {
        match outcome {
            Ok(result) => SolvePhase::Solved(result.status),
            Err(_) => SolvePhase::Failed,
        }
    }
}

struct HandleState {
    phase: SolvePhase,
    outcome: Option<Outcome>,
}

pub struct InFlightHandle {
    fingerprint: Fingerprint,
    cancel: CancelFlag,
    waiters: AtomicUsize,
    state: Mutex<HandleState>,
    ready: Condvar,
}

impl InFlightHandle {
    /// New handle with its creator as the only waiter.
    fn new(fingerprint: Fingerprint) -> Arc<Self> {
        Arc::new(InFlightHandle {
            fingerprint,
            cancel: CancelFlag::new(),
            waiters: AtomicUsize::new(1),
            state: Mutex::new(HandleState {
                phase: SolvePhase::Pending,
                outcome: None,
            }),
            ready: Condvar::new(),
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    /// Add a waiter, unless every previous waiter already left.
    fn try_attach(&self) -> bool {
        self.waiters
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .is_ok()
    }

    /// Remove a waiter. The last one out raises the cancel flag.
    pub fn detach(&self) {
        let previous = self
            .waiters
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) && !self.is_published() {
            self.cancel.cancel();
        }
    }

    /// Raise the cancel flag regardless of waiters.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn phase(&self) -> SolvePhase {
        self.state.lock().phase
    }

    /// Advance the phase. Ignored once an outcome is published.
    pub fn set_phase(&self, phase: SolvePhase) {
        let mut state = self.state.lock();
        if state.outcome.is_none() {
            state.phase = phase;
        }
    }

    pub fn is_published(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    /// Publish the outcome and wake every waiter. Only the first call has
    /// any effect; returns whether this call won.
    pub fn publish(&self, outcome: Outcome) -> bool {
        let mut state = self.state.lock();
        if state.outcome.is_some() {
            return false;
        }
        state.phase = SolvePhase::of(&outcome);
        state.outcome = Some(outcome);
        self.ready.notify_all();
        true
    }

    /// Block until an outcome is published.
    pub fn wait(&self) -> Outcome {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.ready.wait(&mut state);
        }
    }
}

/// Result of [`InFlightRegistry::join_or_register`].
pub enum Registration {
    /// Attached to a solve already in progress.
    Joined(Arc<InFlightHandle>),
    /// The cache was filled while we waited for the shard lock.
    Cached(SolveResult),
    /// Caller owns a fresh handle and must drive the solve.
    Leader(Arc<InFlightHandle>),
}

/// Live solves keyed by fingerprint. Locking is per shard rather than per
/// key, so distinct fingerprints that hash to the same shard briefly wait on
/// each other.
pub struct InFlightRegistry {
    shards: Vec<Mutex<HashMap<Fingerprint, Arc<InFlightHandle>>>>,
}

impl InFlightRegistry {
    pub fn new(shards: usize) -> Self {
        InFlightRegistry {
            shards: (0..shards.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, fingerprint: &Fingerprint) -> &Mutex<HashMap<Fingerprint, Arc<InFlightHandle>>> {
        &self.shards[fingerprint.shard_index(self.shards.len())]
    }

    /// Attach to the live handle for `fingerprint`, or register a new one.
    ///
    /// `recheck` runs under the shard lock before a new handle is created. A
    /// solve that completes stores its result before leaving the registry, so
    /// the check closes the window between a cache miss and registration.
    pub fn join_or_register(
        &self,
        fingerprint: Fingerprint,
        recheck: impl FnOnce() -> Option<SolveResult>,
    ) -> Registration {
        let mut shard = self.shard(&fingerprint).lock();
        if let Some(existing) = shard.get(&fingerprint) {
            if !existing.is_cancelled() && existing.try_attach() {
                return Registration::Joined(Arc::clone(existing));
            }
        }
        if let Some(result) = recheck() {
            return Registration::Cached(result);
        }
        let handle = InFlightHandle::new(fingerprint);
        // A cancelled handle still registered here is replaced; its own
        // completion will not remove the newcomer.
        shard.insert(fingerprint, Arc::clone(&handle));
        Registration::Leader(handle)
    }

    /// Remove `handle` if it is still the registered one.
    pub fn remove(&self, handle: &Arc<InFlightHandle>) {
        let fingerprint = handle.fingerprint();
        let mut shard = self.shard(&fingerprint).lock();
        if shard
            .get(&fingerprint)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            shard.remove(&fingerprint);
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raise the cancel flag of every registered handle.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for shard in &self.shards {
            for handle in shard.lock().values() {
                handle.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::normalize::normalize;
    use crate::models::ApiProblem;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    fn fingerprint() -> Fingerprint {
        let raw: ApiProblem = serde_json::from_value(json!({
            "variables": [{"id": "x", "domain": {"kind": "set", "values": [1, 2]}}]
        }))
        .expect("valid json");
        normalize(raw).expect("valid").1
    }

    fn leader(registry: &InFlightRegistry) -> Arc<InFlightHandle> {
        match registry.join_or_register(fingerprint(), || None) {
            Registration::Leader(handle) => handle,
            _ => panic!("expected a new handle"),
        }
    }

    #[test]
    fn test_second_registration_joins_first() {
        let registry = InFlightRegistry::new(4);
        let first = leader(&registry);
        match registry.join_or_register(fingerprint(), || None) {
            Registration::Joined(handle) => assert!(Arc::ptr_eq(&handle, &first)),
            _ => panic!("expected to join"),
        }
        assert_eq!(first.waiters(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_recheck_hit_skips_registration() {
        let registry = InFlightRegistry::new(4);
        let cached = SolveResult::infeasible(Duration::ZERO);
        match registry.join_or_register(fingerprint(), || Some(cached.clone())) {
            Registration::Cached(result) => assert_eq!(result, cached),
            _ => panic!("expected cached result"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_last_detach_cancels_and_blocks_new_joiners() {
        let registry = InFlightRegistry::new(4);
        let first = leader(&registry);
        first.detach();
        assert!(first.is_cancelled());

        let second = leader(&registry);
        assert!(!Arc::ptr_eq(&first, &second));

        // The stale handle must not evict its replacement.
        registry.remove(&first);
        assert_eq!(registry.len(), 1);
        registry.remove(&second);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_detach_after_publish_does_not_cancel() {
        let registry = InFlightRegistry::new(1);
        let handle = leader(&registry);
        assert!(handle.publish(Ok(SolveResult::infeasible(Duration::ZERO))));
        handle.detach();
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_publish_wakes_all_waiters_once() {
        let registry = InFlightRegistry::new(1);
        let handle = leader(&registry);
        handle.set_phase(SolvePhase::Solving);

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || handle.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        let result = SolveResult::infeasible(Duration::from_millis(3));
        assert!(handle.publish(Ok(result.clone())));
        assert!(!handle.publish(Err(SolveError::Cancelled)));

        for waiter in waiters {
            assert_eq!(waiter.join().expect("waiter"), Ok(result.clone()));
        }
        assert_eq!(handle.phase(), SolvePhase::Solved(SolveStatus::Infeasible));
        handle.set_phase(SolvePhase::Building);
        assert_eq!(handle.phase(), SolvePhase::Solved(SolveStatus::Infeasible));
    }
}
