//! The concurrent expectation registry.
//!
//! Writers serialize on a mutex and publish an immutable snapshot through an
//! `ArcSwap`; the match path only loads the current snapshot and never blocks
//! on a writer.

use super::circular::CircularMap;
use super::listener::{ExpectationListener, ListenerId};
use super::types::{now_millis, Cause, Expectation, Times};
use super::RegistryError;
use crate::model::{Delay, HttpRequest};
use crate::predicate::{MatchDifference, RequestMatcher};
use crate::scheduler::Scheduler;
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Capacity; the oldest expectation is evicted beyond it
    pub max_expectations: usize,
    /// Physically remove expectations whose times are used up
    pub remove_exhausted: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_expectations: 5000,
            remove_exhausted: true,
        }
    }
}

/// Outcome of consuming one match from an expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed {
    /// A match was granted; `exhausted` is true when it was the last one
    Granted { exhausted: bool },
    /// Nothing left to consume
    Refused,
}

/// A stored expectation together with its compiled matcher and live counter.
#[derive(Debug)]
pub struct ActiveExpectation {
    expectation: Expectation,
    matcher: RequestMatcher,
    remaining: AtomicU32,
}

impl ActiveExpectation {
    fn new(expectation: Expectation) -> Result<Self, RegistryError> {
        if expectation.id.is_empty() {
            return Err(RegistryError::InvalidExpectation {
                id: expectation.id,
                reason: "id must not be empty".to_string(),
            });
        }
        if !expectation.times.unlimited && expectation.times.remaining_times == 0 {
            return Err(RegistryError::InvalidExpectation {
                id: expectation.id,
                reason: "remainingTimes must be positive unless unlimited".to_string(),
            });
        }
        if let Some(delay) = expectation.action.delay() {
            if delay.to_duration() > Delay::MAX_DURATION {
                return Err(RegistryError::InvalidExpectation {
                    id: expectation.id,
                    reason: format!(
                        "delay must not exceed {}s",
                        Delay::MAX_DURATION.as_secs()
                    ),
                });
            }
        }
        let matcher = RequestMatcher::compile(expectation.http_request.clone()).map_err(|source| {
            RegistryError::InvalidMatcher {
                id: expectation.id.clone(),
                source,
            }
        })?;
        Ok(Self {
            remaining: AtomicU32::new(expectation.times.remaining_times),
            expectation,
            matcher,
        })
    }

    pub fn id(&self) -> &str {
        &self.expectation.id
    }

    /// The definition as registered (times as originally configured).
    pub fn definition(&self) -> &Expectation {
        &self.expectation
    }

    pub fn matcher(&self) -> &RequestMatcher {
        &self.matcher
    }

    /// Remaining matches, or `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        (!self.expectation.times.unlimited).then(|| self.remaining.load(Ordering::Acquire))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expectation.time_to_live.is_expired_at(now_millis)
    }

    pub fn is_active_at(&self, now_millis: i64) -> bool {
        !self.is_exhausted() && !self.is_expired_at(now_millis)
    }

    /// The definition with `times` reflecting what is left.
    pub fn current(&self) -> Expectation {
        let mut expectation = self.expectation.clone();
        if let Some(remaining) = self.remaining() {
            expectation.times = Times::exactly(remaining);
        }
        expectation
    }

    /// Atomically take one match. The counter never goes below zero.
    pub fn try_consume(&self) -> Consumed {
        if self.expectation.times.unlimited {
            return Consumed::Granted { exhausted: false };
        }
        let mut current = self.remaining.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Consumed::Refused;
            }
            match self.remaining.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Consumed::Granted {
                        exhausted: current == 1,
                    }
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Immutable view of the registry published after every mutation.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    /// Priority descending, then insertion order
    by_priority: Vec<Arc<ActiveExpectation>>,
    by_insertion: Vec<Arc<ActiveExpectation>>,
}

impl RegistrySnapshot {
    fn build(by_insertion: Vec<Arc<ActiveExpectation>>) -> Self {
        let mut by_priority = by_insertion.clone();
        // Stable: equal priorities keep insertion order
        by_priority.sort_by(|a, b| b.expectation.priority.cmp(&a.expectation.priority));
        Self {
            by_priority,
            by_insertion,
        }
    }

    pub fn len(&self) -> usize {
        self.by_insertion.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_insertion.is_empty()
    }

    /// Candidates in match order, skipping expired and exhausted entries.
    pub fn candidates_at(&self, now_millis: i64) -> impl Iterator<Item = &Arc<ActiveExpectation>> {
        self.by_priority
            .iter()
            .filter(move |e| e.is_active_at(now_millis))
    }

    /// Active expectations in insertion order, optionally filtered.
    pub fn active_expectations(&self, filter: Option<&RequestMatcher>) -> Vec<Expectation> {
        let now = now_millis();
        self.by_insertion
            .iter()
            .filter(|e| e.is_active_at(now))
            .filter(|e| filter.map_or(true, |f| f.matches_definition(&e.expectation.http_request)))
            .map(|e| e.current())
            .collect()
    }
}

pub struct ExpectationRegistry {
    config: RegistryConfig,
    state: Mutex<CircularMap<String, Arc<ActiveExpectation>>>,
    snapshot: ArcSwap<RegistrySnapshot>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ExpectationListener>)>>,
    next_listener: AtomicU64,
    scheduler: Arc<Scheduler>,
}

impl ExpectationRegistry {
    pub fn new(config: RegistryConfig, scheduler: Arc<Scheduler>) -> Self {
        Self {
            state: Mutex::new(CircularMap::new(config.max_expectations)),
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            config,
            scheduler,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add one expectation; an existing id is replaced in place.
    pub fn add(&self, mut expectation: Expectation, cause: Cause) -> Result<Expectation, RegistryError> {
        expectation.source = cause;
        let active = Arc::new(ActiveExpectation::new(expectation)?);
        let stored = active.current();
        {
            let mut state = self.state.lock();
            self.upsert(&mut state, active);
            self.publish(&state);
        }
        self.notify(cause);
        Ok(stored)
    }

    /// Bulk upsert.
    ///
    /// For initializer causes, expectations previously loaded from the same
    /// source and absent from `expectations` are removed. API-sourced entries
    /// are never touched by an initializer update. Nothing is applied if any
    /// expectation is rejected.
    pub fn update(&self, expectations: Vec<Expectation>, cause: Cause) -> Result<Vec<Expectation>, RegistryError> {
        let compiled = expectations
            .into_iter()
            .map(|mut e| {
                e.source = cause;
                ActiveExpectation::new(e).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let stored: Vec<Expectation> = compiled.iter().map(|a| a.current()).collect();
        {
            let mut state = self.state.lock();
            if cause != Cause::Api {
                let incoming: HashSet<&str> = compiled.iter().map(|a| a.id()).collect();
                let removed = state.retain(|id, e| {
                    e.expectation.source != cause || incoming.contains(id.as_str())
                });
                if !removed.is_empty() {
                    info!("Removed {} expectation(s) no longer provided by {:?}", removed.len(), cause);
                }
            }
            for active in compiled {
                self.upsert(&mut state, active);
            }
            self.publish(&state);
        }
        self.notify(cause);
        Ok(stored)
    }

    fn upsert(&self, state: &mut CircularMap<String, Arc<ActiveExpectation>>, active: Arc<ActiveExpectation>) {
        let id = active.id().to_string();
        let replacing = state.get(&id).is_some();
        if let Some((evicted, _)) = state.insert(id.clone(), active) {
            warn!(
                "Expectation capacity {} reached, evicted oldest expectation {}",
                self.config.max_expectations, evicted
            );
        }
        if replacing {
            info!("Updated expectation {}", id);
        } else {
            info!("Added expectation {}", id);
        }
    }

    /// Remove by id.
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.remove(&id.to_string()).is_some();
            if removed {
                self.publish(&state);
            }
            removed
        };
        if removed {
            info!("Removed expectation {}", id);
            self.notify(Cause::Api);
        }
        removed
    }

    /// The stored expectation with this id, if any.
    pub fn get(&self, id: &str) -> Option<Expectation> {
        self.state.lock().get(&id.to_string()).map(|e| e.current())
    }

    /// Remove every expectation matching `filter`, or all of them.
    pub fn clear(&self, filter: Option<&RequestMatcher>, cause: Cause) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let removed = match filter {
                Some(filter) => state
                    .retain(|_, e| !filter.matches_definition(&e.expectation.http_request))
                    .len(),
                None => {
                    let count = state.len();
                    state.clear();
                    count
                }
            };
            self.publish(&state);
            removed
        };
        info!("Cleared {} expectation(s)", removed);
        self.notify(cause);
        removed
    }

    pub fn reset(&self) {
        self.clear(None, Cause::Api);
    }

    /// Active expectations in insertion order, optionally filtered.
    pub fn retrieve_active_expectations(&self, filter: Option<&RequestMatcher>) -> Vec<Expectation> {
        self.snapshot().active_expectations(filter)
    }

    /// Highest-priority, earliest-inserted eligible match. Does not consume.
    pub fn match_first(&self, request: &HttpRequest) -> Option<Arc<ActiveExpectation>> {
        let snapshot = self.snapshot.load();
        let found = snapshot
            .candidates_at(now_millis())
            .find(|e| e.matcher.matches(None, request))
            .cloned();
        match &found {
            Some(e) => debug!("Request {} {} matched expectation {}", request.method, request.path, e.id()),
            None => debug!("No expectation matched {} {}", request.method, request.path),
        }
        found
    }

    /// Every eligible match, in match order.
    pub fn match_all(&self, request: &HttpRequest) -> Vec<Arc<ActiveExpectation>> {
        let snapshot = self.snapshot.load();
        snapshot
            .candidates_at(now_millis())
            .filter(|e| e.matcher.matches(None, request))
            .cloned()
            .collect()
    }

    /// Per-expectation mismatch descriptions, for diagnostics.
    pub fn explain(&self, request: &HttpRequest) -> Vec<(String, MatchDifference)> {
        let snapshot = self.snapshot.load();
        snapshot
            .candidates_at(now_millis())
            .filter_map(|e| {
                let mut difference = MatchDifference::new();
                (!e.matcher.matches(Some(&mut difference), request))
                    .then(|| (e.id().to_string(), difference))
            })
            .collect()
    }

    /// Take one match from an expectation previously returned by `match_first`.
    ///
    /// Returns false if another request consumed the last match first.
    pub fn consume(&self, active: &Arc<ActiveExpectation>) -> bool {
        match active.try_consume() {
            Consumed::Granted { exhausted } => {
                if exhausted {
                    info!("Expectation {} exhausted", active.id());
                    if self.config.remove_exhausted {
                        self.remove_instance(active);
                    }
                }
                true
            }
            Consumed::Refused => false,
        }
    }

    /// Match and consume in one step; the hot path used by the transport.
    pub fn match_and_consume(&self, request: &HttpRequest) -> Option<Arc<ActiveExpectation>> {
        let snapshot = self.snapshot.load();
        let now = now_millis();
        for candidate in snapshot.candidates_at(now) {
            if candidate.matcher.matches(None, request) && self.consume(candidate) {
                debug!(
                    "Request {} {} served by expectation {}",
                    request.method,
                    request.path,
                    candidate.id()
                );
                return Some(candidate.clone());
            }
        }
        debug!("No expectation matched {} {}", request.method, request.path);
        None
    }

    /// Remove this exact instance, leaving a replacement under the same id alone.
    fn remove_instance(&self, active: &Arc<ActiveExpectation>) {
        let removed = {
            let mut state = self.state.lock();
            let id = active.id().to_string();
            let same = state.get(&id).is_some_and(|e| Arc::ptr_eq(e, active));
            if same {
                state.remove(&id);
                self.publish(&state);
            }
            same
        };
        if removed {
            self.notify(Cause::Api);
        }
    }

    /// Publish a new snapshot, purging expired (and exhausted) entries.
    fn publish(&self, state: &CircularMap<String, Arc<ActiveExpectation>>) {
        let now = now_millis();
        let live: Vec<Arc<ActiveExpectation>> = state
            .values()
            .filter(|e| !e.is_expired_at(now))
            .filter(|e| !(self.config.remove_exhausted && e.is_exhausted()))
            .cloned()
            .collect();
        self.snapshot.store(Arc::new(RegistrySnapshot::build(live)));
    }

    /// Drop entries that expired since the last mutation.
    pub fn purge_expired(&self) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let now = now_millis();
            let removed = state.retain(|_, e| !e.is_expired_at(now)).len();
            if removed > 0 {
                debug!("Purged {} expired expectation(s)", removed);
                self.publish(&state);
            }
            removed
        };
        if removed > 0 {
            self.notify(Cause::Api);
        }
        removed
    }

    pub fn register_listener(&self, listener: Arc<dyn ExpectationListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Dispatch the current snapshot to every listener on the scheduler.
    ///
    /// Detached submission keeps listeners off the mutating thread, including
    /// the match path when exhaustion removes an expectation.
    fn notify(&self, cause: Cause) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        debug!("Notifying {} listener(s) of {:?} change", listeners.len(), cause);
        for (_, listener) in listeners {
            let snapshot = snapshot.clone();
            self.scheduler
                .submit_detached(move || listener.updated(&snapshot, cause));
        }
    }

    /// Drop listeners and expectations.
    pub fn shutdown(&self) {
        self.listeners.write().clear();
        let mut state = self.state.lock();
        state.clear();
        self.publish(&state);
    }
}
