//! In-memory platform with fault injection.
//!
//! Implements both discovery and `MutationBackend` over a map of stores.
//! Faults queued with [`MemoryPlatform::inject`] are consumed one per
//! `apply`, which lets tests reproduce contention, hung mutations and
//! mutations that land after their cancellation. Contention can also be
//! modelled per priority: a contended store rejects low-priority applies
//! while high-priority ones go through.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use stagger_core::clock::after;
use stagger_core::{codes, Clock, Error, Resource, ResourceDiscovery, Result};

use crate::backend::MutationBackend;
use crate::command::{MutationCommand, Priority};

/// Default longest real time a hung apply waits for its cancellation.
const MAX_HANG: Duration = Duration::from_secs(10);

/// Behaviour of one `apply` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Return an error without changing the ceiling.
    Fail { code: i64, message: String },
    /// Block until cancelled; the ceiling is unchanged.
    Hang,
    /// Block until cancelled, then land anyway `delay` later (in the
    /// platform clock's time). Lands at once if no cancel arrives.
    LandAfterCancel { delay: Duration },
    /// Report success but set this value instead of the target.
    Drift(u64),
}

impl Fault {
    /// Lock contention, the usual transient failure.
    pub fn contention() -> Self {
        Self::Fail {
            code: codes::CONTENTION,
            message: "lock request time out period exceeded".into(),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryStore {
    capacity: u64,
    eligible: bool,
}

#[derive(Debug, Clone)]
struct LateApply {
    value: u64,
    visible_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MemoryState {
    stores: BTreeMap<String, MemoryStore>,
    faults: HashMap<String, VecDeque<Fault>>,
    /// Low-priority applies fail once this many applies have been made.
    contended: HashMap<String, usize>,
    reject_high: HashSet<String>,
    cancel_requests: HashSet<String>,
    /// Applies that will land when cancelled: (value, delay).
    landing: HashMap<String, (u64, Duration)>,
    late: HashMap<String, LateApply>,
    applies: HashMap<String, usize>,
    cancels: HashMap<String, usize>,
    history: HashMap<String, Vec<(u64, Option<DateTime<Utc>>)>>,
    discovery_error: Option<String>,
}

impl MemoryState {
    fn set(&mut self, id: &str, value: u64, at: Option<DateTime<Utc>>) {
        if let Some(store) = self.stores.get_mut(id) {
            if store.capacity != value {
                store.capacity = value;
                self.history
                    .entry(id.to_string())
                    .or_default()
                    .push((value, at));
            }
        }
    }

    fn land_due(&mut self, id: &str, now: Option<DateTime<Utc>>) {
        let due = match (self.late.get(id), now) {
            (Some(late), Some(now)) => late.visible_at.map_or(true, |at| now >= at),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if due {
            if let Some(late) = self.late.remove(id) {
                self.set(id, late.value, late.visible_at);
            }
        }
    }
}

/// In-memory capacity platform.
#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
    cancelled: Condvar,
    clock: Option<Arc<dyn Clock>>,
    max_hang: Option<Duration>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `clock` to time delayed landings.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Cap the real time a hung apply waits for its cancellation.
    pub fn with_max_hang(mut self, max_hang: Duration) -> Self {
        self.max_hang = Some(max_hang);
        self
    }

    pub fn add_store(&self, id: &str, capacity: u64) {
        self.insert(id, capacity, true);
    }

    /// A store that discovery must skip.
    pub fn add_ineligible_store(&self, id: &str, capacity: u64) {
        self.insert(id, capacity, false);
    }

    fn insert(&self, id: &str, capacity: u64, eligible: bool) {
        self.state
            .lock()
            .stores
            .insert(id.to_string(), MemoryStore { capacity, eligible });
    }

    /// Queue a fault for the next `apply` on `id`.
    pub fn inject(&self, id: &str, fault: Fault) {
        self.state
            .lock()
            .faults
            .entry(id.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Reject low-priority applies on `id` with contention once `after`
    /// applies have gone through.
    pub fn contend_low_priority(&self, id: &str, after: usize) {
        self.state.lock().contended.insert(id.to_string(), after);
    }

    /// Reject high-priority applies on `id`.
    pub fn reject_high_priority(&self, id: &str) {
        self.state.lock().reject_high.insert(id.to_string());
    }

    /// Make discovery fail with `message`.
    pub fn fail_discovery(&self, message: &str) {
        self.state.lock().discovery_error = Some(message.to_string());
    }

    /// Current ceiling, after landing any due late apply.
    pub fn capacity(&self, id: &str) -> Option<u64> {
        let now = self.now();
        let mut state = self.state.lock();
        state.land_due(id, now);
        state.stores.get(id).map(|s| s.capacity)
    }

    pub fn apply_count(&self, id: &str) -> usize {
        self.state.lock().applies.get(id).copied().unwrap_or(0)
    }

    pub fn cancel_count(&self, id: &str) -> usize {
        self.state.lock().cancels.get(id).copied().unwrap_or(0)
    }

    /// Every value the ceiling took, in order.
    pub fn history(&self, id: &str) -> Vec<u64> {
        self.changes(id).into_iter().map(|(value, _)| value).collect()
    }

    /// Every value the ceiling took with the platform clock's time of the
    /// change (`None` without a clock).
    pub fn changes(&self, id: &str) -> Vec<(u64, Option<DateTime<Utc>>)> {
        self.state.lock().history.get(id).cloned().unwrap_or_default()
    }

    fn now(&self) -> Option<DateTime<Utc>> {
        self.clock.as_ref().map(|c| c.now())
    }

    /// Block until `id` is cancelled. Returns false when the wait timed
    /// out, in which case any pending landing for `id` is dropped.
    fn wait_for_cancel(&self, id: &str) -> bool {
        let limit = self.max_hang.unwrap_or(MAX_HANG);
        let started = Instant::now();
        let mut state = self.state.lock();
        loop {
            if state.cancel_requests.remove(id) {
                return true;
            }
            if started.elapsed() >= limit {
                state.landing.remove(id);
                return false;
            }
            self.cancelled
                .wait_for(&mut state, Duration::from_millis(20));
        }
    }
}

impl ResourceDiscovery for MemoryPlatform {
    fn list_eligible(&self) -> Result<Vec<Resource>> {
        let state = self.state.lock();
        if let Some(message) = &state.discovery_error {
            return Err(Error::Discovery(message.clone()));
        }
        Ok(state
            .stores
            .iter()
            .filter(|(_, store)| store.eligible)
            .map(|(id, store)| Resource::new(id.clone(), store.capacity))
            .collect())
    }
}

impl MutationBackend for MemoryPlatform {
    fn apply(&self, command: &MutationCommand) -> Result<()> {
        let id = command.resource_id();
        let now = self.now();
        let fault = {
            let mut state = self.state.lock();
            if !state.stores.contains_key(id) {
                return Err(Error::NotFound(id.to_string()));
            }
            let earlier = state.applies.get(id).copied().unwrap_or(0);
            *state.applies.entry(id.to_string()).or_default() += 1;
            state.cancel_requests.remove(id);

            match command.priority() {
                Priority::Low if state.contended.get(id).is_some_and(|after| earlier >= *after) => {
                    return Err(Error::Mutation {
                        code: codes::CONTENTION,
                        message: "lock request time out period exceeded".into(),
                    });
                }
                Priority::High if state.reject_high.contains(id) => {
                    return Err(Error::Mutation {
                        code: codes::CONTENTION,
                        message: "deadlock victim".into(),
                    });
                }
                _ => {}
            }

            let fault = state.faults.get_mut(id).and_then(|q| q.pop_front());
            if let Some(Fault::LandAfterCancel { delay }) = &fault {
                state
                    .landing
                    .insert(id.to_string(), (command.target(), *delay));
            }
            fault
        };

        match fault {
            None => {
                self.state.lock().set(id, command.target(), now);
                Ok(())
            }
            Some(Fault::Fail { code, message }) => Err(Error::Mutation { code, message }),
            Some(Fault::Drift(value)) => {
                self.state.lock().set(id, value, now);
                Ok(())
            }
            Some(Fault::Hang) => {
                self.wait_for_cancel(id);
                Err(Error::Mutation {
                    code: codes::CANCELLED,
                    message: "operation cancelled".into(),
                })
            }
            Some(Fault::LandAfterCancel { .. }) => {
                if !self.wait_for_cancel(id) {
                    let now = self.now();
                    self.state.lock().set(id, command.target(), now);
                }
                Ok(())
            }
        }
    }

    fn cancel(&self, command: &MutationCommand) -> Result<()> {
        let id = command.resource_id();
        let now = self.now();
        let mut state = self.state.lock();
        *state.cancels.entry(id.to_string()).or_default() += 1;
        state.cancel_requests.insert(id.to_string());
        if let Some((value, delay)) = state.landing.remove(id) {
            let visible_at = now.map(|now| after(now, delay));
            state
                .late
                .insert(id.to_string(), LateApply { value, visible_at });
        }
        drop(state);
        self.cancelled.notify_all();
        Ok(())
    }

    fn current_capacity(&self, resource_id: &str) -> Result<u64> {
        self.capacity(resource_id)
            .ok_or_else(|| Error::NotFound(resource_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Priority;
    use stagger_core::ManualClock;

    fn cmd(id: &str, target: u64) -> MutationCommand {
        MutationCommand::build(id, target, Priority::Low).unwrap()
    }

    #[test]
    fn test_apply_and_history() {
        let platform = MemoryPlatform::new();
        platform.add_store("sales", 2000);
        platform.apply(&cmd("sales", 1000)).unwrap();
        platform.apply(&cmd("sales", 1000)).unwrap();
        assert_eq!(platform.capacity("sales"), Some(1000));
        assert_eq!(platform.apply_count("sales"), 2);
        assert_eq!(platform.history("sales"), vec![1000]);
    }

    #[test]
    fn test_discovery_filters_ineligible() {
        let platform = MemoryPlatform::new();
        platform.add_store("a", 10);
        platform.add_ineligible_store("b", 20);
        let found = platform.list_eligible().unwrap();
        assert_eq!(found, vec![Resource::new("a", 10)]);

        platform.fail_discovery("catalog offline");
        assert!(matches!(platform.list_eligible(), Err(Error::Discovery(_))));
    }

    #[test]
    fn test_faults_consumed_in_order() {
        let platform = MemoryPlatform::new();
        platform.add_store("sales", 2000);
        platform.inject("sales", Fault::contention());
        platform.inject("sales", Fault::Drift(999));

        let err = platform.apply(&cmd("sales", 1000)).unwrap_err();
        assert_eq!(err.code(), codes::CONTENTION);
        platform.apply(&cmd("sales", 1000)).unwrap();
        assert_eq!(platform.capacity("sales"), Some(999));
        platform.apply(&cmd("sales", 1000)).unwrap();
        assert_eq!(platform.capacity("sales"), Some(1000));
    }

    #[test]
    fn test_hang_released_by_cancel() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.add_store("sales", 2000);
        platform.inject("sales", Fault::Hang);

        let worker = {
            let platform = platform.clone();
            std::thread::spawn(move || platform.apply(&cmd("sales", 1000)))
        };
        std::thread::sleep(Duration::from_millis(50));
        platform.cancel(&cmd("sales", 1000)).unwrap();

        let result = worker.join().unwrap();
        assert_eq!(result.unwrap_err().code(), codes::CANCELLED);
        assert_eq!(platform.capacity("sales"), Some(2000));
        assert_eq!(platform.cancel_count("sales"), 1);
    }

    #[test]
    fn test_land_after_cancel_waits_for_clock() {
        let clock = ManualClock::at_epoch();
        let platform = Arc::new(MemoryPlatform::new().with_clock(Arc::new(clock.clone())));
        platform.add_store("sales", 2000);
        platform.inject(
            "sales",
            Fault::LandAfterCancel {
                delay: Duration::from_secs(2),
            },
        );

        let worker = {
            let platform = platform.clone();
            std::thread::spawn(move || platform.apply(&cmd("sales", 1000)))
        };
        std::thread::sleep(Duration::from_millis(50));
        platform.cancel(&cmd("sales", 1000)).unwrap();
        worker.join().unwrap().unwrap();

        assert_eq!(platform.capacity("sales"), Some(2000));
        clock.advance(Duration::from_secs(2));
        assert_eq!(platform.capacity("sales"), Some(1000));
    }

    #[test]
    fn test_uncancelled_landing_does_not_leak() {
        let clock = ManualClock::at_epoch();
        let platform = MemoryPlatform::new()
            .with_clock(Arc::new(clock.clone()))
            .with_max_hang(Duration::from_millis(50));
        platform.add_store("sales", 2000);
        platform.inject(
            "sales",
            Fault::LandAfterCancel {
                delay: Duration::from_secs(2),
            },
        );

        // Nobody cancels: the apply gives up waiting and lands at once.
        platform.apply(&cmd("sales", 1000)).unwrap();
        assert_eq!(platform.capacity("sales"), Some(1000));

        // A later cancel must not replay the stale landing.
        platform.apply(&cmd("sales", 1500)).unwrap();
        platform.cancel(&cmd("sales", 1500)).unwrap();
        clock.advance(Duration::from_secs(5));
        assert_eq!(platform.capacity("sales"), Some(1500));
        assert_eq!(platform.history("sales"), vec![1000, 1500]);
    }

    #[test]
    fn test_priority_contention() {
        let platform = MemoryPlatform::new();
        platform.add_store("sales", 2000);
        platform.contend_low_priority("sales", 1);

        platform.apply(&cmd("sales", 1000)).unwrap();
        let err = platform.apply(&cmd("sales", 2000)).unwrap_err();
        assert_eq!(err.code(), codes::CONTENTION);
        assert_eq!(platform.capacity("sales"), Some(1000));

        let high = MutationCommand::build("sales", 2000, Priority::High).unwrap();
        platform.apply(&high).unwrap();
        assert_eq!(platform.capacity("sales"), Some(2000));

        platform.reject_high_priority("sales");
        assert!(platform.apply(&high).is_err());
        assert_eq!(platform.apply_count("sales"), 4);
    }

    #[test]
    fn test_unknown_store() {
        let platform = MemoryPlatform::new();
        assert!(matches!(
            platform.apply(&cmd("ghost", 1)),
            Err(Error::NotFound(_))
        ));
        assert!(platform.current_capacity("ghost").is_err());
    }
}
