//! A keyed map that runs at most one computation per key at a time.
//!
//! Concurrent requests for a key that is being computed block until the running
//! computation finishes and then share its result. Invalidating a key detaches its
//! running computation: callers already waiting for it still get its result, but the
//! result is not stored and later requests start over.

use core::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

/// One running computation, shared by its leader and everybody waiting for it.
#[derive(Debug)]
struct Flight<V, E> {
    /// The result and whether it was stored, once the leader is done.
    outcome: Mutex<Option<(Result<V, E>, bool)>>,
    /// Signalled when `outcome` is set.
    landed: Condvar,
}

impl<V: Clone, E: Clone> Flight<V, E> {
    /// A flight that has not landed yet.
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(None),
            landed: Condvar::new(),
        })
    }

    /// Publishes the outcome and wakes every waiter.
    fn land(&self, result: Result<V, E>, retained: bool) {
        *self.outcome.lock() = Some((result, retained));
        self.landed.notify_all();
    }

    /// Blocks until the flight landed.
    fn wait(&self) -> (Result<V, E>, bool) {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some((result, retained)) = &*outcome {
                return (result.clone(), *retained);
            }
            self.landed.wait(&mut outcome);
        }
    }
}

/// State of one key.
#[derive(Debug)]
enum SlotState<V, E> {
    /// A leader is computing the value.
    InFlight(Arc<Flight<V, E>>),
    /// Computed successfully.
    Ready(V),
    /// Computation failed. Kept until the key is invalidated.
    Failed(E),
}

/// A key's state plus bookkeeping.
#[derive(Debug)]
struct Slot<V, E> {
    /// Current state.
    state: SlotState<V, E>,
    /// Logical time of the last access, for LRU eviction.
    last_used: u64,
}

impl<V, E> Slot<V, E> {
    /// Whether the slot holds `flight`.
    fn carries(&self, flight: &Arc<Flight<V, E>>) -> bool {
        matches!(&self.state, SlotState::InFlight(current) if Arc::ptr_eq(current, flight))
    }

    /// The value, if the slot is settled successfully.
    fn into_value(self) -> Option<V> {
        match self.state {
            SlotState::Ready(value) => Some(value),
            SlotState::InFlight(_) | SlotState::Failed(_) => None,
        }
    }
}

/// Everything behind the lock.
#[derive(Debug)]
struct Shared<K, V, E> {
    /// Slots by key.
    slots: FxHashMap<K, Slot<V, E>>,
    /// Logical clock.
    clock: u64,
}

impl<K, V, E> Shared<K, V, E> {
    /// Advances the logical clock.
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// How a [`Lookup`] was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[expect(clippy::exhaustive_enums, reason = "It is expected to be exhaustive")]
pub enum Origin {
    /// The value was already there.
    Hit,
    /// The value was in flight; this caller waited for another caller's computation.
    Joined {
        /// Whether that computation's result was stored, see [`Origin::Computed`].
        retained: bool,
    },
    /// This caller ran the computation.
    Computed {
        /// Whether the result was stored. `false` when the key was invalidated while
        /// computing; the caller and its waiters receive the result but nobody else will.
        retained: bool,
    },
}

impl Origin {
    /// Whether the result is the one stored under the key. Only `false` for results of
    /// computations that were invalidated while running.
    #[inline]
    #[must_use]
    pub const fn is_retained(self) -> bool {
        match self {
            Self::Hit => true,
            Self::Joined { retained } | Self::Computed { retained } => retained,
        }
    }
}

/// Result of [`CoalescingMap::get_or_compute`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Lookup<V, E> {
    /// The shared value or the shared failure.
    pub result: Result<V, E>,
    /// How it was obtained.
    pub origin: Origin,
}

/// A keyed cache with at most one in-flight computation per key.
pub struct CoalescingMap<K, V, E> {
    /// Slots by key.
    shared: Mutex<Shared<K, V, E>>,
    /// Produces the stored failure when a computation panics.
    panicked: fn() -> E,
}

impl<K, V, E> core::fmt::Debug for CoalescingMap<K, V, E> {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoalescingMap").finish_non_exhaustive()
    }
}

/// Lands the flight as failed if the leader's computation unwinds.
struct LeaderGuard<'map, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    /// The map being computed into.
    map: &'map CoalescingMap<K, V, E>,
    /// The key being computed.
    key: &'map K,
    /// The flight of the computation, `None` once it landed normally.
    flight: Option<Arc<Flight<V, E>>>,
}

impl<K, V, E> Drop for LeaderGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    #[inline]
    fn drop(&mut self) {
        if let Some(flight) = self.flight.take() {
            self.map.settle(self.key, &flight, Err((self.map.panicked)()));
        }
    }
}

impl<K, V, E> CoalescingMap<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    /// Creates an empty map. `panicked` builds the failure stored when a computation panics.
    #[inline]
    #[must_use]
    pub fn new(panicked: fn() -> E) -> Self {
        Self {
            shared: Mutex::new(Shared {
                slots: FxHashMap::default(),
                clock: 0,
            }),
            panicked,
        }
    }

    /// Returns the value for `key`, computing it with `compute` if nobody has yet.
    ///
    /// If another caller is already computing `key` this blocks until it is done and
    /// returns the same result. Failures are remembered until the key is invalidated.
    #[inline]
    pub fn get_or_compute<F>(&self, key: &K, compute: F) -> Lookup<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut shared = self.shared.lock();
        let now = shared.tick();
        let flight = match shared.slots.get_mut(key) {
            Some(slot) => {
                slot.last_used = now;
                match &slot.state {
                    SlotState::Ready(value) => {
                        return Lookup {
                            result: Ok(value.clone()),
                            origin: Origin::Hit,
                        };
                    }
                    SlotState::Failed(error) => {
                        return Lookup {
                            result: Err(error.clone()),
                            origin: Origin::Hit,
                        };
                    }
                    SlotState::InFlight(flight) => {
                        let flight = Arc::clone(flight);
                        drop(shared);
                        let (result, retained) = flight.wait();
                        return Lookup {
                            result,
                            origin: Origin::Joined { retained },
                        };
                    }
                }
            }
            None => {
                let flight = Flight::new();
                shared.slots.insert(
                    key.clone(),
                    Slot {
                        state: SlotState::InFlight(Arc::clone(&flight)),
                        last_used: now,
                    },
                );
                flight
            }
        };
        drop(shared);

        let mut guard = LeaderGuard {
            map: self,
            key,
            flight: Some(flight),
        };
        let result = compute();
        let retained = match guard.flight.take() {
            Some(flight) => self.settle(key, &flight, result.clone()),
            None => false,
        };
        Lookup {
            result,
            origin: Origin::Computed { retained },
        }
    }

    /// Stores `result` if `flight` still occupies `key`, then lands the flight.
    /// Returns whether the result was stored.
    fn settle(&self, key: &K, flight: &Arc<Flight<V, E>>, result: Result<V, E>) -> bool {
        let mut shared = self.shared.lock();
        let retained = match shared.slots.get_mut(key) {
            Some(slot) if slot.carries(flight) => {
                slot.state = match &result {
                    Ok(value) => SlotState::Ready(value.clone()),
                    Err(error) => SlotState::Failed(error.clone()),
                };
                true
            }
            _ => false,
        };
        drop(shared);
        flight.land(result, retained);
        retained
    }

    /// Returns the settled state of `key` without blocking or computing.
    ///
    /// `None` if the key is absent or still in flight.
    #[inline]
    pub fn try_get(&self, key: &K) -> Option<Result<V, E>> {
        let mut shared = self.shared.lock();
        let now = shared.tick();
        let slot = shared.slots.get_mut(key)?;
        match &slot.state {
            SlotState::Ready(value) => {
                slot.last_used = now;
                Some(Ok(value.clone()))
            }
            SlotState::Failed(error) => Some(Err(error.clone())),
            SlotState::InFlight(_) => None,
        }
    }

    /// Whether a computation for `key` is running.
    #[inline]
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.shared
            .lock()
            .slots
            .get(key)
            .is_some_and(|slot| matches!(slot.state, SlotState::InFlight(_)))
    }

    /// Removes `key`, returning its value if it had one.
    ///
    /// A computation in flight for `key` keeps running and is handed to the callers
    /// waiting for it, but its result will not be stored.
    #[inline]
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.shared.lock().slots.remove(key)?.into_value()
    }

    /// Removes `key` if its value satisfies `predicate`, like [`invalidate`](Self::invalidate).
    #[inline]
    pub fn invalidate_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut shared = self.shared.lock();
        let matches = shared
            .slots
            .get(key)
            .is_some_and(|slot| matches!(&slot.state, SlotState::Ready(value) if predicate(value)));
        if !matches {
            return None;
        }
        shared.slots.remove(key)?.into_value()
    }

    /// Removes `key` if it holds a failure, so that the next request computes again.
    #[inline]
    pub fn forget_failure(&self, key: &K) -> bool {
        let mut shared = self.shared.lock();
        let failed = shared
            .slots
            .get(key)
            .is_some_and(|slot| matches!(slot.state, SlotState::Failed(_)));
        if failed {
            shared.slots.remove(key);
        }
        failed
    }

    /// Invalidates every key for which `predicate` holds on its settled value.
    /// Failed and in-flight keys are only passed to `unsettled_predicate`.
    #[inline]
    pub fn invalidate_matching(
        &self,
        mut predicate: impl FnMut(&K, &V) -> bool,
        mut unsettled_predicate: impl FnMut(&K) -> bool,
    ) -> Vec<(K, Option<V>)> {
        let mut shared = self.shared.lock();
        let doomed: Vec<K> = shared
            .slots
            .iter()
            .filter(|&(key, slot)| match &slot.state {
                SlotState::Ready(value) => predicate(key, value),
                SlotState::InFlight(_) | SlotState::Failed(_) => unsettled_predicate(key),
            })
            .map(|(key, _)| key.clone())
            .collect();

        doomed
            .into_iter()
            .map(|key| {
                let value = shared.slots.remove(&key).and_then(Slot::into_value);
                (key, value)
            })
            .collect()
    }

    /// Evicts least recently used settled values until at most `capacity` are held.
    /// In-flight keys are never evicted.
    #[inline]
    pub fn evict_to(&self, capacity: usize) -> Vec<(K, V)> {
        let mut shared = self.shared.lock();
        let mut candidates: Vec<(u64, K)> = shared
            .slots
            .iter()
            .filter(|(_, slot)| !matches!(slot.state, SlotState::InFlight(_)))
            .map(|(key, slot)| (slot.last_used, key.clone()))
            .collect();
        let Some(excess) = candidates.len().checked_sub(capacity).filter(|&excess| excess > 0)
        else {
            return Vec::new();
        };
        candidates.sort_unstable_by_key(|&(last_used, _)| last_used);

        let mut evicted = Vec::new();
        for (_, key) in candidates.into_iter().take(excess) {
            if let Some(value) = shared.slots.remove(&key).and_then(Slot::into_value) {
                evicted.push((key, value));
            }
        }
        evicted
    }

    /// Snapshot of every settled value.
    #[inline]
    pub fn values(&self) -> Vec<(K, V)> {
        self.shared
            .lock()
            .slots
            .iter()
            .filter_map(|(key, slot)| match &slot.state {
                SlotState::Ready(value) => Some((key.clone(), value.clone())),
                SlotState::InFlight(_) | SlotState::Failed(_) => None,
            })
            .collect()
    }

    /// Number of keys in any state.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.lock().slots.len()
    }

    /// Whether the map holds no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every key, returning the settled values. Results of computations in
    /// flight are not stored.
    #[inline]
    pub fn clear(&self) -> Vec<(K, V)> {
        self.shared
            .lock()
            .slots
            .drain()
            .filter_map(|(key, slot)| Some((key, slot.into_value()?)))
            .collect()
    }

    /// Number of callers blocked on the computation running for `key`.
    #[cfg(test)]
    fn waiting_on(&self, key: &K) -> usize {
        match self.shared.lock().slots.get(key).map(|slot| &slot.state) {
            // the slot and the leader hold one reference each
            Some(SlotState::InFlight(flight)) => Arc::strong_count(flight).saturating_sub(2),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    };

    use super::*;

    type Map = CoalescingMap<u32, Arc<str>, Arc<str>>;

    fn map() -> Map {
        CoalescingMap::new(|| Arc::from("panicked"))
    }

    #[test_log::test]
    fn concurrent_requests_share_one_computation() {
        let map = Arc::new(map());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (map, runs, barrier) = (map.clone(), runs.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    map.get_or_compute(&7, || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(core::time::Duration::from_millis(50));
                        Ok(Arc::from("seven"))
                    })
                })
            })
            .collect();

        for handle in handles {
            let lookup = handle.join().unwrap();
            assert_eq!(&*lookup.result.unwrap(), "seven");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(&*map.try_get(&7).unwrap().unwrap(), "seven");
    }

    #[test_log::test]
    fn failures_are_cached_until_invalidated() {
        let map = map();
        assert!(!map.forget_failure(&1));
        let first = map.get_or_compute(&1, || Err(Arc::from("boom")));
        assert_eq!(first.origin, Origin::Computed { retained: true });
        let second = map.get_or_compute(&1, || Ok(Arc::from("fine")));
        assert_eq!(&*second.result.unwrap_err(), "boom");
        assert_eq!(second.origin, Origin::Hit);

        assert!(map.forget_failure(&1));
        let third = map.get_or_compute(&1, || Ok(Arc::from("fine")));
        assert_eq!(&*third.result.unwrap(), "fine");
    }

    #[test_log::test]
    fn invalidation_during_computation_drops_the_result() {
        let map = map();
        let lookup = map.get_or_compute(&3, || {
            map.invalidate(&3);
            Ok(Arc::from("stale"))
        });
        assert_eq!(lookup.origin, Origin::Computed { retained: false });
        assert_eq!(&*lookup.result.unwrap(), "stale");
        assert!(map.try_get(&3).is_none());
        assert!(map.is_empty());
    }

    #[test_log::test]
    fn waiters_of_an_invalidated_computation_share_its_result() {
        let map = Arc::new(map());
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let leader = {
            let (map, started, release) = (map.clone(), started.clone(), release.clone());
            std::thread::spawn(move || {
                map.get_or_compute(&1, || {
                    started.wait();
                    release.wait();
                    Ok(Arc::from("leader"))
                })
            })
        };
        started.wait();
        let runs = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let (map, runs) = (map.clone(), runs.clone());
            std::thread::spawn(move || {
                map.get_or_compute(&1, || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::from("second computation"))
                })
            })
        };
        while map.waiting_on(&1) == 0 {
            std::thread::yield_now();
        }

        assert!(map.invalidate(&1).is_none());
        release.wait();
        let leader = leader.join().unwrap();
        let waiter = waiter.join().unwrap();

        assert_eq!(&*leader.result.unwrap(), "leader");
        assert_eq!(leader.origin, Origin::Computed { retained: false });
        assert_eq!(&*waiter.result.unwrap(), "leader");
        assert_eq!(waiter.origin, Origin::Joined { retained: false });
        assert!(!waiter.origin.is_retained());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(map.is_empty());
    }

    #[test_log::test]
    fn panicking_computation_leaves_a_failure() {
        let map = Arc::new(map());
        let cloned = map.clone();
        let outcome = std::thread::spawn(move || {
            cloned.get_or_compute(&5, || panic!("compiler crashed"));
        })
        .join();
        assert!(outcome.is_err());
        assert_eq!(&*map.try_get(&5).unwrap().unwrap_err(), "panicked");
    }

    #[test_log::test]
    fn eviction_is_least_recently_used() {
        let map = map();
        for key in 0..3 {
            drop(map.get_or_compute(&key, || Ok(Arc::from(key.to_string()))));
        }
        drop(map.try_get(&0));

        assert!(map.invalidate_if(&2, |value| &**value == "nope").is_none());
        let evicted = map.evict_to(2);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, 1);
        assert!(map.try_get(&0).is_some());
        assert!(map.try_get(&2).is_some());
    }
}
