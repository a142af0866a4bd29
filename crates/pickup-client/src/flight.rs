//! Per-key in-flight guards
//!
//! [`SingleFlight`] collapses concurrent operations on the same key into one
//! spawned task whose result every caller shares. [`KeyedLocks`] serialises
//! operations per key without blocking other keys.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};

/// The spawned operation ended without producing a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightAborted;

type Outcome<V, E> = Result<Result<V, E>, FlightAborted>;
type Pending<V, E> = Shared<BoxFuture<'static, Outcome<V, E>>>;

/// Map from key to the pending operation for that key
pub struct SingleFlight<K, V, E> {
    inflight: Arc<Mutex<HashMap<K, Pending<V, E>>>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `make()` for `key` unless an operation for it is already pending,
    /// in which case wait for that one instead.
    ///
    /// The operation runs on its own task, so it completes (and its side
    /// effects land) even if every caller stops waiting. The key is cleared
    /// by that task once the result is ready. A panicking operation yields
    /// [`FlightAborted`] for the caller to map.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Outcome<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let pending = {
            let mut inflight = self.inflight.lock().await;

            match inflight.get(&key) {
                Some(pending) => {
                    debug!("Joining in-flight operation for {:?}", key);
                    pending.clone()
                }
                None => {
                    let operation = make();
                    let map = Arc::clone(&self.inflight);
                    let task_key = key.clone();

                    let handle = tokio::spawn(async move {
                        let result = AssertUnwindSafe(operation).catch_unwind().await;
                        map.lock().await.remove(&task_key);
                        result.map_err(|_| {
                            error!("In-flight operation for {:?} panicked", task_key);
                            FlightAborted
                        })
                    });

                    let pending: Pending<V, E> = async move {
                        handle.await.unwrap_or(Err(FlightAborted))
                    }
                    .boxed()
                    .shared();

                    inflight.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Whether an operation for `key` is currently pending
    pub async fn is_in_flight(&self, key: &K) -> bool {
        self.inflight.lock().await.contains_key(key)
    }

    /// Number of pending operations
    pub async fn len(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

type LockMap<K> = Arc<StdMutex<HashMap<K, Arc<Mutex<()>>>>>;

/// One async mutex per key
///
/// An entry lives only while someone holds or waits for its lock.
pub struct KeyedLocks<K> {
    locks: LockMap<K>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub async fn acquire(&self, key: &K) -> KeyedGuard<K> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // waiters cancelled mid-acquire leave unused entries behind
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        KeyedGuard {
            guard: Some(lock.lock_owned().await),
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Held lock for one key; can be moved into a spawned task
pub struct KeyedGuard<K: Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    locks: LockMap<K>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // only the map's own handle left: nobody holds or waits for the key
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
