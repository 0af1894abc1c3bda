//! Request coalescing for concurrent cache misses.
//!
//! When several tasks miss the same cache key at once, one of them (the
//! leader) performs the load while the others wait. Waiters re-check the
//! cache once the leader finishes; if the leader failed or was cancelled,
//! one of them takes over. The in-flight entry is removed by a drop guard,
//! so an aborted leader never strands its waiters.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

pub struct SingleFlight<K> {
    in_flight: Mutex<HashMap<K, Arc<Notify>>>,
}

impl<K: Hash + Eq + Clone> SingleFlight<K> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, loading it at most once at a time.
    ///
    /// `lookup` is consulted before every attempt. `load` must store its
    /// result in the cache before returning so that waiters can find it.
    pub async fn run<V, E, L, F, Fut>(&self, key: &K, lookup: L, load: F) -> Result<V, E>
    where
        L: Fn() -> Option<V>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        loop {
            if let Some(value) = lookup() {
                return Ok(value);
            }

            let waiting_on = {
                let mut in_flight = self.in_flight.lock();
                match in_flight.get(key) {
                    Some(existing) => Some(Arc::clone(existing)),
                    None => {
                        in_flight.insert(key.clone(), Arc::new(Notify::new()));
                        None
                    }
                }
            };

            let Some(notify) = waiting_on else {
                let _guard = FlightGuard { flight: self, key };
                return load().await;
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // The leader removes its entry before notifying; if it is gone
            // already the wakeup may have been missed, so re-check instead.
            let still_running = self
                .in_flight
                .lock()
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, &notify));
            if still_running {
                notified.await;
            }
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

impl<K: Hash + Eq + Clone> Default for SingleFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

struct FlightGuard<'a, K: Hash + Eq + Clone> {
    flight: &'a SingleFlight<K>,
    key: &'a K,
}

impl<K: Hash + Eq + Clone> Drop for FlightGuard<'_, K> {
    fn drop(&mut self) {
        if let Some(notify) = self.flight.in_flight.lock().remove(self.key) {
            notify.notify_waiters();
        }
    }
}
