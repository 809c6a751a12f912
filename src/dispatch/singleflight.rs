//! At most one in-flight computation per key within this process.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct Flight<T: Clone> {
    id: u64,
    fut: Shared<BoxFuture<'static, T>>,
    /// Callers currently awaiting `fut`.
    waiters: usize,
}

/// Concurrent callers for the same key share one computation and its output.
pub struct SingleFlight<T: Clone> {
    inflight: Mutex<HashMap<String, Flight<T>>>,
    next_id: AtomicU64,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `make()` for `key` unless a flight is already up, in which case its
    /// output is awaited instead. Returns the output and whether this caller
    /// started the flight.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, fut, leader) = {
            let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match map.get_mut(key) {
                Some(flight) => {
                    flight.waiters += 1;
                    (flight.id, flight.fut.clone(), false)
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let fut = make().boxed().shared();
                    map.insert(
                        key.to_string(),
                        Flight {
                            id,
                            fut: fut.clone(),
                            waiters: 1,
                        },
                    );
                    (id, fut, true)
                }
            }
        };

        let mut guard = FlightGuard {
            flights: self,
            key,
            id,
            done: false,
        };
        let out = fut.await;
        guard.done = true;
        drop(guard);
        (out, leader)
    }

    /// Called once per waiter, on completion or when its future is dropped.
    fn leave(&self, key: &str, id: u64, done: bool) {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        let retire = match map.get_mut(key) {
            // A newer flight under the same key is not ours to touch.
            Some(flight) if flight.id == id => {
                flight.waiters = flight.waiters.saturating_sub(1);
                // First finisher retires the flight; so does the last cancelled waiter.
                done || flight.waiters == 0
            }
            _ => false,
        };
        if retire {
            map.remove(key);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .map(|m| m.len())
            .unwrap_or_else(|e| e.into_inner().len())
    }
}

struct FlightGuard<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    flights: &'a SingleFlight<T>,
    key: &'a str,
    id: u64,
    done: bool,
}

impl<T> Drop for FlightGuard<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.flights.leave(self.key, self.id, self.done);
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let flights = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("k", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for h in handles {
            let (v, leader) = h.await.unwrap();
            assert_eq!(v, 42);
            leaders += leader as u32;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_flight_is_forgotten() {
        let flights = SingleFlight::<u32>::new();
        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            flights.run("k", futures::future::pending::<u32>),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(flights.in_flight(), 0);

        // The key is free for a fresh computation.
        let (v, leader) = flights.run("k", || async { 7 }).await;
        assert_eq!(v, 7);
        assert!(leader);
    }

    #[tokio::test]
    async fn test_dropping_a_follower_keeps_the_flight() {
        let flights = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let leader = {
            let flights = flights.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                flights
                    .run("k", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        9
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = tokio::time::timeout(
            Duration::from_millis(10),
            flights.run("k", || async { 0 }),
        )
        .await;
        assert!(follower.is_err());
        assert_eq!(flights.in_flight(), 1);

        assert_eq!(leader.await.unwrap(), (9, true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flights = SingleFlight::<u32>::new();
        let (a, la) = flights.run("k", || async { 1 }).await;
        let (b, lb) = flights.run("k", || async { 2 }).await;
        assert_eq!((a, b), (1, 2));
        assert!(la && lb);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let flights = SingleFlight::<&'static str>::new();
        let (a, b) = tokio::join!(
            flights.run("a", || async { "a" }),
            flights.run("b", || async { "b" })
        );
        assert_eq!((a.0, b.0), ("a", "b"));
        assert!(a.1 && b.1);
    }
}
