//! Request/response correlation.
//!
//! A caller registers a slot under the id it put in its request, writes
//! the request, then blocks on that slot. The read loop completes the slot
//! when a message carrying the same id arrives. Waiting happens on a
//! per-request `Condvar`, never on the table lock.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One outstanding request waiting for its response.
#[derive(Debug, Default)]
struct PendingRequest {
    response: Mutex<Option<Value>>,
    ready: Condvar,
}

impl PendingRequest {
    fn fulfil(&self, message: Value) {
        *lock(&self.response) = Some(message);
        self.ready.notify_one();
    }

    fn wait(&self, timeout: Duration) -> Option<Value> {
        let guard = lock(&self.response);
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |response| response.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }
}

/// Table of outstanding requests keyed by request id.
#[derive(Debug, Default)]
pub struct PendingTable {
    requests: Mutex<HashMap<u32, Arc<PendingRequest>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for `id`.
    ///
    /// The entry lives exactly as long as the returned guard, so it is
    /// removed on every exit path of the caller.
    pub fn register(&self, id: u32) -> PendingGuard<'_> {
        let request = Arc::new(PendingRequest::default());
        if lock(&self.requests)
            .insert(id, Arc::clone(&request))
            .is_some()
        {
            warn!("Replaced an outstanding request with id {}", id);
        }

        PendingGuard {
            table: self,
            id,
            request,
        }
    }

    /// Hand `message` to the caller waiting on `id`.
    ///
    /// Returns `false` when no such request is outstanding, e.g. because the
    /// caller already gave up waiting.
    pub fn complete(&self, id: u32, message: Value) -> bool {
        let request = lock(&self.requests).remove(&id);
        match request {
            Some(request) => {
                request.fulfil(message);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        lock(&self.requests).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.requests).is_empty()
    }

    fn release(&self, id: u32, request: &Arc<PendingRequest>) {
        let mut requests = lock(&self.requests);
        // Only remove our own slot; the id may have been re-registered.
        if requests
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, request))
        {
            requests.remove(&id);
        }
    }
}

/// Scoped registration in a [`PendingTable`]. Dropping it removes the entry.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: u32,
    request: Arc<PendingRequest>,
}

impl PendingGuard<'_> {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Block until the response arrives or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<Value> {
        self.request.wait(timeout)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.release(self.id, &self.request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_complete_wakes_waiter() {
        let table = Arc::new(PendingTable::new());
        let guard = table.register(7);

        let completer = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                table.complete(7, json!({"id": 7, "result": "OK"}))
            })
        };

        let response = guard.wait(Duration::from_secs(5));
        assert_eq!(response, Some(json!({"id": 7, "result": "OK"})));
        assert!(completer.join().unwrap());
    }

    #[test]
    fn test_response_before_wait_is_kept() {
        let table = PendingTable::new();
        let guard = table.register(1);

        assert!(table.complete(1, json!({"id": 1})));
        assert_eq!(guard.wait(Duration::from_millis(10)), Some(json!({"id": 1})));
    }

    #[test]
    fn test_wait_times_out() {
        let table = PendingTable::new();
        let guard = table.register(3);

        let started = Instant::now();
        assert_eq!(guard.wait(Duration::from_millis(50)), None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_guard_drop_removes_entry() {
        let table = PendingTable::new();
        {
            let _guard = table.register(11);
            assert!(table.contains(11));
            assert_eq!(table.len(), 1);
        }
        assert!(!table.contains(11));
        assert!(table.is_empty());
    }

    #[test]
    fn test_late_response_is_dropped() {
        let table = PendingTable::new();
        {
            let guard = table.register(5);
            assert_eq!(guard.wait(Duration::from_millis(5)), None);
        }
        assert!(!table.complete(5, json!({"id": 5, "result": "late"})));
        assert!(table.is_empty());
    }

    #[test]
    fn test_complete_removes_entry() {
        let table = PendingTable::new();
        let _guard = table.register(2);
        assert!(table.complete(2, json!({"id": 2})));
        assert!(!table.contains(2));
        // A duplicate response finds nothing
        assert!(!table.complete(2, json!({"id": 2})));
    }

    #[test]
    fn test_stale_guard_does_not_remove_newer_registration() {
        let table = PendingTable::new();
        let old = table.register(9);
        let new = table.register(9);

        drop(old);
        assert!(table.contains(9));
        drop(new);
        assert!(!table.contains(9));
    }

    #[test]
    fn test_responses_routed_by_id_out_of_order() {
        let table = Arc::new(PendingTable::new());
        let ids: Vec<u32> = (100..110).collect();

        let waiters: Vec<_> = ids
            .iter()
            .map(|&id| {
                let table = Arc::clone(&table);
                let (tx, rx) = std::sync::mpsc::channel();
                let handle = thread::spawn(move || {
                    let guard = table.register(id);
                    tx.send(()).unwrap();
                    guard.wait(Duration::from_secs(5))
                });
                rx.recv().unwrap();
                (id, handle)
            })
            .collect();

        for &id in ids.iter().rev() {
            assert!(table.complete(id, json!({"id": id, "result": id * 2})));
        }

        for (id, handle) in waiters {
            let response = handle.join().unwrap().expect("missing response");
            assert_eq!(response["id"], id);
            assert_eq!(response["result"], id * 2);
        }
        assert!(table.is_empty());
    }
}
