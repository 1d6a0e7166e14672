//! `TraceLockMap` — one semaphore per `trace_id`, so concurrent calls
//! into the same Trace (e.g. an HTTP turn racing a `submit_hitl`) serialize
//! instead of interleaving checkpoint writes. Grounded in the teacher's
//! `SessionLockMap` (`gateway/runtime/session_lock.rs`), generalized from a
//! `String` session key to a `Uuid` trace key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

#[derive(Default)]
pub struct TraceLockMap {
    locks: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl TraceLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore_for(&self, trace_id: Uuid) -> Arc<Semaphore> {
        self.locks
            .lock()
            .entry(trace_id)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Acquire the single permit for `trace_id`, blocking any other holder
    /// of the same trace's lock until the returned permit is dropped.
    pub async fn acquire(&self, trace_id: Uuid) -> OwnedSemaphorePermit {
        self.semaphore_for(trace_id)
            .acquire_owned()
            .await
            .expect("semaphore is never closed")
    }

    /// Drop every semaphore with no outstanding permits, so a long-lived
    /// map doesn't grow unbounded across thousands of finished traces.
    pub fn prune_idle(&self) {
        self.locks.lock().retain(|_, sem| sem.available_permits() == 0 || Arc::strong_count(sem) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_for_first_to_release() {
        let locks = Arc::new(TraceLockMap::new());
        let trace_id = Uuid::new_v4();

        let permit = locks.acquire(trace_id).await;
        let locks2 = locks.clone();
        let handle = tokio::spawn(async move {
            let _permit = locks2.acquire(trace_id).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(permit);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn distinct_traces_do_not_contend() {
        let locks = TraceLockMap::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _permit_a = locks.acquire(a).await;
        let _permit_b = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(b))
            .await
            .expect("acquiring a distinct trace must not block");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn prune_idle_drops_unreferenced_semaphores() {
        let locks = TraceLockMap::new();
        let trace_id = Uuid::new_v4();
        {
            let _permit = locks.acquire(trace_id).await;
        }
        locks.prune_idle();
        assert!(locks.is_empty());
    }
}
