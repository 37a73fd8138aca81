// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Observable per-slug counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugSnapshot {
    /// 0 means unlimited.
    pub capacity: usize,
    pub running: usize,
    pub queued: usize,
}

#[derive(Clone)]
struct SlugState {
    /// Absent for unlimited slugs; executions are still counted.
    semaphore: Option<Arc<Semaphore>>,
    capacity: usize,
    running: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

/// A held slot.  Dropping it releases the permit, which wakes the next FIFO
/// waiter on the same slug.
pub struct SlotGuard {
    _permit: Option<OwnedSemaphorePermit>,
    running: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decrements the queued gauge even when the waiting future is cancelled.
struct QueuedGuard(Arc<AtomicUsize>);

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owner of the per-agent-slug semaphores and wait queues.  No other
/// component may release a slot it did not acquire; release happens only
/// through [`SlotGuard`].
#[derive(Default)]
pub struct ConcurrencyManager {
    slugs: DashMap<String, SlugState>,
}

impl ConcurrencyManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, slug: &str, capacity: usize) -> SlugState {
        self.slugs
            .entry(slug.to_string())
            .or_insert_with(|| SlugState {
                semaphore: if capacity > 0 {
                    Some(Arc::new(Semaphore::new(capacity)))
                } else {
                    None
                },
                capacity,
                running: Arc::new(AtomicUsize::new(0)),
                queued: Arc::new(AtomicUsize::new(0)),
            })
            .clone()
    }

    /// Non-blocking acquisition.  `None` means the caller must queue.
    pub fn try_acquire(&self, slug: &str, capacity: usize) -> Option<SlotGuard> {
        let state = self.state(slug, capacity);
        let permit = match &state.semaphore {
            None => None,
            Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => return None,
            },
        };
        state.running.fetch_add(1, Ordering::SeqCst);
        Some(SlotGuard { _permit: permit, running: state.running })
    }

    /// Blocking acquisition.  Waiters are served in FIFO order; the queued
    /// gauge reflects the wait even when the future is dropped.
    pub async fn acquire(&self, slug: &str, capacity: usize) -> anyhow::Result<SlotGuard> {
        let state = self.state(slug, capacity);
        let permit = match &state.semaphore {
            None => None,
            Some(semaphore) => {
                state.queued.fetch_add(1, Ordering::SeqCst);
                let queued = QueuedGuard(Arc::clone(&state.queued));
                let permit = Arc::clone(semaphore).acquire_owned().await?;
                drop(queued);
                debug!(slug, "slot acquired after wait");
                Some(permit)
            }
        };
        state.running.fetch_add(1, Ordering::SeqCst);
        Ok(SlotGuard { _permit: permit, running: state.running })
    }

    pub fn snapshot(&self) -> HashMap<String, SlugSnapshot> {
        self.slugs
            .iter()
            .map(|entry| {
                let state = entry.value();
                (
                    entry.key().clone(),
                    SlugSnapshot {
                        capacity: state.capacity,
                        running: state.running.load(Ordering::SeqCst),
                        queued: state.queued.load(Ordering::SeqCst),
                    },
                )
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn capacity_is_never_exceeded() {
        let manager = Arc::new(ConcurrencyManager::new());
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let manager = manager.clone();
            let peak = peak.clone();
            let current = current.clone();
            handles.push(tokio::spawn(async move {
                let slot = manager.acquire("explore", 3).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                drop(slot);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn waiters_are_served_fifo() {
        let manager = Arc::new(ConcurrencyManager::new());
        let first = manager.try_acquire("solo", 1).unwrap();

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for label in ["a", "b", "c"] {
            let manager = manager.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let slot = manager.acquire("solo", 1).await.unwrap();
                order.lock().unwrap().push(label);
                drop(slot);
            }));
            // Give each waiter time to join the queue before the next.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(manager.snapshot()["solo"].queued, 3);
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn try_acquire_fails_when_full() {
        let manager = ConcurrencyManager::new();
        let slot = manager.try_acquire("one", 1).unwrap();
        assert!(manager.try_acquire("one", 1).is_none());
        drop(slot);
        assert!(manager.try_acquire("one", 1).is_some());
    }

    #[tokio::test]
    async fn zero_capacity_is_unlimited_but_counted() {
        let manager = ConcurrencyManager::new();
        let slots: Vec<SlotGuard> = (0..8)
            .map(|_| manager.try_acquire("free", 0).unwrap())
            .collect();
        assert_eq!(manager.snapshot()["free"].running, 8);
        assert_eq!(manager.snapshot()["free"].capacity, 0);
        drop(slots);
        assert_eq!(manager.snapshot()["free"].running, 0);
    }

    #[tokio::test]
    async fn snapshot_tracks_running_and_release() {
        let manager = ConcurrencyManager::new();
        let slot = manager.try_acquire("x", 2).unwrap();
        let snap = manager.snapshot();
        assert_eq!(snap["x"], SlugSnapshot { capacity: 2, running: 1, queued: 0 });
        drop(slot);
        assert_eq!(manager.snapshot()["x"].running, 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_queue_gauge_clean() {
        let manager = Arc::new(ConcurrencyManager::new());
        let held = manager.try_acquire("busy", 1).unwrap();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let _ = manager.acquire("busy", 1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.snapshot()["busy"].queued, 1);
        waiter.abort();
        let _ = waiter.await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.snapshot()["busy"].queued, 0);
        drop(held);
    }
}
