//! Concurrency-safe FIFO work queue with per-item deduplication
//!
//! Items are compared by identity (`Eq`/`Hash`), not by full content. An item
//! added while an equal one is pending keeps its queue position but replaces
//! the stored value, so consumers always receive the latest copy. An item added
//! while it is being processed is queued again once the consumer calls `done`.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

struct State<T> {
    /// Items waiting to be handed out, in arrival order
    queue: VecDeque<T>,
    /// Latest value of every item that needs processing (queued, or re-added
    /// while processing)
    dirty: HashSet<T>,
    /// Items currently held by a consumer
    processing: HashSet<T>,
    shutting_down: bool,
}

/// Multi-producer, multi-consumer work queue
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    available: Notify,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `item` as needing processing. While an equal item is pending its
    /// value is replaced without requeueing. No-op after shutdown.
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        if state.dirty.contains(&item) {
            state.dirty.replace(item);
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.available.notify_one();
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the queue is shut down and drained; items still
    /// queued at shutdown are handed out first.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(queued) = state.queue.pop_front() {
                    let item = state.dirty.take(&queued).unwrap_or(queued);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark processing of `item` complete; re-queues it if it was added meanwhile
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.available.notify_one();
        }
    }

    /// Stop accepting items and wake every waiting consumer
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.available.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of items waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
