//! Rate-limited event queue feeding the flusher
//!
//! This module provides:
//! - A deduplicating FIFO work queue with graceful shutdown
//! - Rate limiters for delayed requeues (per-item backoff, token bucket)
//! - [`RateLimitingQueue`], the combination used between aggregator and flusher

mod rate_limiter;
mod work_queue;

pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialFailureRateLimiter,
    MaxOfRateLimiter, RateLimiter,
};
pub use work_queue::WorkQueue;

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Work queue with rate-limited and delayed adds
pub struct RateLimitingQueue<T> {
    queue: Arc<WorkQueue<T>>,
    limiter: Box<dyn RateLimiter<T>>,
}

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(limiter: Box<dyn RateLimiter<T>>) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new()),
            limiter,
        }
    }

    /// Queue using the default controller rate limiter
    pub fn with_default_rate_limiter() -> Self {
        Self::new(Box::new(default_controller_rate_limiter()))
    }

    pub fn add(&self, item: T) {
        self.queue.add(item);
    }

    /// Add `item` once `delay` has elapsed. Must be called within a Tokio runtime.
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.queue.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.queue.add(item);
            return;
        }

        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Add `item` after the delay chosen by the rate limiter
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.limiter.when(&item);
        debug!(delay_ms = delay.as_millis() as u64, "Requeueing item with backoff");
        self.add_after(item, delay);
    }

    /// Clear the retry backoff recorded for `item`
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// See [`WorkQueue::get`]
    pub async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    pub fn done(&self, item: &T) {
        self.queue.done(item);
    }

    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
