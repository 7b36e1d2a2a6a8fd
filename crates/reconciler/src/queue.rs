//! De-duplicating work queue for reconcile requests, and the delayed keys
//! that feed it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::poll_fn;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::time::{DelayQueue, delay_queue};

use crate::retry::RetryPolicy;

/// FIFO queue of NodeClaim names.
///
/// A name is queued at most once. While a name is being processed it is not
/// handed out again; adding it in the meantime marks it dirty, and it is
/// re-queued when processing finishes.
#[derive(Debug, Default)]
pub struct WorkQueue {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    processing: HashSet<String>,
    dirty: HashSet<String>,
    failures: HashMap<String, u32>,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` unless it is already waiting.
    pub fn add(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.processing.contains(&key) {
            self.dirty.insert(key);
            return;
        }
        if self.queued.insert(key.clone()) {
            self.queue.push_back(key);
        }
    }

    /// Take the next key and mark it as processing.
    pub fn pop(&mut self) -> Option<String> {
        let key = self.queue.pop_front()?;
        self.queued.remove(&key);
        self.processing.insert(key.clone());
        Some(key)
    }

    /// Finish processing `key`, re-queueing it if it was added meanwhile.
    pub fn done(&mut self, key: &str) {
        self.processing.remove(key);
        if self.dirty.remove(key) {
            self.add(key);
        }
    }

    /// Record a failed attempt for `key` and return the backoff before the
    /// next one.
    pub fn record_failure(&mut self, key: &str, policy: &RetryPolicy) -> (u32, Duration) {
        let attempts = self.failures.entry(key.to_string()).or_insert(0);
        *attempts = attempts.saturating_add(1);
        (*attempts, policy.calculate_backoff(*attempts))
    }

    /// Clear the failure count for `key`.
    pub fn forget(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if no keys are waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Keys currently being processed.
    pub fn processing(&self) -> usize {
        self.processing.len()
    }
}

/// Keys waiting for a deadline, with at most one timer per key.
///
/// Adding a key that already has a timer keeps whichever deadline is earlier.
pub struct DelayedKeys {
    timers: DelayQueue<String>,
    keys: HashMap<String, delay_queue::Key>,
}

impl DelayedKeys {
    /// Create an empty set of timers.
    pub fn new() -> Self {
        Self {
            timers: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }

    /// Make `key` due after `after`.
    pub fn add_after(&mut self, key: impl Into<String>, after: Duration) {
        let key = key.into();
        let deadline = Instant::now() + after;
        match self.keys.get(&key) {
            Some(timer) => {
                if deadline < self.timers.deadline(timer) {
                    self.timers.reset_at(timer, deadline);
                }
            }
            None => {
                let timer = self.timers.insert_at(key.clone(), deadline);
                self.keys.insert(key, timer);
            }
        }
    }

    /// Wait for the next due key. Returns `None` at once when nothing is pending.
    pub async fn next_due(&mut self) -> Option<String> {
        let expired = poll_fn(|cx| self.timers.poll_expired(cx)).await?;
        let key = expired.into_inner();
        self.keys.remove(&key);
        Some(key)
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if no keys are pending.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Default for DelayedKeys {
    fn default() -> Self {
        Self::new()
    }
}
