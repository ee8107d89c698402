//! Per-key work queue
//!
//! A key is queued at most once. A key added while it is being processed is
//! held back and queued again when processing finishes, so one runtime is
//! never reconciled twice at the same time.

use cachefleet_types::NamespacedName;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<NamespacedName>,
    queued: HashSet<NamespacedName>,
    processing: HashSet<NamespacedName>,
    dirty: HashSet<NamespacedName>,
}

#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: NamespacedName) {
        let mut state = self.state.lock();
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has passed
    pub fn add_after(self: &Arc<Self>, key: NamespacedName, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Wait for the next key and mark it as processing.
    ///
    /// Cancel safe: a key is only taken in the poll that returns it.
    pub async fn get(&self) -> NamespacedName {
        loop {
            let notified = self.notify.notified();
            if let Some(key) = self.try_get() {
                return key;
            }
            notified.await;
        }
    }

    fn try_get(&self) -> Option<NamespacedName> {
        let mut state = self.state.lock();
        let key = state.queue.pop_front()?;
        state.queued.remove(&key);
        state.processing.insert(key.clone());
        Some(key)
    }

    /// Finish processing `key`, queueing it again if it was added meanwhile
    pub fn done(&self, key: &NamespacedName) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) && state.queued.insert(key.clone()) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Keys waiting to be processed
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> NamespacedName {
        NamespacedName::new("default", name)
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_queued_once() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        queue.add(key("b"));
        queue.add(key("a"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await, key("a"));
        assert_eq!(queue.get().await, key("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_added_while_processing_waits_for_done() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        let processing = queue.get().await;

        queue.add(key("a"));
        assert!(queue.is_empty());

        queue.done(&processing);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, key("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_the_key() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after(key("a"), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(queue.is_empty());

        let got = tokio::time::timeout(Duration::from_secs(10), queue.get()).await;
        assert_eq!(got.unwrap(), key("a"));
    }
}
