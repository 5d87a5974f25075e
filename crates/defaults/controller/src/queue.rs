//! Deduplicating work queue.
//!
//! A key is *dirty* while it waits in the queue and *processing* between
//! [`WorkQueue::get`] and [`WorkQueue::done`]. Adding a dirty key is a no-op
//! and a key added while processing is parked until `done`, so each key has
//! at most one pending and at most one in-flight entry.
//!
//! Delayed adds are *waiting* until their deadline. A key has at most one
//! waiting deadline: a later deadline for a waiting or dirty key is dropped
//! and an earlier one replaces it.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    waiting: HashMap<K, Instant>,
    shutting_down: bool,
}

impl<K: Clone + Eq + Hash> QueueState<K> {
    /// Returns `true` if a getter should be woken.
    fn add(&mut self, key: K) -> bool {
        if self.shutting_down || !self.dirty.insert(key.clone()) {
            return false;
        }
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }
}

/// Queue of keys awaiting reconciliation.
#[derive(Debug)]
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    closed: watch::Sender<bool>,
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            closed,
        }
    }

    /// Mark `key` as needing work.
    pub fn add(&self, key: K) {
        let wake = self.state.lock().add(key);
        if wake {
            self.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed, unless the queue shuts down first.
    ///
    /// Folds into an earlier pending deadline for the same key, and is a no-op
    /// while the key is already dirty.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.state.lock();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            if matches!(state.waiting.get(&key), Some(at) if *at <= deadline) {
                return;
            }
            state.waiting.insert(key.clone(), deadline);
        }

        let queue = Arc::clone(self);
        let mut closed = self.closed.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => queue.fire(key, deadline),
                _ = closed.wait_for(|closed| *closed) => {}
            }
        });
    }

    /// Move `key` from waiting to dirty if `deadline` is still its deadline.
    fn fire(&self, key: K, deadline: Instant) {
        let wake = {
            let mut state = self.state.lock();
            if state.waiting.get(&key) != Some(&deadline) {
                return;
            }
            state.waiting.remove(&key);
            state.add(key)
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`, requeueing it if it was added meanwhile.
    pub fn done(&self, key: &K) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Discard pending keys and release every blocked [`WorkQueue::get`].
    pub fn shut_down(&self) {
        {
            let mut state = self.state.lock();
            state.shutting_down = true;
            state.queue.clear();
            state.dirty.clear();
            state.waiting.clear();
        }
        self.closed.send_replace(true);
        self.notify.notify_waiters();
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a pending delayed add.
    pub fn waiting_len(&self) -> usize {
        self.state.lock().waiting.len()
    }
}
