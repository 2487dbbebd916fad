//! FIFO with coalesced updates.
//!
//! Multiple events for one key before it is popped collapse into a single
//! entry holding the newest value; `pop` blocks until something is
//! available.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner<T> {
    items: HashMap<String, T>,
    queue: VecDeque<String>,
}

pub struct WatchFifo<T> {
    inner: Mutex<Inner<T>>,
    available: Notify,
}

impl<T> Default for WatchFifo<T> {
    fn default() -> Self {
        WatchFifo {
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                queue: VecDeque::new(),
            }),
            available: Notify::new(),
        }
    }
}

impl<T> WatchFifo<T> {
    pub fn new() -> WatchFifo<T> {
        WatchFifo::default()
    }

    /// Insert or overwrite the value for `key`. The key's position in line
    /// is kept from its first unpopped insert.
    pub fn add(&self, key: &str, item: T) {
        let mut inner = self.inner.lock();
        if !inner.items.contains_key(key) {
            inner.queue.push_back(key.to_string());
        }
        inner.items.insert(key.to_string(), item);
        drop(inner);
        self.available.notify_one();
    }

    /// Remove `key` if it has not been popped yet.
    pub fn delete(&self, key: &str) {
        self.inner.lock().items.remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until an item is available and return the newest value under
    /// the head key.
    pub async fn pop(&self) -> T {
        loop {
            {
                let mut inner = self.inner.lock();
                while let Some(key) = inner.queue.pop_front() {
                    // Deleted keys leave a stale queue entry behind; skip
                    // them.
                    if let Some(item) = inner.items.remove(&key) {
                        return item;
                    }
                }
            }
            self.available.notified().await;
        }
    }
}
