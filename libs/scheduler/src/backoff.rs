//! Per-pod retry pacing: exponential delay per key, garbage-collected
//! after a quiet period.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

struct Entry {
    backoff: Duration,
    last_update: Instant,
}

pub struct BackoffTable {
    initial: Duration,
    max: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for BackoffTable {
    fn default() -> Self {
        BackoffTable::new(DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

impl BackoffTable {
    pub fn new(initial: Duration, max: Duration) -> BackoffTable {
        BackoffTable {
            initial,
            max,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The delay to wait before retrying `key`, doubling on every call up
    /// to the cap.
    pub fn next_delay(&self, key: &str) -> Duration {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| now.duration_since(entry.last_update) < self.max);

        let entry = entries.entry(key.to_string()).or_insert(Entry {
            backoff: self.initial,
            last_update: now,
        });
        let delay = entry.backoff;
        entry.backoff = (entry.backoff * 2).min(self.max);
        entry.last_update = now;
        delay
    }

    /// Forget a key after a successful attempt.
    pub fn reset(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
