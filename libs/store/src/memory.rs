//! In-process implementation of the store contract.
//!
//! A single mutex serializes all mutations, which gives the per-key
//! linearization and global index ordering the contract asks for. A bounded
//! history ring supports watch resume; slow watch consumers are
//! disconnected rather than buffered without bound.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use regatta_api::{Error, Result};

use crate::backend::{Backend, KeyNode, RawAction, RawEvent};

const HISTORY_LIMIT: usize = 4096;
const WATCH_BUFFER: usize = 256;

const KEY_KIND: &str = "key";

struct StoredNode {
    value: Vec<u8>,
    created: u64,
    modified: u64,
    expires_at: Option<Instant>,
}

impl StoredNode {
    fn to_key_node(&self, key: &str) -> KeyNode {
        KeyNode {
            key: key.to_string(),
            value: self.value.clone(),
            created_index: self.created,
            modified_index: self.modified,
        }
    }
}

struct WatchSub {
    prefix: String,
    tx: mpsc::Sender<RawEvent>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    index: u64,
    data: BTreeMap<String, StoredNode>,
    history: VecDeque<RawEvent>,
    watchers: Vec<WatchSub>,
}

fn in_prefix(key: &str, prefix: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn event_key(event: &RawEvent) -> Option<&str> {
    event
        .node
        .as_ref()
        .or(event.prev_node.as_ref())
        .map(|n| n.key.as_str())
}

impl Inner {
    fn broadcast(&mut self, event: RawEvent) {
        self.history.push_back(event.clone());
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        let key = match event_key(&event) {
            Some(k) => k.to_string(),
            None => return,
        };
        self.watchers.retain(|sub| {
            if sub.cancel.is_cancelled() {
                return false;
            }
            if !in_prefix(&key, &sub.prefix) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                // A full buffer means the consumer fell behind; closing the
                // channel tells it to restart from its last seen index.
                Err(_) => {
                    trace!(msg = "dropping lagging watcher", prefix = %sub.prefix);
                    false
                }
            }
        });
    }

    fn expire_pass(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .data
            .iter()
            .filter(|(_, node)| node.expires_at.is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            // safe unwrap: keys were collected under this same lock
            let node = self.data.remove(&key).unwrap();
            self.index += 1;
            let event = RawEvent {
                action: RawAction::Expire,
                node: Some(KeyNode {
                    key: key.clone(),
                    value: Vec::new(),
                    created_index: node.created,
                    modified_index: self.index,
                }),
                prev_node: Some(node.to_key_node(&key)),
            };
            self.broadcast(event);
        }
    }
}

/// The store the binaries and every test run on.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn index(&self) -> Result<u64> {
        Ok(self.inner.lock().index)
    }

    async fn get(&self, key: &str) -> Result<KeyNode> {
        let mut inner = self.inner.lock();
        inner.expire_pass(Instant::now());
        inner
            .data
            .get(key)
            .map(|n| n.to_key_node(key))
            .ok_or_else(|| Error::not_found(KEY_KIND, key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyNode>> {
        let mut inner = self.inner.lock();
        inner.expire_pass(Instant::now());
        Ok(inner
            .data
            .iter()
            .filter(|(key, _)| in_prefix(key, prefix))
            .map(|(key, node)| node.to_key_node(key))
            .collect())
    }

    async fn create(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<KeyNode> {
        let mut inner = self.inner.lock();
        inner.expire_pass(Instant::now());
        if inner.data.contains_key(key) {
            return Err(Error::already_exists(KEY_KIND, key));
        }
        inner.index += 1;
        let index = inner.index;
        let node = StoredNode {
            value,
            created: index,
            modified: index,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        let key_node = node.to_key_node(key);
        inner.data.insert(key.to_string(), node);
        inner.broadcast(RawEvent {
            action: RawAction::Create,
            node: Some(key_node.clone()),
            prev_node: None,
        });
        Ok(key_node)
    }

    async fn set(&self, key: &str, value: Vec<u8>, expected_index: Option<u64>) -> Result<KeyNode> {
        let mut inner = self.inner.lock();
        inner.expire_pass(Instant::now());

        let prev = inner.data.get(key).map(|n| n.to_key_node(key));
        if let Some(expected) = expected_index {
            let prev = prev
                .as_ref()
                .ok_or_else(|| Error::not_found(KEY_KIND, key))?;
            if prev.modified_index != expected {
                return Err(Error::conflict(
                    KEY_KIND,
                    key,
                    format!(
                        "expected index {expected}, current index {}",
                        prev.modified_index
                    ),
                ));
            }
        }

        inner.index += 1;
        let index = inner.index;
        let node = StoredNode {
            value,
            created: prev.as_ref().map(|p| p.created_index).unwrap_or(index),
            modified: index,
            expires_at: None,
        };
        let key_node = node.to_key_node(key);
        inner.data.insert(key.to_string(), node);
        inner.broadcast(RawEvent {
            action: if expected_index.is_some() {
                RawAction::CompareAndSwap
            } else {
                RawAction::Set
            },
            node: Some(key_node.clone()),
            prev_node: prev,
        });
        Ok(key_node)
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.expire_pass(Instant::now());

        let keys: Vec<String> = if recursive {
            inner
                .data
                .keys()
                .filter(|k| in_prefix(k, key))
                .cloned()
                .collect()
        } else if inner.data.contains_key(key) {
            vec![key.to_string()]
        } else {
            Vec::new()
        };
        if keys.is_empty() {
            return Err(Error::not_found(KEY_KIND, key));
        }

        for key in keys {
            // safe unwrap: keys were collected under this same lock
            let node = inner.data.remove(&key).unwrap();
            inner.index += 1;
            let index = inner.index;
            inner.broadcast(RawEvent {
                action: RawAction::Delete,
                node: Some(KeyNode {
                    key: key.clone(),
                    value: Vec::new(),
                    created_index: node.created,
                    modified_index: index,
                }),
                prev_node: Some(node.to_key_node(&key)),
            });
        }
        Ok(())
    }

    async fn watch(
        &self,
        prefix: &str,
        from_index: u64,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawEvent>> {
        let mut inner = self.inner.lock();
        inner.expire_pass(Instant::now());

        let replay: Vec<RawEvent> = if from_index == 0 {
            // A fresh watch over an existing directory opens with the
            // current children; whether each arrives as a create or a set
            // is derived from the created/modified distinction.
            inner
                .data
                .iter()
                .filter(|(key, _)| in_prefix(key, prefix))
                .map(|(key, node)| RawEvent {
                    action: if node.created == node.modified {
                        RawAction::Create
                    } else {
                        RawAction::Set
                    },
                    node: Some(node.to_key_node(key)),
                    prev_node: None,
                })
                .collect()
        } else {
            inner
                .history
                .iter()
                .filter(|ev| ev.index() >= from_index)
                .filter(|ev| event_key(ev).is_some_and(|k| in_prefix(k, prefix)))
                .cloned()
                .collect()
        };

        let (tx, rx) = mpsc::channel(replay.len() + WATCH_BUFFER);
        for event in replay {
            // Capacity is sized above; a failure here means the consumer is
            // already gone.
            let _ = tx.try_send(event);
        }
        inner.watchers.push(WatchSub {
            prefix: prefix.to_string(),
            tx,
            cancel,
        });
        Ok(rx)
    }
}
