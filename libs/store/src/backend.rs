//! The contract of the external key-value store.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use regatta_api::Result;

/// A stored key with its value and store indexes. `created_index ==
/// modified_index` exactly when the key has never been overwritten since
/// creation; the watch fabric relies on that distinction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyNode {
    pub key: String,
    pub value: Vec<u8>,
    pub created_index: u64,
    pub modified_index: u64,
}

/// Store-level action that produced a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawAction {
    Create,
    Set,
    CompareAndSwap,
    Delete,
    Expire,
}

/// One mutation as observed by a change stream. Deletions and expirations
/// carry the pre-delete value in `prev_node`.
#[derive(Clone, Debug)]
pub struct RawEvent {
    pub action: RawAction,
    pub node: Option<KeyNode>,
    pub prev_node: Option<KeyNode>,
}

impl RawEvent {
    /// Index the event happened at, for resume bookkeeping.
    pub fn index(&self) -> u64 {
        self.node
            .as_ref()
            .or(self.prev_node.as_ref())
            .map(|n| n.modified_index)
            .unwrap_or(0)
    }
}

/// Operations the external store must provide. All mutating operations
/// either carry an expected modification index (compare-and-swap) or opt
/// into create-only / unconditional semantics explicitly.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Current value of the store's modification index.
    async fn index(&self) -> Result<u64>;

    /// `NotFound` when the key is absent.
    async fn get(&self, key: &str) -> Result<KeyNode>;

    /// Every key under `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<KeyNode>>;

    /// Create-if-absent; `AlreadyExists` on collision. A `ttl` bounds the
    /// key's lifetime (events use this).
    async fn create(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<KeyNode>;

    /// Write a key. With `expected_index` the write only succeeds when the
    /// key's current modification index matches (`Conflict` otherwise,
    /// `NotFound` when the key is gone); without it the write is
    /// unconditional and creates the key as needed.
    async fn set(&self, key: &str, value: Vec<u8>, expected_index: Option<u64>) -> Result<KeyNode>;

    /// `NotFound` when the key (or prefix, for recursive) is absent.
    async fn delete(&self, key: &str, recursive: bool) -> Result<()>;

    /// Change stream for `prefix` starting at `from_index`.
    ///
    /// From index 0 the stream opens with one synthetic event per existing
    /// key, then goes live. From a positive index, changes at or after that
    /// index replay first. The channel closes on cancellation, on consumer
    /// lag, or on store error; consumers restart from the last index they
    /// saw.
    async fn watch(
        &self,
        prefix: &str,
        from_index: u64,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawEvent>>;
}
