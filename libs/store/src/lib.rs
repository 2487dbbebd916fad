//! Typed access to the cluster's transactional key-value store.
//!
//! [`backend::Backend`] is the contract of the external store: per-key
//! compare-and-swap, create-if-absent, prefix listing, and an indexed change
//! stream. [`memory::MemoryBackend`] implements it in process and is what
//! the binaries and tests run on; an etcd-backed implementation slots in
//! behind the same trait. [`Store`] layers object encoding and resource
//! version bookkeeping on top, and [`watch`] turns raw change streams into
//! typed, filterable, cancellable event streams.

pub mod backend;
pub mod memory;
pub mod typed;
pub mod watch;

pub use backend::{Backend, KeyNode, RawAction, RawEvent};
pub use memory::MemoryBackend;
pub use typed::{parse_resource_version, Store, StoredObject};
pub use watch::{watch_prefix, EventStream, EventType, WatchEvent, Watcher};
