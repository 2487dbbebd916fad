//! The apiserver side of the control plane: per-kind registries over the
//! typed store, the versioned REST surface, long-running operation
//! tracking, the endpoints reconciler, and the pod-status cache.

pub mod clients;
pub mod election;
pub mod endpoints;
pub mod master;
pub mod operation;
pub mod pod_cache;
pub mod registry;
pub mod rest;
pub mod server;

pub use master::{Master, MasterConfig};
