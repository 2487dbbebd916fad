//! Object model and versioned wire codec for the Regatta control plane.
//!
//! The canonical in-memory representation of every API kind lives in
//! [`model`]; the [`codec`] translates between that representation and the
//! wire versions served by the API (`v1` and the older flat `v1alpha1`).
//! Cross-cutting pieces used by every other crate live here too, so that
//! nothing above this crate reinvents label selectors, fixed-point resource
//! quantities, the error taxonomy and its `Status` envelope, or per-kind
//! validation.

pub mod codec;
pub mod error;
pub mod labels;
pub mod meta;
pub mod metrics;
pub mod model;
pub mod quantity;
pub mod status;
pub mod telemetry;
pub mod v1alpha1;
pub mod validation;

pub use error::{Error, Result};
pub use meta::{ListMeta, Object, ObjectMeta, TypeMeta};
