//! The pod scheduler: a filter-then-score placement engine fed by the
//! watch fabric through a coalescing FIFO, with per-pod exponential
//! backoff when no node fits.

pub mod backoff;
pub mod factory;
pub mod fifo;
pub mod predicates;
pub mod priorities;
pub mod scheduler;

pub use backoff::BackoffTable;
pub use factory::{default_predicates, default_priorities, provider, NodeLabelConfig};
pub use fifo::WatchFifo;
pub use predicates::{FitPredicate, Snapshot};
pub use priorities::{PriorityConfig, PriorityFunction};
pub use scheduler::{GenericScheduler, Scheduler, SchedulerApi, CONTROLLER_ID};
