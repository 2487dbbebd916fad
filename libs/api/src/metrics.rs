//! Prometheus metrics for the control loops.
//!
//! Every loop (REST dispatch, endpoints reconciler, replication controller,
//! scheduler, status cache) registers a [`ControllerMetrics`] under its own
//! `controller` label; the apiserver binary serves the encoded registry at
//! `/metrics`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::error::{Error, Result};

pub type ControllerId = &'static str;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub controllers: HashMap<ControllerId, Arc<ControllerMetrics>>,
}

impl Metrics {
    pub fn new(controller_names: &[ControllerId]) -> Metrics {
        let mut registry = Registry::with_prefix("regatta");
        let controllers = controller_names
            .iter()
            .map(|&id| {
                let sub = registry.sub_registry_with_label(("controller".into(), id.into()));
                (id, Arc::new(ControllerMetrics::new(sub)))
            })
            .collect();
        Metrics {
            registry: Arc::new(registry),
            controllers,
        }
    }

    pub fn controller(&self, id: ControllerId) -> Arc<ControllerMetrics> {
        self.controllers
            .get(id)
            .expect("all controller ids have to be registered")
            .clone()
    }

    /// Text exposition for the `/metrics` endpoint.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)
            .map_err(|e| Error::Unknown(format!("failed to encode metrics: {e}")))?;
        Ok(buffer)
    }
}

pub struct ControllerMetrics {
    reconcile_operations: Counter,
    reconcile_failures: Counter,
    reconcile_duration: Histogram,
    ready: Gauge,
}

impl ControllerMetrics {
    fn new(registry: &mut Registry) -> ControllerMetrics {
        let reconcile_operations = Counter::default();
        registry.register(
            "reconcile_operations",
            "Number of reconcile operations",
            reconcile_operations.clone(),
        );

        let reconcile_failures = Counter::default();
        registry.register(
            "reconcile_failures",
            "Number of reconcile operations that returned an error",
            reconcile_failures.clone(),
        );

        let reconcile_duration = Histogram::new(exponential_buckets(0.001, 2.0, 12));
        registry.register(
            "reconcile_duration_seconds",
            "Duration of reconcile operations",
            reconcile_duration.clone(),
        );

        let ready = Gauge::default();
        registry.register(
            "ready",
            "1 when the loop is ready to process work, 0 otherwise",
            ready.clone(),
        );

        ControllerMetrics {
            reconcile_operations,
            reconcile_failures,
            reconcile_duration,
            ready,
        }
    }

    pub fn reconcile_failure_inc(&self) {
        self.reconcile_failures.inc();
    }

    pub fn ready_set(&self, ready: i64) {
        self.ready.set(ready);
    }

    /// Count one reconcile and time it until the guard drops.
    pub fn reconcile_count_and_measure(&self) -> ReconcileMeasurer {
        self.reconcile_operations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            histogram: self.reconcile_duration.clone(),
        }
    }
}

pub struct ReconcileMeasurer {
    start: Instant,
    histogram: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
