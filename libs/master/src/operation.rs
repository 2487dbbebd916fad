//! Long-running request tracking.
//!
//! Every mutating request runs as an operation. Callers asking for
//! synchronous behavior wait on the operation up to their timeout and get
//! the finished object; everyone else gets a 202 with the operation id and
//! polls `/operations/{id}`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tracing::debug;

use regatta_api::meta::ObjectMeta;
use regatta_api::model::{ApiObject, Operation, OperationList};
use regatta_api::Result;

/// How long finished operations stay pollable.
const COMPLETED_RETENTION: Duration = Duration::from_secs(10 * 60);

/// A finished operation: the response object and its HTTP code.
#[derive(Clone)]
pub struct OperationResult {
    pub object: ApiObject,
    pub code: u16,
}

struct Entry {
    result: Option<OperationResult>,
    finished_at: Option<Instant>,
    done_rx: watch::Receiver<bool>,
}

#[derive(Clone)]
pub struct Operations {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    counter: Arc<AtomicU64>,
}

impl Default for Operations {
    fn default() -> Self {
        Operations {
            inner: Arc::default(),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Operations {
    pub fn new() -> Operations {
        Operations::default()
    }

    /// Run `work` as a tracked operation and return its id immediately.
    pub async fn start<F>(&self, work: F) -> String
    where
        F: Future<Output = Result<ApiObject>> + Send + 'static,
    {
        let id = self.counter.fetch_add(1, Ordering::Relaxed).to_string();
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut inner = self.inner.write().await;
            let now = Instant::now();
            inner.retain(|_, entry| {
                entry
                    .finished_at
                    .is_none_or(|at| now.duration_since(at) < COMPLETED_RETENTION)
            });
            inner.insert(
                id.clone(),
                Entry {
                    result: None,
                    finished_at: None,
                    done_rx,
                },
            );
        }

        let registry = self.inner.clone();
        let op_id = id.clone();
        tokio::spawn(async move {
            let result = match work.await {
                Ok(object) => OperationResult { object, code: 200 },
                Err(err) => OperationResult {
                    code: err.http_code(),
                    object: ApiObject::Status(err.to_status()),
                },
            };
            debug!(msg = "operation finished", id = %op_id, code = result.code);
            let mut inner = registry.write().await;
            if let Some(entry) = inner.get_mut(&op_id) {
                entry.result = Some(result);
                entry.finished_at = Some(Instant::now());
            }
            let _ = done_tx.send(true);
        });
        id
    }

    /// Result of operation `id`: `None` for an unknown id, `Some(None)`
    /// while it is still running.
    pub async fn get(&self, id: &str) -> Option<Option<OperationResult>> {
        let inner = self.inner.read().await;
        inner.get(id).map(|entry| entry.result.clone())
    }

    /// Wait up to `timeout` for operation `id` to finish.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Option<Option<OperationResult>> {
        let mut done_rx = {
            let inner = self.inner.read().await;
            match inner.get(id) {
                Some(entry) => entry.done_rx.clone(),
                None => return None,
            }
        };
        if !*done_rx.borrow() {
            let _ = tokio::time::timeout(timeout, done_rx.changed()).await;
        }
        self.get(id).await
    }

    pub async fn list(&self) -> OperationList {
        let inner = self.inner.read().await;
        let mut ids: Vec<&String> = inner.keys().collect();
        ids.sort();
        OperationList {
            items: ids
                .into_iter()
                .map(|id| Operation {
                    metadata: ObjectMeta {
                        name: Some(id.clone()),
                        ..ObjectMeta::default()
                    },
                })
                .collect(),
            ..OperationList::default()
        }
    }
}
