//! Generic REST dispatch: the capability set every kind's handler
//! implements, and the type-erased watch stream the HTTP layer serves.

use async_trait::async_trait;
use tokio::sync::mpsc;

use regatta_api::labels::Selector;
use regatta_api::model::ApiObject;
use regatta_api::{Error, Result};
use regatta_store::{StoredObject, WatchEvent, Watcher};

/// Context of one REST request, derived from query parameters and defaults.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub namespace: String,
}

impl Default for RequestContext {
    fn default() -> Self {
        RequestContext {
            namespace: regatta_api::meta::DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Watch stream with the concrete kind erased, one event per frame.
pub struct WatchStream {
    rx: mpsc::Receiver<WatchEvent<ApiObject>>,
}

impl WatchStream {
    pub fn from_watcher<T: StoredObject>(mut watcher: Watcher<T>) -> WatchStream {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(event) = watcher.next().await {
                let erased = WatchEvent {
                    event_type: event.event_type,
                    object: event.object.into(),
                };
                if tx.send(erased).await.is_err() {
                    break;
                }
            }
            // Dropping the watcher here cancels the store subscription.
        });
        WatchStream { rx }
    }

    pub async fn next(&mut self) -> Option<WatchEvent<ApiObject>> {
        self.rx.recv().await
    }
}

fn unsupported(kind: &str, operation: &str) -> Error {
    Error::NotSupported(format!("{kind} does not support {operation}"))
}

/// Capability set of a resource. Unimplemented operations answer 405
/// through the [`Error::NotSupported`] mapping.
#[async_trait]
pub trait RestHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn list(
        &self,
        _ctx: &RequestContext,
        _label: &Selector,
        _field: &Selector,
    ) -> Result<ApiObject> {
        Err(unsupported(self.kind(), "list"))
    }

    async fn get(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        let _ = name;
        Err(unsupported(self.kind(), "get"))
    }

    async fn create(&self, _ctx: &RequestContext, _obj: ApiObject) -> Result<ApiObject> {
        Err(unsupported(self.kind(), "create"))
    }

    async fn update(&self, _ctx: &RequestContext, _obj: ApiObject) -> Result<ApiObject> {
        Err(unsupported(self.kind(), "update"))
    }

    async fn delete(&self, _ctx: &RequestContext, _name: &str) -> Result<ApiObject> {
        Err(unsupported(self.kind(), "delete"))
    }

    async fn watch(
        &self,
        _ctx: &RequestContext,
        _label: Selector,
        _field: Selector,
        _from_version: u64,
    ) -> Result<WatchStream> {
        Err(unsupported(self.kind(), "watch"))
    }
}
