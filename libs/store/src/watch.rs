//! Typed, filterable change streams over the raw store watch.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use regatta_api::Result;

use crate::backend::{Backend, KeyNode, RawAction, RawEvent};
use crate::typed::{Store, StoredObject};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

#[derive(Clone, Debug)]
pub struct WatchEvent<T> {
    pub event_type: EventType,
    pub object: T,
}

impl<T: StoredObject> WatchEvent<T> {
    /// Resource version of the change, for resume bookkeeping.
    pub fn resource_version(&self) -> u64 {
        self.object
            .resource_version()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// A cancellable typed event stream. Dropping the watcher or calling
/// [`Watcher::stop`] releases the store-level subscription; the stream
/// closing without a stop means the server side gave up and the consumer
/// should restart from the last version it saw.
pub struct Watcher<T> {
    rx: mpsc::Receiver<WatchEvent<T>>,
    cancel: CancellationToken,
}

impl<T> Watcher<T> {
    pub async fn next(&mut self) -> Option<WatchEvent<T>> {
        self.rx.recv().await
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl<T> Drop for Watcher<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Anything that yields typed watch events: an in-process [`Watcher`] or a
/// remote HTTP watch. Consumers treat `None` as "stream closed, restart
/// from the last version seen".
#[async_trait]
pub trait EventStream<T>: Send {
    async fn next_event(&mut self) -> Option<WatchEvent<T>>;
}

#[async_trait]
impl<T: Send> EventStream<T> for Watcher<T> {
    async fn next_event(&mut self) -> Option<WatchEvent<T>> {
        self.next().await
    }
}

fn translate<T: StoredObject>(raw: &RawEvent) -> Result<Option<WatchEvent<T>>> {
    let (event_type, node, version_node): (EventType, &KeyNode, &KeyNode) = match raw.action {
        RawAction::Create | RawAction::Set | RawAction::CompareAndSwap => {
            let node = match raw.node.as_ref() {
                Some(n) => n,
                None => return Ok(None),
            };
            let event_type = if raw.prev_node.is_some() {
                EventType::Modified
            } else {
                EventType::Added
            };
            (event_type, node, node)
        }
        RawAction::Delete | RawAction::Expire => {
            // The pre-delete value travels on the event; its version is the
            // index of the deletion itself.
            let prev = match raw.prev_node.as_ref() {
                Some(n) => n,
                None => return Ok(None),
            };
            let version = raw.node.as_ref().unwrap_or(prev);
            (EventType::Deleted, prev, version)
        }
    };

    let mut object: T = Store::decode_node(node)?;
    object.set_resource_version(version_node.modified_index.to_string());
    Ok(Some(WatchEvent { event_type, object }))
}

/// Watch every object under `prefix`, starting at `from_version`, keeping
/// only objects `filter` accepts.
pub async fn watch_prefix<T, F>(
    backend: Arc<dyn Backend>,
    prefix: &str,
    from_version: u64,
    filter: F,
) -> Result<Watcher<T>>
where
    T: StoredObject,
    F: Fn(&T) -> bool + Send + 'static,
{
    let cancel = CancellationToken::new();
    let mut raw_rx = backend.watch(prefix, from_version, cancel.clone()).await?;
    let (tx, rx) = mpsc::channel(64);

    let task_cancel = cancel.clone();
    let prefix = prefix.to_string();
    tokio::spawn(async move {
        loop {
            let raw = tokio::select! {
                _ = task_cancel.cancelled() => break,
                raw = raw_rx.recv() => match raw {
                    Some(raw) => raw,
                    None => break,
                },
            };
            match translate::<T>(&raw) {
                Ok(Some(event)) => {
                    if !filter(&event.object) {
                        trace!(msg = "event filtered", %prefix);
                        continue;
                    }
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                // An undecodable value means the stream can no longer make
                // progress; closing it hands the restart decision to the
                // consumer.
                Err(error) => {
                    debug!(msg = "closing watch on decode error", %prefix, %error);
                    break;
                }
            }
        }
        task_cancel.cancel();
    });

    Ok(Watcher { rx, cancel })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::MemoryBackend;
    use regatta_api::meta::ObjectMeta;
    use regatta_api::model::Pod;

    fn pod(name: &str, label: (&str, &str)) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: [(label.0.to_string(), label.1.to_string())].into(),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    #[tokio::test]
    async fn test_watch_lifecycle_events() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let store = Store::new(backend.clone());

        let mut watcher: Watcher<Pod> =
            watch_prefix(backend, "/registry/pods", 0, |_| true).await.unwrap();

        let created = store
            .create_object("/registry/pods/p1", &pod("p1", ("app", "web")))
            .await
            .unwrap();
        let added = watcher.next().await.unwrap();
        assert_eq!(added.event_type, EventType::Added);
        assert_eq!(added.object.metadata.name.as_deref(), Some("p1"));

        store
            .set_object("/registry/pods/p1", &created)
            .await
            .unwrap();
        let modified = watcher.next().await.unwrap();
        assert_eq!(modified.event_type, EventType::Modified);
        assert!(modified.resource_version() > added.resource_version());

        store.delete("/registry/pods/p1", false).await.unwrap();
        let deleted = watcher.next().await.unwrap();
        assert_eq!(deleted.event_type, EventType::Deleted);
        assert_eq!(deleted.object.metadata.name.as_deref(), Some("p1"));
        assert!(deleted.resource_version() > modified.resource_version());
    }

    #[tokio::test]
    async fn test_watch_filter_suppresses_events() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let store = Store::new(backend.clone());

        let mut watcher: Watcher<Pod> = watch_prefix(backend, "/registry/pods", 0, |p: &Pod| {
            p.metadata.labels.get("app").map(String::as_str) == Some("web")
        })
        .await
        .unwrap();

        store
            .create_object("/registry/pods/db", &pod("db", ("app", "db")))
            .await
            .unwrap();
        store
            .create_object("/registry/pods/web", &pod("web", ("app", "web")))
            .await
            .unwrap();

        let event = watcher.next().await.unwrap();
        assert_eq!(event.object.metadata.name.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn test_watch_resume_sees_object_exactly_once() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let store = Store::new(backend.clone());

        let mut watcher: Watcher<Pod> =
            watch_prefix(backend.clone(), "/registry/pods", 0, |_| true)
                .await
                .unwrap();
        store
            .create_object("/registry/pods/p1", &pod("p1", ("app", "web")))
            .await
            .unwrap();
        let seen = watcher.next().await.unwrap();
        let last_version = seen.resource_version();
        watcher.stop();

        // Restart from the next index while a new pod appears.
        store
            .create_object("/registry/pods/p2", &pod("p2", ("app", "web")))
            .await
            .unwrap();
        let mut resumed: Watcher<Pod> =
            watch_prefix(backend, "/registry/pods", last_version + 1, |_| true)
                .await
                .unwrap();
        let event = resumed.next().await.unwrap();
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.object.metadata.name.as_deref(), Some("p2"));
    }
}
