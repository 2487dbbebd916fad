//! Event storage: create-only with a bounded lifetime in the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use regatta_api::labels::Selector;
use regatta_api::meta::ListMeta;
use regatta_api::model::{ApiObject, Event, EventList};
use regatta_api::validation::validate_event;
use regatta_api::{Error, Result};
use regatta_store::{watch_prefix, Store, Watcher};

use super::{keys, prepare_for_create};
use crate::rest::{RequestContext, RestHandler, WatchStream};

const KIND: &str = "Event";
pub const DEFAULT_EVENT_TTL: Duration = Duration::from_secs(48 * 60 * 60);

pub struct EventRegistry {
    store: Store,
    ttl: Duration,
    sequence: AtomicU64,
}

impl EventRegistry {
    pub fn new(store: Store, ttl: Duration) -> EventRegistry {
        EventRegistry {
            store,
            ttl,
            sequence: AtomicU64::new(1),
        }
    }

    pub async fn create_event(&self, ctx: &RequestContext, mut event: Event) -> Result<Event> {
        let errors = validate_event(&event);
        if !errors.is_empty() {
            return Err(Error::invalid(KIND, event.metadata.name_str(), errors));
        }
        let source = if event.source.is_empty() {
            "unknown"
        } else {
            event.source.as_str()
        }
        .to_string();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        event.metadata.name = Some(format!("{source}.{sequence}"));
        prepare_for_create(&mut event.metadata, KIND, &ctx.namespace)?;
        if event.timestamp.is_none() {
            event.timestamp = event.metadata.creation_timestamp;
        }
        self.store
            .create_object_ttl(&keys::event(&source, sequence), &event, Some(self.ttl))
            .await
    }

    pub async fn list_events(&self, label: &Selector) -> Result<EventList> {
        let (events, index): (Vec<Event>, u64) = self.store.extract_list(keys::EVENTS).await?;
        Ok(EventList {
            metadata: ListMeta {
                resource_version: Some(index.to_string()),
                ..ListMeta::default()
            },
            items: events
                .into_iter()
                .filter(|e| label.matches(&e.metadata.labels))
                .collect(),
        })
    }

    pub async fn watch_events(&self, from_version: u64) -> Result<Watcher<Event>> {
        watch_prefix(self.store.backend(), keys::EVENTS, from_version, |_: &Event| true).await
    }
}

#[async_trait]
impl RestHandler for EventRegistry {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        label: &Selector,
        _field: &Selector,
    ) -> Result<ApiObject> {
        Ok(ApiObject::EventList(self.list_events(label).await?))
    }

    async fn create(&self, ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let event: Event = obj.try_into()?;
        Ok(ApiObject::Event(self.create_event(ctx, event).await?))
    }

    async fn watch(
        &self,
        _ctx: &RequestContext,
        _label: Selector,
        _field: Selector,
        from_version: u64,
    ) -> Result<WatchStream> {
        let watcher = self.watch_events(from_version).await?;
        Ok(WatchStream::from_watcher(watcher))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    use regatta_api::model::ObjectReference;
    use regatta_store::MemoryBackend;

    #[tokio::test]
    async fn test_events_expire() {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let registry = EventRegistry::new(store.clone(), Duration::from_millis(10));
        let ctx = RequestContext::default();

        registry
            .create_event(
                &ctx,
                Event {
                    involved_object: ObjectReference {
                        kind: "Pod".to_string(),
                        name: "p1".to_string(),
                        ..ObjectReference::default()
                    },
                    condition: "Bound".to_string(),
                    source: "scheduler".to_string(),
                    ..Event::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            registry
                .list_events(&Selector::everything())
                .await
                .unwrap()
                .items
                .len(),
            1
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry
            .list_events(&Selector::everything())
            .await
            .unwrap()
            .items
            .is_empty());
    }

    #[tokio::test]
    async fn test_get_is_not_supported() {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let registry = EventRegistry::new(store, DEFAULT_EVENT_TTL);
        let err = registry
            .get(&RequestContext::default(), "scheduler.1")
            .await
            .unwrap_err();
        assert_eq!(err.http_code(), 405);
    }
}
