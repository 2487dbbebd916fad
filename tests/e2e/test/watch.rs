//! Watch stream semantics over HTTP: initial replay, kill, and resume
//! without duplicates or gaps.

use std::time::Duration;

use regatta_api::labels::Selector;
use regatta_store::EventType;

use crate::{simple_pod, start_cluster};

#[tokio::test]
async fn watch_replays_then_resumes_exactly_once() {
    let cluster = start_cluster().await;
    cluster
        .client
        .create_pod(simple_pod("p1", &[]))
        .await
        .unwrap();
    cluster
        .client
        .create_pod(simple_pod("p2", &[]))
        .await
        .unwrap();

    // From version zero the stream opens with the current pods.
    let mut watcher = cluster
        .client
        .watch_pods(&Selector::everything(), &Selector::everything(), 0)
        .await
        .unwrap();
    let mut seen = Vec::new();
    let mut last_version = 0;
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .expect("initial replay")
            .expect("stream open");
        assert_eq!(event.event_type, EventType::Added);
        last_version = last_version.max(event.resource_version());
        seen.push(event.object.metadata.name_str().to_string());
    }
    seen.sort();
    assert_eq!(seen, vec!["p1".to_string(), "p2".to_string()]);

    // Kill the watch, mutate while nobody is looking, then resume from the
    // highest version seen.
    drop(watcher);
    cluster
        .client
        .create_pod(simple_pod("p3", &[]))
        .await
        .unwrap();

    let mut resumed = cluster
        .client
        .watch_pods(
            &Selector::everything(),
            &Selector::everything(),
            last_version + 1,
        )
        .await
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), resumed.next())
        .await
        .expect("resumed event")
        .expect("stream open");
    assert_eq!(event.event_type, EventType::Added);
    assert_eq!(event.object.metadata.name_str(), "p3");

    // The next thing on the stream is new work, not a replay of p3.
    cluster
        .client
        .create_pod(simple_pod("p4", &[]))
        .await
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), resumed.next())
        .await
        .expect("live event")
        .expect("stream open");
    assert_eq!(event.object.metadata.name_str(), "p4");
}

#[tokio::test]
async fn watch_filters_by_label() {
    let cluster = start_cluster().await;
    let selector: Selector = "app=web".parse().unwrap();
    let mut watcher = cluster
        .client
        .watch_pods(&selector, &Selector::everything(), 0)
        .await
        .unwrap();

    cluster
        .client
        .create_pod(simple_pod("db", &[("app", "db")]))
        .await
        .unwrap();
    cluster
        .client
        .create_pod(simple_pod("web", &[("app", "web")]))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), watcher.next())
        .await
        .expect("event")
        .expect("stream open");
    assert_eq!(event.object.metadata.name_str(), "web");

    // Deletions carry the last state of the object.
    cluster.client.delete_pod("web").await.unwrap();
    let deleted = tokio::time::timeout(Duration::from_secs(5), watcher.next())
        .await
        .expect("deleted event")
        .expect("stream open");
    assert_eq!(deleted.event_type, EventType::Deleted);
    assert_eq!(deleted.object.metadata.name_str(), "web");
}
