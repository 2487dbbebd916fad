//! API-level scenarios: create-then-get, optimistic concurrency under
//! contention, and selector-consistent listing.

use std::time::Duration;

use regatta_api::labels::Selector;
use regatta_api::meta::ObjectMeta;
use regatta_api::model::{Service, ServiceSpec};

use crate::{simple_pod, start_cluster, wait_for};

#[tokio::test]
async fn create_then_get() {
    let cluster = start_cluster().await;

    let created = cluster
        .client
        .create_pod(simple_pod("p1", &[]))
        .await
        .unwrap();
    assert!(!created.metadata.uid.clone().unwrap_or_default().is_empty());
    let version: u64 = created
        .metadata
        .resource_version
        .as_deref()
        .unwrap()
        .parse()
        .unwrap();
    assert!(version >= 1);
    assert_eq!(format!("{:?}", created.status.phase), "Pending");

    let fetched = cluster.client.get_pod("p1").await.unwrap();
    assert_eq!(fetched.metadata.uid, created.metadata.uid);
    assert_eq!(fetched.metadata.resource_version, created.metadata.resource_version);
    assert_eq!(fetched.spec, created.spec);
}

#[tokio::test]
async fn mutations_raise_the_resource_version() {
    let cluster = start_cluster().await;
    let created = cluster
        .client
        .create_pod(simple_pod("p1", &[]))
        .await
        .unwrap();
    let before: u64 = created
        .metadata
        .resource_version
        .as_deref()
        .unwrap()
        .parse()
        .unwrap();

    let mut update = created.clone();
    update
        .metadata
        .labels
        .insert("touched".to_string(), "yes".to_string());
    let updated = cluster.client.update_pod(update).await.unwrap();
    let after: u64 = updated
        .metadata
        .resource_version
        .as_deref()
        .unwrap()
        .parse()
        .unwrap();
    assert!(after > before);
}

#[tokio::test]
async fn list_agrees_with_selector_matching() {
    let cluster = start_cluster().await;
    cluster
        .client
        .create_pod(simple_pod("web-1", &[("app", "x")]))
        .await
        .unwrap();
    cluster
        .client
        .create_pod(simple_pod("web-2", &[("app", "x")]))
        .await
        .unwrap();
    cluster
        .client
        .create_pod(simple_pod("db-1", &[("app", "y")]))
        .await
        .unwrap();

    let selector: Selector = "app=x".parse().unwrap();
    let all = cluster
        .client
        .list_pods(&Selector::everything(), &Selector::everything())
        .await
        .unwrap();
    let filtered = cluster
        .client
        .list_pods(&selector, &Selector::everything())
        .await
        .unwrap();

    let expected: Vec<&str> = all
        .items
        .iter()
        .filter(|p| selector.matches(&p.metadata.labels))
        .map(|p| p.metadata.name_str())
        .collect();
    let got: Vec<&str> = filtered.items.iter().map(|p| p.metadata.name_str()).collect();
    assert_eq!(got, expected);
    assert_eq!(got.len(), 2);
}

#[tokio::test]
async fn concurrent_label_updates_all_land() {
    let cluster = start_cluster().await;
    cluster
        .client
        .create_service(Service {
            metadata: ObjectMeta {
                name: Some("s1".to_string()),
                ..ObjectMeta::default()
            },
            spec: ServiceSpec {
                port: 80,
                selector: [("foo".to_string(), "bar".to_string())].into(),
                ..ServiceSpec::default()
            },
            ..Service::default()
        })
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..5 {
        let client = cluster.client.clone();
        tasks.push(tokio::spawn(async move {
            // Optimistic concurrency: re-read and re-submit until the
            // compare-and-swap lands.
            loop {
                let mut svc = client.get_service("s1").await.unwrap();
                svc.spec
                    .selector
                    .insert(format!("k{i}"), "v".to_string());
                match client.update_service(svc).await {
                    Ok(_) => return,
                    Err(err) if err.is_conflict() => continue,
                    Err(err) => panic!("unexpected error: {err:?}"),
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let cluster = &cluster;
    let final_service = wait_for(Duration::from_secs(5), move || async move {
        cluster.client.get_service("s1").await.ok()
    })
    .await;
    assert_eq!(final_service.spec.selector.len(), 6);
    assert_eq!(
        final_service.spec.selector.get("foo").map(String::as_str),
        Some("bar")
    );
    for i in 0..5 {
        assert!(final_service.spec.selector.contains_key(&format!("k{i}")));
    }
}

#[tokio::test]
async fn endpoints_reconciler_tracks_service_pods() {
    let cluster = start_cluster().await;
    cluster
        .client
        .create_service(Service {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                ..ObjectMeta::default()
            },
            spec: ServiceSpec {
                port: 80,
                selector: [("app".to_string(), "web".to_string())].into(),
                ..ServiceSpec::default()
            },
            ..Service::default()
        })
        .await
        .unwrap();

    let mut pod = simple_pod("w1", &[("app", "web")]);
    let created = cluster.client.create_pod(pod.clone()).await.unwrap();
    pod.metadata = created.metadata;
    pod.status = created.status;
    pod.status.pod_ip = Some("10.2.0.9".to_string());
    cluster.client.update_pod(pod).await.unwrap();

    let cluster = &cluster;
    let endpoints = wait_for(Duration::from_secs(10), move || async move {
        let record = cluster
            .master
            .store()
            .get_object::<regatta_api::model::Endpoints>(
                "/registry/services/endpoints/web",
                true,
            )
            .await
            .ok()
            .flatten()?;
        if record.endpoints.is_empty() {
            None
        } else {
            Some(record.endpoints)
        }
    })
    .await;
    assert_eq!(endpoints, vec!["10.2.0.9:80".to_string()]);
}
