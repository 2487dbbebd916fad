//! Replica convergence: the controller manager drives the observed pod
//! count to the declared count and holds it there.

use std::sync::Arc;
use std::time::Duration;

use regatta_api::labels::Selector;
use regatta_api::meta::ObjectMeta;
use regatta_api::metrics::Metrics;
use regatta_api::model::{PodTemplateSpec, ReplicationController, ReplicationControllerSpec};
use regatta_replication::{ReplicationManager, CONTROLLER_ID};

use crate::{simple_pod, start_cluster, wait_for, TestCluster};

fn controller(name: &str, replicas: i32) -> ReplicationController {
    let labels: std::collections::BTreeMap<String, String> =
        [("app".to_string(), "x".to_string())].into();
    ReplicationController {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        spec: ReplicationControllerSpec {
            replicas,
            selector: labels.clone(),
            template: Some(PodTemplateSpec {
                metadata: ObjectMeta {
                    labels,
                    ..ObjectMeta::default()
                },
                spec: simple_pod("", &[]).spec,
            }),
        },
        ..ReplicationController::default()
    }
}

fn spawn_manager(cluster: &TestCluster) {
    let metrics = Metrics::new(&[CONTROLLER_ID]);
    let manager = ReplicationManager::new(
        Arc::new(cluster.client.clone()),
        metrics.controller(CONTROLLER_ID),
    );
    let cancel = cluster.cancel.clone();
    tokio::spawn(async move { manager.run(Duration::from_millis(200), cancel).await });
}

async fn matching_pods(cluster: &TestCluster) -> Vec<String> {
    let selector: Selector = "app=x".parse().unwrap();
    cluster
        .client
        .list_pods(&selector, &Selector::everything())
        .await
        .unwrap()
        .items
        .iter()
        .map(|p| p.metadata.name_str().to_string())
        .collect()
}

#[tokio::test]
async fn replicas_converge_and_recover() {
    let cluster = start_cluster().await;
    spawn_manager(&cluster);

    cluster
        .client
        .create_controller(controller("rc1", 3))
        .await
        .unwrap();

    // Convergence to the declared count.
    let cluster = &cluster;
    let pods = wait_for(Duration::from_secs(30), move || async move {
        let pods = matching_pods(cluster).await;
        (pods.len() == 3).then_some(pods)
    })
    .await;

    // Killing one replica heals back to the declared count.
    let victim = pods[0].clone();
    cluster.client.delete_pod(&victim).await.unwrap();
    let victim = &victim;
    wait_for(Duration::from_secs(30), move || async move {
        let pods = matching_pods(cluster).await;
        (pods.len() == 3 && !pods.contains(victim)).then_some(())
    })
    .await;
}

#[tokio::test]
async fn scale_down_deletes_excess() {
    let cluster = start_cluster().await;
    spawn_manager(&cluster);

    let created = cluster
        .client
        .create_controller(controller("rc1", 3))
        .await
        .unwrap();
    let cluster = &cluster;
    wait_for(Duration::from_secs(30), move || async move {
        (matching_pods(cluster).await.len() == 3).then_some(())
    })
    .await;

    let mut scaled = created.clone();
    scaled.spec.replicas = 1;
    // The manager may have refreshed status in the meantime.
    let current = cluster.client.get_controller("rc1").await.unwrap();
    scaled.metadata.resource_version = current.metadata.resource_version;
    scaled.status = current.status;
    cluster.client.update_controller(scaled).await.unwrap();

    wait_for(Duration::from_secs(30), move || async move {
        (matching_pods(cluster).await.len() == 1).then_some(())
    })
    .await;

    let rc = cluster.client.get_controller("rc1").await.unwrap();
    assert_eq!(rc.spec.replicas, 1);
}
