//! Placement scenarios: host-port conflicts push pods apart, and a pod
//! with nowhere to go stays unbound and retried rather than failed.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use regatta_api::metrics::Metrics;
use regatta_scheduler::{
    default_predicates, default_priorities, BackoffTable, GenericScheduler, Scheduler,
    CONTROLLER_ID,
};

use crate::{minion, pod_with_host_port, start_cluster, wait_for, TestCluster};

fn spawn_scheduler(cluster: &TestCluster, seed: u64) {
    let metrics = Metrics::new(&[CONTROLLER_ID]);
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(cluster.client.clone()),
        GenericScheduler::new(
            default_predicates(),
            default_priorities(),
            StdRng::seed_from_u64(seed),
        ),
        BackoffTable::new(Duration::from_millis(100), Duration::from_secs(1)),
        metrics.controller(CONTROLLER_ID),
    ));
    tokio::spawn(scheduler.run(cluster.cancel.clone()));
}

async fn host_of(cluster: &TestCluster, pod: &str) -> Option<String> {
    let pod = cluster.client.get_pod(pod).await.ok()?;
    pod.spec.host.filter(|h| !h.is_empty())
}

#[tokio::test]
async fn host_port_conflict_lands_on_the_other_node() {
    let cluster = start_cluster().await;
    cluster.client.create_minion(minion("n1")).await.unwrap();
    cluster.client.create_minion(minion("n2")).await.unwrap();
    spawn_scheduler(&cluster, 1);

    let cluster = &cluster;
    cluster
        .client
        .create_pod(pod_with_host_port("first", 80))
        .await
        .unwrap();
    let first_host = wait_for(Duration::from_secs(10), move || async move {
        host_of(cluster, "first").await
    })
    .await;

    cluster
        .client
        .create_pod(pod_with_host_port("second", 80))
        .await
        .unwrap();
    let second_host = wait_for(Duration::from_secs(10), move || async move {
        host_of(cluster, "second").await
    })
    .await;

    assert_ne!(first_host, second_host);
    let mut hosts = vec![first_host, second_host];
    hosts.sort();
    assert_eq!(hosts, vec!["n1".to_string(), "n2".to_string()]);
}

#[tokio::test]
async fn unschedulable_pod_stays_pending() {
    let cluster = start_cluster().await;
    cluster.client.create_minion(minion("n1")).await.unwrap();
    spawn_scheduler(&cluster, 1);

    let cluster = &cluster;
    cluster
        .client
        .create_pod(pod_with_host_port("first", 80))
        .await
        .unwrap();
    wait_for(Duration::from_secs(10), move || async move {
        host_of(cluster, "first").await
    })
    .await;

    // The only candidate already owns the port; the second pod has no fit
    // and must stay unbound through the retry cycle.
    cluster
        .client
        .create_pod(pod_with_host_port("second", 80))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let second = cluster.client.get_pod("second").await.unwrap();
    assert!(second.is_unassigned());
    assert_eq!(format!("{:?}", second.status.phase), "Pending");

    // Freeing the port lets the pending pod land on the next retry.
    cluster.client.delete_pod("first").await.unwrap();
    let host = wait_for(Duration::from_secs(10), move || async move {
        host_of(cluster, "second").await
    })
    .await;
    assert_eq!(host, "n1");
}
