//! End-to-end harness: a full in-process control plane (memory-backed
//! store, apiserver on an ephemeral port, typed client) that the scenario
//! tests drive over real HTTP.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use regatta_api::meta::ObjectMeta;
use regatta_api::model::{Container, Node, Pod, PodSpec, Port};
use regatta_api::{Error, Result};
use regatta_client::Client;
use regatta_master::clients::{NodeAgentClient, PodInfo, StaticCloudProvider};
use regatta_master::{Master, MasterConfig};
use regatta_store::MemoryBackend;

#[cfg(test)]
mod test;

/// Agent stand-in: every node is healthy, no container has reported yet.
pub struct FakeAgent;

#[async_trait]
impl NodeAgentClient for FakeAgent {
    async fn pod_info(&self, _host: &str, pod_id: &str) -> Result<PodInfo> {
        Err(Error::not_found("Pod", pod_id))
    }

    async fn healthy(&self, _host: &str) -> Result<bool> {
        Ok(true)
    }
}

pub struct TestCluster {
    pub client: Client,
    pub url: String,
    pub master: Master,
    pub cancel: CancellationToken,
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn start_cluster() -> TestCluster {
    let config = MasterConfig {
        endpoints_sync_period: Duration::from_millis(100),
        pod_cache_period: Duration::from_millis(500),
        ..MasterConfig::default()
    };
    let master = Master::new(
        Arc::new(MemoryBackend::new()),
        Arc::new(FakeAgent),
        Arc::new(StaticCloudProvider),
        config,
    );
    let cancel = CancellationToken::new();
    master.spawn_control_loops(cancel.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let url = format!("http://{addr}");

    let router = master.router();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .expect("serve");
    });

    let client = Client::new(&url).expect("client");
    let probe = &client;
    wait_for(Duration::from_secs(5), move || async move {
        probe.server_versions().await.ok()
    })
    .await;

    TestCluster {
        client,
        url,
        master,
        cancel,
    }
}

/// Poll `check` until it yields a value, panicking past `timeout`.
pub async fn wait_for<F, Fut, T>(timeout: Duration, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timeout after {timeout:?} waiting for condition");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn simple_pod(name: &str, labels: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..ObjectMeta::default()
        },
        spec: PodSpec {
            containers: vec![Container {
                name: "c".to_string(),
                image: "i".to_string(),
                ..Container::default()
            }],
            ..PodSpec::default()
        },
        ..Pod::default()
    }
}

pub fn pod_with_host_port(name: &str, host_port: i32) -> Pod {
    let mut pod = simple_pod(name, &[]);
    pod.spec.containers[0].ports = vec![Port {
        host_port: Some(host_port),
        container_port: host_port,
        ..Port::default()
    }];
    pod
}

pub fn minion(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        ..Node::default()
    }
}
