//! Typed HTTP client for the Regatta API.
//!
//! One method per kind and verb, mirroring the REST surface; non-2xx
//! responses decode the `Status` envelope back into the shared error
//! taxonomy, so a caller matches on the same variants on either side of
//! the wire. Watches are the newline-framed event stream with
//! resume-from-version.

use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use regatta_api::codec;
use regatta_api::labels::Selector;
use regatta_api::model::{
    ApiObject, Binding, Event, Node, NodeList, Pod, PodList, ReplicationController,
    ReplicationControllerList, Service, ServiceList,
};
use regatta_api::status::Status;
use regatta_api::{Error, Result};
use regatta_store::{EventType, StoredObject, WatchEvent};

#[derive(Clone)]
pub struct Client {
    base: Url,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base: &str) -> Result<Client> {
        let base = Url::parse(base)
            .map_err(|e| Error::Unknown(format!("invalid server url {base:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Unknown(format!("failed to build http client: {e}")))?;
        Ok(Client { base, http })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Unknown(format!("invalid path {path:?}: {e}")))
    }

    async fn execute<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<ApiObject>,
    ) -> Result<T>
    where
        T: TryFrom<ApiObject, Error = Error>,
    {
        let mut request = self.http.request(method, self.url(path)?);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(obj) = body {
            request = request
                .header("content-type", "application/json")
                .body(codec::encode(&obj, codec::LATEST_VERSION)?);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Unknown(format!("request to {path} failed: {e}")))?;
        let code = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Unknown(format!("failed to read response body: {e}")))?;
        if !code.is_success() {
            return Err(error_from_body(&bytes, code.as_u16()));
        }
        T::try_from(codec::decode(&bytes)?)
    }

    pub async fn server_versions(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Versions {
            versions: Vec<String>,
        }
        let response = self
            .http
            .get(self.url("/api")?)
            .send()
            .await
            .map_err(|e| Error::Unknown(format!("request failed: {e}")))?;
        let versions: Versions = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("bad version response: {e}")))?;
        Ok(versions.versions)
    }

    // ── Pods ───────────────────────────────────────────────────────────

    pub async fn list_pods(&self, label: &Selector, field: &Selector) -> Result<PodList> {
        self.execute(Method::GET, "/api/v1/pods", &selectors(label, field), None)
            .await
    }

    pub async fn get_pod(&self, name: &str) -> Result<Pod> {
        self.execute(Method::GET, &format!("/api/v1/pods/{name}"), &[], None)
            .await
    }

    pub async fn create_pod(&self, pod: Pod) -> Result<Pod> {
        self.execute(Method::POST, "/api/v1/pods", &[], Some(pod.into()))
            .await
    }

    pub async fn update_pod(&self, pod: Pod) -> Result<Pod> {
        let path = format!("/api/v1/pods/{}", pod.metadata.name_str());
        self.execute(Method::PUT, &path, &[], Some(pod.into())).await
    }

    pub async fn delete_pod(&self, name: &str) -> Result<()> {
        let _: Status = self
            .execute(Method::DELETE, &format!("/api/v1/pods/{name}"), &[], None)
            .await?;
        Ok(())
    }

    pub async fn watch_pods(
        &self,
        label: &Selector,
        field: &Selector,
        from_version: u64,
    ) -> Result<RemoteWatcher<Pod>> {
        self.watch("pods", &selectors_with_version(label, field, from_version))
            .await
    }

    // ── Replication controllers ────────────────────────────────────────

    pub async fn list_controllers(
        &self,
        label: &Selector,
    ) -> Result<ReplicationControllerList> {
        self.execute(
            Method::GET,
            "/api/v1/replicationControllers",
            &selectors(label, &Selector::everything()),
            None,
        )
        .await
    }

    pub async fn get_controller(&self, name: &str) -> Result<ReplicationController> {
        self.execute(
            Method::GET,
            &format!("/api/v1/replicationControllers/{name}"),
            &[],
            None,
        )
        .await
    }

    pub async fn create_controller(
        &self,
        rc: ReplicationController,
    ) -> Result<ReplicationController> {
        self.execute(
            Method::POST,
            "/api/v1/replicationControllers",
            &[],
            Some(rc.into()),
        )
        .await
    }

    pub async fn update_controller(
        &self,
        rc: ReplicationController,
    ) -> Result<ReplicationController> {
        let path = format!("/api/v1/replicationControllers/{}", rc.metadata.name_str());
        self.execute(Method::PUT, &path, &[], Some(rc.into())).await
    }

    pub async fn delete_controller(&self, name: &str) -> Result<()> {
        let _: Status = self
            .execute(
                Method::DELETE,
                &format!("/api/v1/replicationControllers/{name}"),
                &[],
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn watch_controllers(
        &self,
        from_version: u64,
    ) -> Result<RemoteWatcher<ReplicationController>> {
        self.watch(
            "replicationControllers",
            &selectors_with_version(&Selector::everything(), &Selector::everything(), from_version),
        )
        .await
    }

    // ── Services ───────────────────────────────────────────────────────

    pub async fn list_services(&self, label: &Selector) -> Result<ServiceList> {
        self.execute(
            Method::GET,
            "/api/v1/services",
            &selectors(label, &Selector::everything()),
            None,
        )
        .await
    }

    pub async fn get_service(&self, name: &str) -> Result<Service> {
        self.execute(Method::GET, &format!("/api/v1/services/{name}"), &[], None)
            .await
    }

    pub async fn create_service(&self, svc: Service) -> Result<Service> {
        self.execute(Method::POST, "/api/v1/services", &[], Some(svc.into()))
            .await
    }

    pub async fn update_service(&self, svc: Service) -> Result<Service> {
        let path = format!("/api/v1/services/{}", svc.metadata.name_str());
        self.execute(Method::PUT, &path, &[], Some(svc.into())).await
    }

    pub async fn delete_service(&self, name: &str) -> Result<()> {
        let _: Status = self
            .execute(Method::DELETE, &format!("/api/v1/services/{name}"), &[], None)
            .await?;
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────────

    pub async fn list_minions(&self) -> Result<NodeList> {
        self.execute(Method::GET, "/api/v1/nodes", &[], None).await
    }

    pub async fn create_minion(&self, node: Node) -> Result<Node> {
        self.execute(Method::POST, "/api/v1/nodes", &[], Some(node.into()))
            .await
    }

    // ── Bindings and events ────────────────────────────────────────────

    pub async fn create_binding(&self, binding: Binding) -> Result<()> {
        let _: Status = self
            .execute(Method::POST, "/api/v1/bindings", &[], Some(binding.into()))
            .await?;
        Ok(())
    }

    pub async fn create_event(&self, event: Event) -> Result<Event> {
        self.execute(Method::POST, "/api/v1/events", &[], Some(event.into()))
            .await
    }

    async fn watch<T: StoredObject>(
        &self,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<RemoteWatcher<T>> {
        let url = self.url(&format!("/api/v1/watch/{resource}"))?;
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Unknown(format!("watch request failed: {e}")))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let bytes = response.bytes().await.unwrap_or_default();
            return Err(error_from_body(&bytes, code));
        }
        debug!(msg = "watch stream opened", %resource);
        Ok(RemoteWatcher {
            stream: Box::pin(response.bytes_stream()),
            buffer: Vec::new(),
            _kind: PhantomData,
        })
    }
}

fn error_from_body(bytes: &[u8], code: u16) -> Error {
    match codec::decode(bytes) {
        Ok(ApiObject::Status(status)) => Error::from_status(&status),
        _ => Error::Unknown(format!("server returned {code}")),
    }
}

fn selectors(label: &Selector, field: &Selector) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if !label.is_empty() {
        query.push(("labels", label.to_string()));
    }
    if !field.is_empty() {
        query.push(("fields", field.to_string()));
    }
    query
}

fn selectors_with_version(
    label: &Selector,
    field: &Selector,
    from_version: u64,
) -> Vec<(&'static str, String)> {
    let mut query = selectors(label, field);
    if from_version > 0 {
        query.push(("resourceVersion", from_version.to_string()));
    }
    query
}

/// Watch stream over HTTP: one JSON event per line, resumable from the
/// last seen resource version after the connection drops.
pub struct RemoteWatcher<T> {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    _kind: PhantomData<T>,
}

#[derive(Deserialize)]
struct WireWatchEvent {
    #[serde(rename = "type")]
    event_type: String,
    object: serde_json::Value,
}

impl<T: StoredObject> RemoteWatcher<T> {
    /// Next event, or `None` when the server closed the stream (restart
    /// from the last seen version).
    pub async fn next(&mut self) -> Option<WatchEvent<T>> {
        loop {
            if let Some(line) = self.take_line() {
                match parse_event::<T>(&line) {
                    Ok(event) => return Some(event),
                    Err(error) => {
                        debug!(msg = "dropping undecodable watch frame", %error);
                        return None;
                    }
                }
            }
            match self.stream.next().await? {
                Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                Err(error) => {
                    debug!(msg = "watch stream error", %error);
                    return None;
                }
            }
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        Some(line)
    }
}

#[async_trait::async_trait]
impl<T: StoredObject> regatta_store::EventStream<T> for RemoteWatcher<T> {
    async fn next_event(&mut self) -> Option<WatchEvent<T>> {
        self.next().await
    }
}

fn parse_event<T: StoredObject>(line: &[u8]) -> Result<WatchEvent<T>> {
    let frame: WireWatchEvent = serde_json::from_slice(line)
        .map_err(|e| Error::Decode(format!("malformed watch frame: {e}")))?;
    let event_type = match frame.event_type.as_str() {
        "ADDED" => EventType::Added,
        "MODIFIED" => EventType::Modified,
        "DELETED" => EventType::Deleted,
        other => {
            return Err(Error::Decode(format!("unknown watch event type {other:?}")));
        }
    };
    let object = T::try_from(codec::decode_value(frame.object)?)?;
    Ok(WatchEvent { event_type, object })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_watch_frame() {
        let line = br#"{"type":"ADDED","object":{"kind":"Pod","apiVersion":"v1","metadata":{"name":"p1","resourceVersion":"7"}}}"#;
        let event: WatchEvent<Pod> = parse_event(line).unwrap();
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.object.metadata.name.as_deref(), Some("p1"));
        assert_eq!(event.resource_version(), 7);
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let line = br#"{"type":"BOOM","object":{"kind":"Pod","apiVersion":"v1"}}"#;
        assert!(parse_event::<Pod>(line).is_err());
    }

    #[test]
    fn test_selector_query_omits_empty() {
        let label: Selector = "app=web".parse().unwrap();
        let query = selectors(&label, &Selector::everything());
        assert_eq!(query, vec![("labels", "app=web".to_string())]);
        assert!(selectors(&Selector::everything(), &Selector::everything()).is_empty());
    }
}
