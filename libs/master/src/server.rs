//! The versioned HTTP surface.
//!
//! Paths follow `/api/{version}/{resource}[/{name}]` with a sibling
//! `/api/{version}/watch/{resource}` event stream; every non-2xx response
//! body is a `Status` envelope encoded at the version the request
//! addressed. Mutations run as tracked operations: finished within the
//! request's timeout they answer 200 with the object, otherwise 202 with
//! the operation id to poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures::stream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use regatta_api::codec;
use regatta_api::labels::Selector;
use regatta_api::metrics::Metrics;
use regatta_api::model::ApiObject;
use regatta_api::status::Status;
use regatta_api::{Error, Result};
use regatta_store::EventType;

use crate::operation::{OperationResult, Operations};
use crate::rest::{RequestContext, RestHandler};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Server build information for `/version`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub major: String,
    pub minor: String,
    pub git_version: String,
}

impl Default for Info {
    fn default() -> Self {
        let version = env!("CARGO_PKG_VERSION");
        let mut parts = version.split('.');
        Info {
            major: parts.next().unwrap_or("0").to_string(),
            minor: parts.next().unwrap_or("0").to_string(),
            git_version: format!("v{version}"),
        }
    }
}

pub type HandlerMap = HashMap<&'static str, Arc<dyn RestHandler>>;

#[derive(Clone)]
pub struct AppState {
    handlers: Arc<HandlerMap>,
    operations: Operations,
    metrics: Metrics,
    info: Info,
}

impl AppState {
    pub fn new(handlers: HandlerMap, operations: Operations, metrics: Metrics) -> AppState {
        AppState {
            handlers: Arc::new(handlers),
            operations,
            metrics,
            info: Info::default(),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ApiParams {
    labels: Option<String>,
    fields: Option<String>,
    namespace: Option<String>,
    sync: Option<bool>,
    timeout: Option<String>,
    resource_version: Option<u64>,
}

impl ApiParams {
    fn context(&self) -> RequestContext {
        RequestContext {
            namespace: self
                .namespace
                .clone()
                .unwrap_or_else(|| regatta_api::meta::DEFAULT_NAMESPACE.to_string()),
        }
    }

    fn label_selector(&self) -> Result<Selector> {
        self.labels.as_deref().unwrap_or("").parse()
    }

    fn field_selector(&self) -> Result<Selector> {
        self.fields.as_deref().unwrap_or("").parse()
    }

    /// How long a mutation may run before the response degrades to 202.
    /// `sync=false` opts out of waiting entirely.
    fn wait_budget(&self) -> Duration {
        if self.sync == Some(false) {
            return Duration::ZERO;
        }
        self.timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(Duration::from_secs_f64);
    }
    s.parse().ok().map(Duration::from_secs)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(api_versions))
        .route("/version", get(version_info))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_text))
        .route(
            "/api/{version}/{resource}",
            get(list_resource).post(create_resource),
        )
        .route(
            "/api/{version}/{resource}/{name}",
            get(get_resource).put(update_resource).delete(delete_resource),
        )
        .route("/api/{version}/watch/{resource}", get(watch_resource))
        .fallback(not_found)
        .with_state(state)
}

fn error_response(err: &Error, version: &str) -> Response {
    let status = err.to_status();
    let code = StatusCode::from_u16(err.http_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = codec::encode(&ApiObject::Status(status), version)
        .unwrap_or_else(|_| b"{\"status\":\"Failure\"}".to_vec());
    (code, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn object_response(obj: &ApiObject, version: &str, code: StatusCode) -> Response {
    match codec::encode(obj, version) {
        Ok(body) => (code, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => error_response(&err, version),
    }
}

fn check_version(version: &str) -> Result<()> {
    if codec::is_supported_version(version) {
        Ok(())
    } else {
        Err(Error::NotSupported(format!(
            "api version {version:?} is not supported"
        )))
    }
}

fn handler_for<'a>(state: &'a AppState, resource: &str) -> Result<&'a Arc<dyn RestHandler>> {
    state
        .handlers
        .get(resource)
        .ok_or_else(|| Error::NotRecognized(resource.to_string()))
}

fn set_self_link(obj: &mut ApiObject, link: String) {
    if let Some(meta) = obj.object_meta_mut() {
        meta.self_link = Some(link);
    }
}

async fn api_versions() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "versions": codec::SUPPORTED_VERSIONS }))
}

async fn version_info(State(state): State<AppState>) -> Json<Info> {
    Json(state.info.clone())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            text,
        )
            .into_response(),
        Err(err) => error_response(&err, codec::LATEST_VERSION),
    }
}

async fn not_found() -> Response {
    error_response(
        &Error::not_found("path", ""),
        codec::LATEST_VERSION,
    )
}

/// Decode a request body, accepting YAML as an alternate JSON surface.
fn decode_body(content_type: Option<&str>, body: &[u8]) -> Result<ApiObject> {
    if content_type.is_some_and(|ct| ct.contains("yaml")) {
        let value: serde_json::Value = serde_yaml::from_slice(body)
            .map_err(|e| Error::Decode(format!("malformed yaml: {e}")))?;
        codec::decode_value(value)
    } else {
        codec::decode(body)
    }
}

async fn list_resource(
    State(state): State<AppState>,
    Path((version, resource)): Path<(String, String)>,
    Query(params): Query<ApiParams>,
) -> Response {
    if let Err(err) = check_version(&version) {
        return error_response(&err, codec::LATEST_VERSION);
    }
    if resource == "operations" {
        let list = state.operations.list().await;
        return object_response(&ApiObject::OperationList(list), &version, StatusCode::OK);
    }
    let result = async {
        let handler = handler_for(&state, &resource)?;
        let label = params.label_selector()?;
        let field = params.field_selector()?;
        let mut list = handler.list(&params.context(), &label, &field).await?;
        set_self_link(&mut list, format!("/api/{version}/{resource}"));
        Ok::<_, Error>(list)
    }
    .await;
    match result {
        Ok(list) => object_response(&list, &version, StatusCode::OK),
        Err(err) => error_response(&err, &version),
    }
}

async fn get_resource(
    State(state): State<AppState>,
    Path((version, resource, name)): Path<(String, String, String)>,
) -> Response {
    if let Err(err) = check_version(&version) {
        return error_response(&err, codec::LATEST_VERSION);
    }
    if resource == "operations" {
        return operation_status(&state, &version, &name).await;
    }
    let result = async {
        let handler = handler_for(&state, &resource)?;
        let mut obj = handler.get(&RequestContext::default(), &name).await?;
        set_self_link(&mut obj, format!("/api/{version}/{resource}/{name}"));
        Ok::<_, Error>(obj)
    }
    .await;
    match result {
        Ok(obj) => object_response(&obj, &version, StatusCode::OK),
        Err(err) => error_response(&err, &version),
    }
}

async fn operation_status(state: &AppState, version: &str, id: &str) -> Response {
    match state.operations.get(id).await {
        None => error_response(&Error::not_found("Operation", id), version),
        Some(None) => object_response(
            &ApiObject::Status(Status::working(id)),
            version,
            StatusCode::ACCEPTED,
        ),
        Some(Some(result)) => finished_response(&result, version),
    }
}

fn finished_response(result: &OperationResult, version: &str) -> Response {
    let code = StatusCode::from_u16(result.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    object_response(&result.object, version, code)
}

/// Run a mutation as an operation, waiting up to the request's budget.
async fn run_operation<F>(state: &AppState, version: &str, params: &ApiParams, work: F) -> Response
where
    F: std::future::Future<Output = Result<ApiObject>> + Send + 'static,
{
    let id = state.operations.start(work).await;
    match state.operations.wait(&id, params.wait_budget()).await {
        Some(Some(result)) => finished_response(&result, version),
        _ => {
            debug!(msg = "request degraded to async operation", operation = %id);
            object_response(
                &ApiObject::Status(Status::working(&id)),
                version,
                StatusCode::ACCEPTED,
            )
        }
    }
}

async fn create_resource(
    State(state): State<AppState>,
    Path((version, resource)): Path<(String, String)>,
    Query(params): Query<ApiParams>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(err) = check_version(&version) {
        return error_response(&err, codec::LATEST_VERSION);
    }
    let handler = match handler_for(&state, &resource) {
        Ok(h) => h.clone(),
        Err(err) => return error_response(&err, &version),
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let obj = match decode_body(content_type, &body) {
        Ok(obj) => obj,
        Err(err) => return error_response(&err, &version),
    };
    let ctx = params.context();
    let link_version = version.clone();
    let link_resource = resource.clone();
    run_operation(&state, &version, &params, async move {
        let mut created = handler.create(&ctx, obj).await?;
        let name = created
            .object_meta()
            .and_then(|m| m.name.clone())
            .unwrap_or_default();
        set_self_link(
            &mut created,
            format!("/api/{link_version}/{link_resource}/{name}"),
        );
        Ok(created)
    })
    .await
}

async fn update_resource(
    State(state): State<AppState>,
    Path((version, resource, name)): Path<(String, String, String)>,
    Query(params): Query<ApiParams>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(err) = check_version(&version) {
        return error_response(&err, codec::LATEST_VERSION);
    }
    let handler = match handler_for(&state, &resource) {
        Ok(h) => h.clone(),
        Err(err) => return error_response(&err, &version),
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let obj = match decode_body(content_type, &body) {
        Ok(obj) => obj,
        Err(err) => return error_response(&err, &version),
    };
    if obj
        .object_meta()
        .is_some_and(|m| !m.name_str().is_empty() && m.name_str() != name)
    {
        let err = Error::Decode(format!(
            "object name {:?} does not match the path name {name:?}",
            obj.object_meta().map(|m| m.name_str()).unwrap_or_default()
        ));
        return error_response(&err, &version);
    }
    let ctx = params.context();
    let link = format!("/api/{version}/{resource}/{name}");
    run_operation(&state, &version, &params, async move {
        let mut updated = handler.update(&ctx, obj).await?;
        set_self_link(&mut updated, link);
        Ok(updated)
    })
    .await
}

async fn delete_resource(
    State(state): State<AppState>,
    Path((version, resource, name)): Path<(String, String, String)>,
    Query(params): Query<ApiParams>,
) -> Response {
    if let Err(err) = check_version(&version) {
        return error_response(&err, codec::LATEST_VERSION);
    }
    let handler = match handler_for(&state, &resource) {
        Ok(h) => h.clone(),
        Err(err) => return error_response(&err, &version),
    };
    let ctx = params.context();
    run_operation(&state, &version, &params, async move {
        handler.delete(&ctx, &name).await
    })
    .await
}

/// One serialized event per line, the chunked wire form of the watch
/// fabric.
#[derive(Serialize)]
struct WireWatchEvent {
    #[serde(rename = "type")]
    event_type: &'static str,
    object: serde_json::Value,
}

fn event_type_name(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Added => "ADDED",
        EventType::Modified => "MODIFIED",
        EventType::Deleted => "DELETED",
    }
}

async fn watch_resource(
    State(state): State<AppState>,
    Path((version, resource)): Path<(String, String)>,
    Query(params): Query<ApiParams>,
) -> Response {
    if let Err(err) = check_version(&version) {
        return error_response(&err, codec::LATEST_VERSION);
    }
    let result = async {
        let handler = handler_for(&state, &resource)?;
        let label = params.label_selector()?;
        let field = params.field_selector()?;
        handler
            .watch(
                &params.context(),
                label,
                field,
                params.resource_version.unwrap_or(0),
            )
            .await
    }
    .await;

    let watch_stream = match result {
        Ok(ws) => ws,
        Err(err) => return error_response(&err, &version),
    };

    let frames = stream::unfold(watch_stream, move |mut ws| {
        let version = version.clone();
        async move {
            let event = ws.next().await?;
            let frame = codec::encode_value(&event.object, &version)
                .ok()
                .and_then(|object| {
                    serde_json::to_string(&WireWatchEvent {
                        event_type: event_type_name(event.event_type),
                        object,
                    })
                    .ok()
                })
                .map(|mut line| {
                    line.push('\n');
                    Bytes::from(line)
                })?;
            Some((Ok::<_, std::convert::Infallible>(frame), ws))
        }
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(frames),
    )
        .into_response()
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use regatta_store::MemoryBackend;

    use crate::clients::{NodeAgentClient, PodInfo, StaticCloudProvider};
    use crate::master::{Master, MasterConfig};

    struct NoAgent;

    #[async_trait]
    impl NodeAgentClient for NoAgent {
        async fn pod_info(&self, _host: &str, pod_id: &str) -> Result<PodInfo> {
            Err(Error::not_found("Pod", pod_id))
        }

        async fn healthy(&self, _host: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn master() -> Master {
        Master::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(NoAgent),
            Arc::new(StaticCloudProvider),
            MasterConfig::default(),
        )
    }

    async fn request(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&value).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn pod_body(name: &str) -> serde_json::Value {
        serde_json::json!({
            "kind": "Pod",
            "apiVersion": "v1",
            "metadata": {"name": name},
            "spec": {"containers": [{"name": "c", "image": "i"}]}
        })
    }

    #[tokio::test]
    async fn test_create_then_get_pod() {
        let router = master().router();
        let (status, body) =
            request(&router, Method::POST, "/api/v1/pods", Some(pod_body("p1"))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(!body["metadata"]["uid"].as_str().unwrap_or("").is_empty());
        let version: u64 = body["metadata"]["resourceVersion"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(version >= 1);
        assert_eq!(body["status"]["phase"], "Pending");
        assert_eq!(body["metadata"]["selfLink"], "/api/v1/pods/p1");

        let (status, fetched) = request(&router, Method::GET, "/api/v1/pods/p1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["metadata"]["name"], "p1");
        assert_eq!(fetched["metadata"]["uid"], body["metadata"]["uid"]);
    }

    #[tokio::test]
    async fn test_invalid_pod_produces_causes() {
        let router = master().router();
        let body = serde_json::json!({
            "kind": "Pod",
            "apiVersion": "v1",
            "metadata": {"name": "p1"},
            "spec": {"containers": [{"name": "c", "image": ""}]}
        });
        let (status, envelope) =
            request(&router, Method::POST, "/api/v1/pods", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(envelope["kind"], "Status");
        assert_eq!(envelope["reason"], "Invalid");
        let causes = envelope["details"]["causes"].as_array().unwrap();
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0]["field"], "spec.containers[0].image");
    }

    #[tokio::test]
    async fn test_unsupported_capability_is_405() {
        let router = master().router();
        let (status, envelope) = request(&router, Method::GET, "/api/v1/bindings", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(envelope["reason"], "MethodNotAllowed");
    }

    #[tokio::test]
    async fn test_unknown_version_and_resource() {
        let router = master().router();
        let (status, _) = request(&router, Method::GET, "/api/v9/pods", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, envelope) = request(&router, Method::GET, "/api/v1/gizmos", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope["reason"], "BadRequest");
    }

    #[tokio::test]
    async fn test_old_wire_version_round_trips() {
        let router = master().router();
        let old_pod = serde_json::json!({
            "kind": "Pod",
            "apiVersion": "v1alpha1",
            "id": "p1",
            "desiredState": {
                "manifest": {
                    "version": "v1alpha1",
                    "id": "p1",
                    "containers": [{"name": "c", "image": "i"}]
                }
            }
        });
        let (status, body) =
            request(&router, Method::POST, "/api/v1alpha1/pods", Some(old_pod)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["id"], "p1");
        assert!(body["desiredState"]["manifest"]["containers"].is_array());
        assert!(body.get("metadata").is_none());

        // The same object reads back in the new shape from the new path.
        let (status, fetched) = request(&router, Method::GET, "/api/v1/pods/p1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["metadata"]["name"], "p1");
        assert_eq!(fetched["spec"]["containers"][0]["image"], "i");
    }

    #[tokio::test]
    async fn test_minions_alias_serves_nodes() {
        let router = master().router();
        let node = serde_json::json!({
            "kind": "Node",
            "apiVersion": "v1",
            "metadata": {"name": "n1"}
        });
        let (status, _) = request(&router, Method::POST, "/api/v1/nodes", Some(node)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, list) = request(&router, Method::GET, "/api/v1alpha1/minions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["kind"], "MinionList");
        assert_eq!(list["items"][0]["id"], "n1");
    }

    #[tokio::test]
    async fn test_async_mutation_returns_operation() {
        let router = master().router();
        let (status, envelope) = request(
            &router,
            Method::POST,
            "/api/v1/pods?sync=false",
            Some(pod_body("p1")),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(envelope["status"], "Working");
        let id = envelope["details"]["id"].as_str().unwrap().to_string();

        // The operation finishes shortly and the poll returns the object.
        let mut finished = None;
        for _ in 0..50 {
            let (status, body) = request(
                &router,
                Method::GET,
                &format!("/api/v1/operations/{id}"),
                None,
            )
            .await;
            if status == StatusCode::OK {
                finished = Some(body);
                break;
            }
            assert_eq!(status, StatusCode::ACCEPTED);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let pod = finished.expect("operation should finish");
        assert_eq!(pod["kind"], "Pod");
        assert_eq!(pod["metadata"]["name"], "p1");
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let router = master().router();
        let (_, created) =
            request(&router, Method::POST, "/api/v1/pods", Some(pod_body("p1"))).await;
        let stale = created.clone();

        // First update with the fresh version wins.
        let (status, _) = request(
            &router,
            Method::PUT,
            "/api/v1/pods/p1",
            Some(created),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Replaying the old version loses the race.
        let (status, envelope) =
            request(&router, Method::PUT, "/api/v1/pods/p1", Some(stale)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(envelope["reason"], "Conflict");
    }

    #[tokio::test]
    async fn test_delete_returns_success_status() {
        let router = master().router();
        request(&router, Method::POST, "/api/v1/pods", Some(pod_body("p1"))).await;
        let (status, envelope) =
            request(&router, Method::DELETE, "/api/v1/pods/p1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope["status"], "Success");

        let (status, _) = request(&router, Method::GET, "/api/v1/pods/p1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("bogus"), None);
    }
}
