// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! The HTTP control plane: an `axum::Router` translating requests into
//! [`GossipEngine`]/[`DeviceStore`] calls.

use std::sync::Arc;

use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::gossip::{GossipEngine, GossipEngineError};
use crate::id::Id;
use crate::store::StoreError;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    engine: GossipEngine,
    shutdown: CancellationToken,
}

impl AppState {
    /// Build application state over an engine and a shutdown signal that
    /// `POST /shutdown` triggers.
    pub fn new(engine: GossipEngine, shutdown: CancellationToken) -> Self {
        Self { engine, shutdown }
    }
}

/// Build the router. `/metrics` and every `/device`, `/peer`, `/network`,
/// `/shutdown` route is wired here.
pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/", get(index))
        .route("/info", get(info))
        .route("/device", get(list_devices).post(create_device))
        .route("/device/:id", get(get_device).patch(patch_device).delete(delete_device))
        .route("/peer", get(list_peers).post(add_peer))
        .route("/network", post(join_network).delete(leave_network))
        .route("/shutdown", post(shutdown))
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .with_state(state)
}

type Shared = State<Arc<AppState>>;

/// Counts every routed request against `http_requests_total`, labelled by
/// the matched route pattern rather than the raw path (so `/device/:id`
/// doesn't fragment into one series per device id).
async fn track_requests(State(state): Shared, req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let response = next.run(req).await;
    state.engine.metrics().http_requests_total.with_label_values(&[&route]).inc();
    response
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "GET /": "This resource",
        "GET /info": "Display your peer info.",
        "GET /device": "Get all devices your peer currently knows about.",
        "GET /device/:id": "Get the last synched state for the given device.",
        "POST /device": "Create a new device, params: \"type\"=1 (light), \"state\"=[0|1] (off/on)",
        "PATCH /device/:id": "Update the state for a device you own, params: \"state\"=[0|1] (off/on)",
        "DELETE /device/:id": "Delete a device previously created by you.",
        "GET /peer": "Get all peers you currently see.",
        "POST /peer": "Manually add a new peer (needed in networks not supporting multicast).",
        "POST /network": "Join the network, start syncing state.",
        "DELETE /network": "Leave the network, stop syncing state.",
        "POST /shutdown": "Shut down and exit the application.",
        "GET /metrics": "Prometheus metrics exposition.",
    }))
}

#[derive(Serialize)]
struct InfoResponse {
    id: String,
    address: String,
}

async fn info(State(state): Shared) -> Response {
    let host = state.engine.host();
    Json(InfoResponse {
        id: host.id.to_string(),
        address: host.local_address.clone(),
    })
    .into_response()
}

#[derive(Serialize)]
struct DeviceResponse {
    id: String,
    owner: String,
    #[serde(rename = "type")]
    device_type: u8,
    state: u8,
    version: u64,
}

async fn list_devices(State(state): Shared) -> Response {
    match state.engine.list_device_ids() {
        Ok(ids) => Json(ids.iter().map(Id::to_string).collect::<Vec<_>>()).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn get_device(State(state): Shared, Path(id): Path<String>) -> Response {
    let id = Id::from_string(&id);
    match state.engine.get_device(id) {
        Ok(device) => Json(DeviceResponse {
            id: device.id.to_string(),
            owner: device.owner.to_string(),
            device_type: device.device_type,
            state: device.state,
            version: device.version,
        })
        .into_response(),
        Err(e) => store_error_response(e),
    }
}

#[derive(Deserialize)]
struct CreateDeviceForm {
    #[serde(rename = "type")]
    device_type: u8,
    #[serde(default)]
    state: u8,
}

async fn create_device(State(state): Shared, Form(form): Form<CreateDeviceForm>) -> Response {
    match state.engine.create_device(form.device_type, form.state) {
        Ok(id) => Json(json!({ "id": id.to_string() })).into_response(),
        Err(e) => engine_error_response(e),
    }
}

#[derive(Deserialize, Default)]
struct PatchDeviceForm {
    #[serde(default)]
    state: u8,
}

async fn patch_device(
    State(state): Shared,
    Path(id): Path<String>,
    body: Option<Form<PatchDeviceForm>>,
) -> Response {
    let id = Id::from_string(&id);
    let form = body.map(|Form(f)| f).unwrap_or_default();
    match state.engine.command_patch(id, form.state).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => engine_error_response(e),
    }
}

async fn delete_device(State(state): Shared, Path(id): Path<String>) -> Response {
    let id = Id::from_string(&id);
    match state.engine.delete_device(id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(GossipEngineError::NotOwner) => StatusCode::FORBIDDEN.into_response(),
        Err(e) => engine_error_response(e),
    }
}

async fn list_peers(State(state): Shared) -> Response {
    let peers = state.engine.list_peers().await;
    let map: serde_json::Map<String, serde_json::Value> = peers
        .into_iter()
        .map(|p| (p.id.to_string(), json!(p.address)))
        .collect();
    Json(map).into_response()
}

#[derive(Deserialize)]
struct AddPeerForm {
    id: String,
    address: String,
}

async fn add_peer(State(state): Shared, Form(form): Form<AddPeerForm>) -> Response {
    if form.address.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    state.engine.add_peer(Id::from_string(&form.id), form.address).await;
    StatusCode::OK.into_response()
}

async fn join_network(State(state): Shared) -> Response {
    match state.engine.attach().await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => engine_error_response(e),
    }
}

async fn leave_network(State(state): Shared) -> Response {
    state.engine.detach().await;
    StatusCode::ACCEPTED.into_response()
}

async fn shutdown(State(state): Shared) -> Response {
    state.engine.reset().await;
    state.shutdown.cancel();
    StatusCode::OK.into_response()
}

async fn metrics(State(state): Shared) -> Response {
    match state.engine.metrics().render() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn store_error_response(e: StoreError) -> Response {
    match e {
        StoreError::NotFound => StatusCode::NOT_FOUND.into_response(),
        e => {
            warn!(error = %e, "store error");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn engine_error_response(e: GossipEngineError) -> Response {
    match e {
        GossipEngineError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        GossipEngineError::NotOwner => StatusCode::FORBIDDEN.into_response(),
        GossipEngineError::AlreadyAttached => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        e => {
            warn!(error = %e, "engine error");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostIdentity;
    use crate::metrics::Metrics;
    use crate::store::DeviceStore;
    use crate::transport::UdpTransport;
    use tempfile::tempdir;
    use tokio::net::UdpSocket;
    use tower::ServiceExt;

    async fn free_port() -> u16 {
        let s = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        s.local_addr().unwrap().port()
    }

    async fn test_router() -> (tempfile::TempDir, GossipEngine, Router) {
        let dir = tempdir().unwrap();
        let store = DeviceStore::open(dir.path().to_str().unwrap()).unwrap();
        let port = free_port().await;
        let transport = UdpTransport::new(port);
        let metrics = Arc::new(Metrics::new().unwrap());
        let host = HostIdentity {
            id: Id::random(),
            local_address: format!("127.0.0.1:{port}"),
            broadcast_address: None,
        };
        let engine = GossipEngine::new(host, transport, store, metrics);
        let state = AppState::new(engine.clone(), CancellationToken::new());
        (dir, engine, router(state))
    }

    #[tokio::test]
    async fn info_reports_host_identity() {
        let (_dir, _engine, app) = test_router().await;
        let response = app
            .oneshot(axum::http::Request::builder().uri("/info").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_device_is_404() {
        let (_dir, _engine, app) = test_router().await;
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/device/{}", Id::random()))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_then_get_device_round_trips() {
        let (_dir, _engine, app) = test_router().await;

        let create_response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/device")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(axum::body::Body::from("type=1&state=0"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create_response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(create_response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let id = parsed["id"].as_str().unwrap();

        let get_response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/device/{id}"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get_response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_route_renders_prometheus_text() {
        let (_dir, _engine, app) = test_router().await;
        let response = app
            .oneshot(axum::http::Request::builder().uri("/metrics").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn requests_increment_http_requests_total() {
        let (_dir, engine, app) = test_router().await;
        app.oneshot(axum::http::Request::builder().uri("/info").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        let text = engine.metrics().render().unwrap();
        assert!(text.contains("fudnet_http_requests_total{route=\"/info\"} 1"));
    }
}
