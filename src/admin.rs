//! Admin HTTP surface (spec.md §6.5): an operator-facing surface mounted
//! alongside the websocket endpoint, separate from the application wire
//! protocol. Grounded in the `axum::extract::State<Arc<AppState>>` +
//! `Json` handler shape used throughout the pack's `get10101` coordinator
//! (`coordinator/src/admin.rs`, `coordinator/src/routes.rs`).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::hub::Hub;
use crate::kind::KindTag;
use crate::message::Message;

#[derive(Deserialize)]
pub struct BroadcastQuery {
    message: String,
}

/// `POST /broadcast?message=...`. Mounted only when `Config::admin_enabled`
/// is set — unlike [`health_router`], this surface can mutate hub state.
pub fn admin_router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/broadcast", post(broadcast))
        .with_state(hub)
}

/// `GET /healthz`. Mounted unconditionally — an operability surface, not
/// part of the optional admin surface `Config::admin_enabled` gates.
pub fn health_router(hub: Arc<Hub>) -> Router {
    Router::new().route("/healthz", get(healthz)).with_state(hub)
}

async fn broadcast(State(hub): State<Arc<Hub>>, Query(query): Query<BroadcastQuery>) -> Response {
    let announcement = Message {
        t: KindTag::System.as_i64(),
        data: Some(json!({ "type": "admin_announcement", "message": query.message })),
        ..Message::default()
    };
    hub.broadcast(&announcement, None).await;
    StatusCode::OK.into_response()
}

async fn healthz(State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    let connections = hub.connection_count().await;
    Json(json!({ "status": "ok", "connections": connections }))
}
