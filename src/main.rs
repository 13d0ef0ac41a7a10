//! Thin binary: wires configuration, the hub, the call manager, and the
//! `axum` websocket/admin HTTP surface together, then serves.
//!
//! Kept deliberately small — every piece of behavior lives in `signalhub`'s
//! library modules, following the pack's `get10101` coordinator split
//! (`coordinator::routes::router` built up in its `src/bin/coordinator.rs`,
//! library does the work).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use signalhub::auth::{SharedSecretValidator, TokenValidator};
use signalhub::call::store::{CallStore, InMemoryCallStore};
#[cfg(feature = "call-store-sql")]
use signalhub::call::store_sql::SqlCallStore;
use signalhub::call::CallManager;
use signalhub::config::Config;
use signalhub::dispatcher::Dispatcher;
use signalhub::hub::offline::{InMemoryOfflineStore, OfflineStore};
use signalhub::hub::Hub;
use signalhub::socket::connection::Connection;
use signalhub::transport::axum_ws;
use signalhub::transport::{InboundFrame, TransportSink, TransportStream};

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    dispatcher: Arc<Dispatcher>,
    queue_capacity: usize,
    token_validator: Arc<dyn TokenValidator>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = Config::load().context("loading configuration")?;
    let call_store = build_call_store(&config).await?;
    let token_validator: Arc<dyn TokenValidator> =
        Arc::new(SharedSecretValidator::new(config.auth_shared_secret.clone()));

    let offline_store = Arc::new(InMemoryOfflineStore::new());
    let hub = Arc::new(Hub::new(config.max_connections, offline_store.clone()));
    let call_manager = Arc::new(CallManager::new(call_store, token_validator.clone()));

    spawn_offline_eviction(offline_store, config.offline_max_age);

    {
        let call_manager = call_manager.clone();
        let hub_for_disconnect = hub.clone();
        hub.on_disconnect(Arc::new(move |socket_id: String| {
            let call_manager = call_manager.clone();
            let hub = hub_for_disconnect.clone();
            Box::pin(async move {
                call_manager.handle_disconnect(&socket_id, &hub).await;
            })
        }))
        .await;
    }

    let dispatcher = Arc::new(Dispatcher::new(hub.clone(), call_manager));

    let state = AppState {
        hub: hub.clone(),
        dispatcher,
        queue_capacity: config.queue_capacity,
        token_validator,
    };

    let mut app = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
        .merge(signalhub::admin::health_router(hub.clone()));

    if config.admin_enabled {
        app = app.merge(signalhub::admin::admin_router(hub));
    }

    log::info!("binding on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding to {}", config.bind_addr))?;
    axum::serve(listener, app.into_make_service())
        .await
        .context("server loop exited")?;

    Ok(())
}

/// Periodically evicts offline-spool entries older than `max_age`, on the
/// hour-granularity cadence spec.md §5 calls illustrative rather than
/// mandatory. Runs for the lifetime of the process; failures are logged and
/// never fatal, matching every other subsystem-failure path in this crate.
fn spawn_offline_eviction(store: Arc<dyn OfflineStore>, max_age: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            match store.evict_expired(max_age).await {
                Ok(evicted) if evicted > 0 => {
                    log::info!("offline spool eviction removed {evicted} expired message(s)");
                }
                Ok(_) => {}
                Err(err) => log::warn!("offline spool eviction failed: {err:#}"),
            }
        }
    });
}

#[cfg(feature = "call-store-sql")]
async fn build_call_store(config: &Config) -> Result<Arc<dyn CallStore>> {
    match &config.call_store_url {
        Some(url) => {
            let store = SqlCallStore::connect(url)
                .await
                .with_context(|| format!("connecting to call store at {url}"))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryCallStore)),
    }
}

#[cfg(not(feature = "call-store-sql"))]
async fn build_call_store(config: &Config) -> Result<Arc<dyn CallStore>> {
    if config.call_store_url.is_some() {
        log::warn!(
            "HUB_CALL_STORE_URL is set but the call-store-sql feature is not enabled; \
             falling back to the in-memory call store"
        );
    }
    Ok(Arc::new(InMemoryCallStore))
}

/// `token` credential per spec.md §6.4: an `Authorization: Bearer <token>`
/// header or a `token` query-string parameter. Admission requires it to
/// validate via the configured [`TokenValidator`] (the default
/// `SharedSecretValidator` makes this "equal the configured shared
/// secret"); failure yields an HTTP 401 before the handshake completes.
fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(token) = query.get("token") {
        return Some(token.clone());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(token) = extract_token(&headers, &query) else {
        log::warn!("websocket upgrade rejected: no token credential supplied");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if let Err(err) = state.token_validator.validate(&token).await {
        log::warn!("websocket upgrade rejected: {err:#}");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: AppState) {
    let (sink, mut stream) = axum_ws::split(socket);
    let connection = Connection::spawn(Box::new(sink) as Box<dyn TransportSink>, state.queue_capacity);

    let socket = match state.hub.admit(connection).await {
        Ok(socket) => socket,
        Err(err) => {
            log::warn!("connection rejected: {err}");
            return;
        }
    };

    loop {
        match stream.recv().await {
            Some(InboundFrame::Text(text)) => {
                state.dispatcher.handle_text(&socket, &text).await;
            }
            Some(InboundFrame::Binary(payload)) => {
                state.dispatcher.handle_binary(&socket, payload).await;
            }
            Some(InboundFrame::Ping) => {
                // axum replies to websocket-level pings before this loop
                // ever observes them; nothing to do here.
            }
            Some(InboundFrame::Pong) => {}
            Some(InboundFrame::Close) | None => break,
        }
    }

    state.hub.remove(&socket.id).await;
}
