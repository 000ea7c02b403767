use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use herald_hub::{HubHandle, HubStats};

use crate::{SessionConfig, run_connection};

/// Estado compartilhado pelos handlers HTTP.
#[derive(Clone)]
pub struct AppState {
    hub: HubHandle,
    session: SessionConfig,
    limiter: Arc<Semaphore>,
    max_message_size: usize,
}

impl AppState {
    pub fn new(
        hub: HubHandle,
        max_connections: usize,
        session: SessionConfig,
        max_message_size: usize,
    ) -> Self {
        Self {
            hub,
            session,
            limiter: Arc::new(Semaphore::new(max_connections)),
            max_message_size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    user_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve até `shutdown` completar.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    // A identidade vem da camada de autenticação; aqui só exigimos o user_id
    let Some(user_id) = params.user_id.filter(|id| !id.is_empty()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Authentication required" })),
        )
            .into_response();
    };

    let Ok(permit) = state.limiter.clone().try_acquire_owned() else {
        warn!("conexão de {user_id} recusada: limite de conexões atingido");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Too many connections" })),
        )
            .into_response();
    };

    info!("nova conexão WebSocket: {user_id}");
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            // Erros já são registrados pelo adaptador
            let _ = run_connection(state.hub, user_id, sink, stream, state.session).await;
            drop(permit);
        })
}

async fn stats_handler(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_connections": stats.active_connections,
    }))
}
