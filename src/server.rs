use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::probe_timeout_ms,
    events::EventBus,
    lan::LanScanner,
    netdetect,
    port_scan::{PortScanRequest, PortScanner},
};

#[derive(Clone)]
pub struct AppState {
    pub lan: Arc<LanScanner>,
    pub ports: Arc<PortScanner>,
    pub events: EventBus,
}

#[derive(Debug, Deserialize, Default)]
pub struct LanStartRequest {
    #[serde(default)]
    pub subnet: Option<String>,
    /// Probe timeout for this run, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct Accepted {
    started: bool,
}

#[derive(Debug, Serialize)]
struct Stopped {
    stopped: bool,
}

#[derive(Debug, Serialize)]
struct SubnetSuggestion {
    suggested: Option<String>,
    local: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/lan", get(get_lan))
        .route("/lan/start", post(post_lan_start))
        .route("/lan/stop", post(post_lan_stop))
        .route("/ports", get(get_ports))
        .route("/ports/start", post(post_ports_start))
        .route("/ports/stop", post(post_ports_stop))
        .route("/events", get(get_events))
        .route("/subnet", get(get_subnet))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let app = router(state);
    info!("serving API on http://{bind}/api");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_lan(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.lan.snapshot()))
}

async fn post_lan_start(
    State(app): State<AppState>,
    Json(req): Json<LanStartRequest>,
) -> impl IntoResponse {
    let subnet = match req.subnet.or_else(netdetect::suggest_subnet) {
        Some(s) => s,
        None => {
            return (StatusCode::BAD_REQUEST, "no subnet given and none detected".to_string())
                .into_response()
        }
    };
    let timeout = req.timeout_ms.map(probe_timeout_ms);
    match app.lan.start_with_timeout(&subnet, timeout) {
        Ok(started) => (StatusCode::ACCEPTED, Json(Accepted { started })).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn post_lan_stop(State(app): State<AppState>) -> impl IntoResponse {
    Json(Stopped {
        stopped: app.lan.stop(),
    })
}

async fn get_ports(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.ports.snapshot()))
}

async fn post_ports_start(
    State(app): State<AppState>,
    Json(req): Json<PortScanRequest>,
) -> impl IntoResponse {
    match app.ports.start(req).await {
        Ok(started) => (StatusCode::ACCEPTED, Json(Accepted { started })).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn post_ports_stop(State(app): State<AppState>) -> impl IntoResponse {
    Json(Stopped {
        stopped: app.ports.stop(),
    })
}

async fn get_events(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.events.history())
}

async fn get_subnet() -> impl IntoResponse {
    let local = netdetect::detect_local_prefixes().unwrap_or_default();
    Json(SubnetSuggestion {
        suggested: local.first().cloned(),
        local,
    })
}
