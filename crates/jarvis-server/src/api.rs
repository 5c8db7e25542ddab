use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{header, Method},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use jarvis_shared::constants::{
    ROUTE_COMMAND, ROUTE_FACE_MODEL, ROUTE_FACE_VERIFICATION, ROUTE_TELEMETRY, ROUTE_WAKE_WORD,
};
use jarvis_shared::types::ChannelKind;
use jarvis_store::DocumentStore;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::channels;
use crate::config::GatewayConfig;
use crate::decoder::DecoderFactory;
use crate::error::ServerError;
use crate::face_store::FaceStore;
use crate::probe::ProbeFactory;
use crate::registry::ConnectionRegistry;
use crate::router::CommandRouter;
use crate::telemetry::NetworkSmoother;
use crate::verification::FaceMatcher;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub router: Arc<CommandRouter>,
    pub store: Arc<DocumentStore>,
    pub faces: Arc<FaceStore>,
    pub smoother: Arc<NetworkSmoother>,
    pub probes: ProbeFactory,
    pub decoders: Arc<dyn DecoderFactory>,
    pub matcher: Arc<dyn FaceMatcher>,
    pub config: Arc<GatewayConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/faces/:filename", get(face_image))
        .route(ROUTE_COMMAND, get(command_ws))
        .route(ROUTE_TELEMETRY, get(telemetry_ws))
        .route(ROUTE_WAKE_WORD, get(wake_word_ws))
        .route(ROUTE_FACE_MODEL, get(face_model_ws))
        .route(ROUTE_FACE_VERIFICATION, get(face_verification_ws))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.len().await,
    })
}

async fn face_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ServerError> {
    let data = state.faces.read_image(&filename).await?;
    let content_type = match filename.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

fn upgrade(state: AppState, ws: WebSocketUpgrade, kind: ChannelKind) -> Response {
    ws.on_upgrade(move |socket| channels::serve(state, socket, kind))
}

async fn command_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws, ChannelKind::Command)
}

async fn telemetry_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws, ChannelKind::Telemetry)
}

async fn wake_word_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws, ChannelKind::WakeWord)
}

/// Face uploads arrive as one binary frame, so the frame limit follows the
/// upload limit.
async fn face_model_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let limit = state.faces.max_size();
    upgrade(state, ws.max_message_size(limit).max_frame_size(limit), ChannelKind::FaceModel)
}

async fn face_verification_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let limit = state.faces.max_size();
    upgrade(
        state,
        ws.max_message_size(limit).max_frame_size(limit),
        ChannelKind::FaceVerification,
    )
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
