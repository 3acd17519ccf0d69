//! HTTP routes: command endpoint, health, stats and preview

use crate::context::AppContext;
use crate::transport::{ConnectionInfo, ConnectionState};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use nutricycle_cns::{BroadcastSnapshot, CommandError};
use nutricycle_eye::ProducerSnapshot;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

pub type ApiState = Arc<AppContext>;

const MJPEG_BOUNDARY: &str = "frame";

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    fn reply(status: StatusCode, error: impl Into<String>, code: &str) -> Response {
        let body = Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: String,
    pub machine_id: String,
    pub command: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub machine_id: Option<String>,
    pub broker_connected: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub dropped: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub queue: QueueStats,
    pub producer: ProducerSnapshot,
    pub broadcaster: BroadcastSnapshot,
    pub viewers: usize,
}

fn error_code(err: &CommandError) -> &'static str {
    match err {
        CommandError::BadPayload(_) => "BAD_PAYLOAD",
        CommandError::Unauthorized => "UNAUTHORIZED",
        CommandError::Forbidden => "FORBIDDEN",
        CommandError::WrongDevice => "WRONG_DEVICE",
        CommandError::InvalidCommand(_) => "INVALID_COMMAND",
        CommandError::BrokerUnavailable => "BROKER_UNAVAILABLE",
        CommandError::PublishFailed(_) => "PUBLISH_FAILED",
    }
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/control", post(control_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/connections", get(connections_handler))
        .route("/frame.jpg", get(frame_handler))
        .route("/stream.mjpg", get(stream_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn control_handler(
    State(ctx): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match ctx.commands.handle(&body, authorization).await {
        Ok(command) => Json(ControlResponse {
            status: "ok".to_string(),
            machine_id: command.machine_id,
            command: command.command.to_string(),
        })
        .into_response(),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            ErrorResponse::reply(status, e.to_string(), error_code(&e))
        }
    }
}

async fn health_handler(State(ctx): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        machine_id: ctx.machine_id().map(str::to_string),
        broker_connected: ctx.broker_connected(),
        uptime_secs: ctx.uptime_secs(),
    })
}

async fn stats_handler(State(ctx): State<ApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        queue: QueueStats {
            len: ctx.queue.len(),
            capacity: ctx.queue.capacity(),
            dropped: ctx.queue.dropped(),
        },
        producer: ctx.producer_stats.snapshot(),
        broadcaster: ctx.broadcast_stats.snapshot(),
        viewers: ctx.connections.active(),
    })
}

async fn connections_handler(State(ctx): State<ApiState>) -> Json<Vec<ConnectionInfo>> {
    Json(ctx.connections.list())
}

async fn frame_handler(State(ctx): State<ApiState>) -> Response {
    let hub = ctx.hub.clone();
    match tokio::task::spawn_blocking(move || hub.latest_jpeg()).await {
        Ok(Ok(Some((_, jpeg)))) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            jpeg,
        )
            .into_response(),
        Ok(Ok(None)) => ErrorResponse::reply(
            StatusCode::SERVICE_UNAVAILABLE,
            "No frame available yet",
            "NO_FRAME",
        ),
        Ok(Err(e)) => {
            warn!("Failed to encode preview frame: {}", e);
            ErrorResponse::reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "ENCODE_FAILED")
        }
        Err(e) => {
            warn!("Preview encode task failed: {}", e);
            ErrorResponse::reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Encode task failed",
                "ENCODE_FAILED",
            )
        }
    }
}

fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    let mut part = Vec::with_capacity(head.len() + jpeg.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

async fn stream_handler(
    State(ctx): State<ApiState>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let peer = peer
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let connection = Arc::new(ctx.connections.open(peer));
    if let Err(e) = connection.set_state(ConnectionState::Connecting) {
        warn!("Viewer connection setup failed: {}", e);
    }

    let hub = ctx.hub.clone();
    let closed = connection.closed();
    let parts = WatchStream::new(hub.subscribe())
        .take_until(closed)
        .filter_map(move |frame| {
            let connection = connection.clone();
            let hub = hub.clone();
            async move {
                frame.as_ref()?;
                match tokio::task::spawn_blocking(move || hub.latest_jpeg()).await {
                    Ok(Ok(Some((sequence, jpeg)))) => {
                        if connection.state() == Some(ConnectionState::Connecting) {
                            let _ = connection.set_state(ConnectionState::Connected);
                        }
                        debug!("Streaming frame {} to {}", sequence, connection.id());
                        Some(Ok::<_, Infallible>(mjpeg_part(&jpeg)))
                    }
                    Ok(Ok(None)) => None,
                    Ok(Err(e)) => {
                        warn!("Viewer {} failed: {}", connection.id(), e);
                        let _ = connection.set_state(ConnectionState::Failed);
                        None
                    }
                    Err(e) => {
                        warn!("Viewer {} failed: {}", connection.id(), e);
                        let _ = connection.set_state(ConnectionState::Failed);
                        None
                    }
                }
            }
        });

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}
