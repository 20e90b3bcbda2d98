use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    attach_media, authenticate, create_shipment, list_shipments, load_media, login,
    shipment_stats, toggle_customs_hold, track_shipment, tracking_view, update_status,
    AdminSession, AdminWrite, ApiContext, MediaUpload, SessionConfig,
};
use shared::{
    domain::{MediaId, MediaKind, ShipmentId, TrackingCode},
    error::{ApiError, ErrorCode},
    protocol::{
        AdminLoginRequest, AdminLoginResponse, NewShipmentRequest, ServerEvent, ShipmentRecord,
        ShipmentStats, TrackingSnapshot, UpdateStatusRequest,
    },
    view::TrackingView,
};
use storage::Storage;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

mod config;

use config::{load_settings, prepare_database_url};

const BOOTSTRAP_ADMIN_USERNAME: &str = "admin";
const MAX_FILENAME_BYTES: usize = 180;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<ServerEvent>,
    max_media_bytes: usize,
}

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
struct WsQuery {
    tracking_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaUploadQuery {
    kind: String,
    filename: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    if let Some(password) = settings.bootstrap_admin_password.as_deref() {
        if !storage.has_admin_credentials().await? {
            storage
                .set_admin_credential(BOOTSTRAP_ADMIN_USERNAME, password)
                .await?;
            info!(username = BOOTSTRAP_ADMIN_USERNAME, "seeded initial admin credential");
        }
    }
    if settings.session_secret == config::Settings::default().session_secret {
        warn!("using the built-in development session secret; set APP__SESSION_SECRET");
    }

    let api = ApiContext {
        storage,
        sessions: SessionConfig {
            secret: settings.session_secret.clone(),
            ttl_seconds: settings.session_ttl_seconds,
        },
        public_base_url: settings.public_base_url(),
    };
    let (events, _) = broadcast::channel(256);

    let state = AppState {
        api,
        events,
        max_media_bytes: settings.max_media_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let max_media_bytes = state.max_media_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/track/:code", get(http_track_shipment))
        .route("/track/:code/view", get(http_tracking_view))
        .route("/media/:media_id", get(download_media))
        .route("/ws", get(ws_handler))
        .route("/admin/login", post(http_admin_login))
        .route(
            "/admin/shipments",
            get(http_list_shipments).post(http_create_shipment),
        )
        .route("/admin/stats", get(http_shipment_stats))
        .route("/admin/shipments/:shipment_id/status", post(http_update_status))
        .route(
            "/admin/shipments/:shipment_id/customs-hold",
            post(http_toggle_customs_hold),
        )
        .route(
            "/admin/shipments/:shipment_id/media",
            post(upload_media)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(max_media_bytes)),
        )
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(err: ApiError) -> HttpError {
    if err.code == ErrorCode::Internal {
        error!(message = %err.message, "request failed");
    }
    (status_for(err.code), Json(err))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<AdminSession, HttpError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| http_error(ApiError::unauthorized("missing bearer token")))?;
    authenticate(&state.api, token).map_err(http_error)
}

/// Fans the write's change notifications out to websocket subscribers and
/// hands back the row for the response body.
fn publish(state: &AppState, write: AdminWrite) -> ShipmentRecord {
    for event in write.events {
        // No receivers is fine; nobody is watching.
        let _ = state.events.send(event);
    }
    write.shipment
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|e| {
        http_error(ApiError::new(ErrorCode::Internal, e.to_string()))
    })?;
    Ok("ok")
}

async fn http_track_shipment(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<TrackingSnapshot>, HttpError> {
    let snapshot = track_shipment(&state.api, &code)
        .await
        .map_err(http_error)?;
    Ok(Json(snapshot))
}

async fn http_tracking_view(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<TrackingView>, HttpError> {
    let view = tracking_view(&state.api, &code).await.map_err(http_error)?;
    Ok(Json(view))
}

async fn download_media(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let media = load_media(&state.api, MediaId(media_id))
        .await
        .map_err(http_error)?;

    let mut headers = HeaderMap::new();
    let content_type = media
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(filename) = media.filename {
        if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{filename}\"")) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    Ok((StatusCode::OK, headers, media.bytes))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> Response {
    let filter = match q.tracking_code.as_deref().map(TrackingCode::parse) {
        None => None,
        Some(Ok(code)) => Some(code),
        Some(Err(e)) => {
            return http_error(ApiError::validation(format!("invalid tracking code: {e}")))
                .into_response()
        }
    };
    // Subscribed before the 101 response so nothing written after the
    // handshake is missed.
    let events_rx = state.events.subscribe();
    ws.on_upgrade(move |socket| ws_connection(socket, events_rx, filter))
}

async fn ws_connection(
    socket: axum::extract::ws::WebSocket,
    mut events_rx: broadcast::Receiver<ServerEvent>,
    filter: Option<TrackingCode>,
) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};
    use tokio::sync::broadcast::error::RecvError;

    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket subscriber lagged behind change feed");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if let Some(code) = &filter {
                if !event.concerns(code) {
                    continue;
                }
            }
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

async fn http_admin_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdminLoginRequest>,
) -> Result<Json<AdminLoginResponse>, HttpError> {
    let (response, _session) = login(&state.api, &req).await.map_err(http_error)?;
    Ok(Json(response))
}

async fn http_list_shipments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ShipmentRecord>>, HttpError> {
    let session = require_admin(&state, &headers)?;
    let shipments = list_shipments(&state.api, &session)
        .await
        .map_err(http_error)?;
    Ok(Json(shipments))
}

async fn http_shipment_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ShipmentStats>, HttpError> {
    let session = require_admin(&state, &headers)?;
    let stats = shipment_stats(&state.api, &session)
        .await
        .map_err(http_error)?;
    Ok(Json(stats))
}

async fn http_create_shipment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewShipmentRequest>,
) -> Result<(StatusCode, Json<ShipmentRecord>), HttpError> {
    let session = require_admin(&state, &headers)?;
    let write = create_shipment(&state.api, &session, req)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(publish(&state, write))))
}

async fn http_update_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(shipment_id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ShipmentRecord>, HttpError> {
    let session = require_admin(&state, &headers)?;
    let write = update_status(&state.api, &session, ShipmentId(shipment_id), req)
        .await
        .map_err(http_error)?;
    Ok(Json(publish(&state, write)))
}

async fn http_toggle_customs_hold(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(shipment_id): Path<i64>,
) -> Result<Json<ShipmentRecord>, HttpError> {
    let session = require_admin(&state, &headers)?;
    let write = toggle_customs_hold(&state.api, &session, ShipmentId(shipment_id))
        .await
        .map_err(http_error)?;
    Ok(Json(publish(&state, write)))
}

async fn upload_media(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(shipment_id): Path<i64>,
    Query(q): Query<MediaUploadQuery>,
    body: Bytes,
) -> Result<Json<ShipmentRecord>, HttpError> {
    let session = require_admin(&state, &headers)?;
    let kind = q
        .kind
        .parse::<MediaKind>()
        .map_err(|e| http_error(ApiError::validation(e)))?;

    let filename = q
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    if let Some(name) = filename {
        if name.len() > MAX_FILENAME_BYTES {
            return Err(http_error(ApiError::validation("filename is too long")));
        }
        if name.contains('/') || name.contains('\\') || name.contains('"') {
            return Err(http_error(ApiError::validation(
                "filename must not contain path separators or quotes",
            )));
        }
    }
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    let write = attach_media(
        &state.api,
        &session,
        ShipmentId(shipment_id),
        MediaUpload {
            kind,
            mime_type,
            filename,
            bytes: &body,
        },
    )
    .await
    .map_err(http_error)?;
    Ok(Json(publish(&state, write)))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
