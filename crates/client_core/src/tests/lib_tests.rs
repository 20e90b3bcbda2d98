use super::*;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode as HttpStatus,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{TimeZone, Utc};
use shared::{
    domain::{EventId, ShipmentId},
    error::ErrorCode,
    protocol::{PublicShipment, PublicShipmentEvent, RowChange},
};
use tokio::net::TcpListener;

pub(crate) const KNOWN_CODE: &str = "SPD123456789";

pub(crate) fn snapshot(status: &str, held: bool) -> TrackingSnapshot {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("time");
    TrackingSnapshot {
        shipment: PublicShipment {
            id: ShipmentId(1),
            tracking_code: TrackingCode::parse(KNOWN_CODE).expect("code"),
            origin: "Lagos".into(),
            destination: "Toronto".into(),
            package_description: "Books".into(),
            current_status: status.into(),
            is_customs_held: held,
            eta: None,
            last_scan_at: Some(at),
            lat: None,
            lng: None,
            media: None,
            created_at: at,
            updated_at: at,
        },
        events: vec![PublicShipmentEvent {
            id: EventId(1),
            status: "Created".into(),
            note: None,
            location: Some("Lagos".into()),
            lat: None,
            lng: None,
            occurred_at: at,
        }],
    }
}

pub(crate) fn change_for(code: &str) -> ServerEvent {
    ServerEvent::ShipmentChanged {
        shipment_id: ShipmentId(1),
        tracking_code: TrackingCode::parse(code).expect("code"),
        change: RowChange::Update,
    }
}

#[derive(Clone)]
struct CannedServer {
    snapshot: Arc<TrackingSnapshot>,
}

async fn canned_track(
    State(state): State<CannedServer>,
    Path(code): Path<String>,
) -> Response {
    if code == KNOWN_CODE {
        return Json(state.snapshot.as_ref().clone()).into_response();
    }
    (
        HttpStatus::NOT_FOUND,
        Json(ApiError::new(ErrorCode::NotFound, "Tracking ID not found.")),
    )
        .into_response()
}

async fn canned_ws(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        let text = serde_json::to_string(&change_for(KNOWN_CODE)).expect("json");
        let _ = socket.send(WsMessage::Text(text)).await;
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn spawn_canned_server(snapshot: TrackingSnapshot) -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/track/:code", get(canned_track))
        .route("/ws", get(canned_ws))
        .with_state(CannedServer {
            snapshot: Arc::new(snapshot),
        });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

#[test]
fn websocket_url_swaps_scheme_and_keeps_prefix() {
    let code = TrackingCode::parse(KNOWN_CODE).expect("code");
    assert_eq!(
        websocket_url("http://localhost:8080", &code)
            .expect("url")
            .as_str(),
        "ws://localhost:8080/ws?tracking_code=SPD123456789"
    );
    assert_eq!(
        websocket_url("https://track.example.com/api/", &code)
            .expect("url")
            .as_str(),
        "wss://track.example.com/api/ws?tracking_code=SPD123456789"
    );
    assert!(matches!(
        websocket_url("ftp://example.com", &code),
        Err(TrackingError::Subscription(_))
    ));
}

#[tokio::test]
async fn http_source_fetches_snapshot_and_maps_not_found() -> Result<()> {
    let server_url = spawn_canned_server(snapshot("In Transit", false)).await?;
    let source = HttpTrackingSource::new(format!("{server_url}/"));
    assert_eq!(source.server_url(), server_url);

    let fetched = source
        .fetch(&TrackingCode::parse(KNOWN_CODE).expect("code"))
        .await?;
    assert_eq!(fetched.shipment.current_status, "In Transit");

    let missing = source
        .fetch(&TrackingCode::parse("SPD000000000").expect("code"))
        .await
        .expect_err("should be missing");
    assert_eq!(
        missing,
        TrackingError::NotFound("Tracking ID not found.".into())
    );
    Ok(())
}

#[tokio::test]
async fn http_source_subscription_decodes_change_notifications() -> Result<()> {
    let server_url = spawn_canned_server(snapshot("In Transit", false)).await?;
    let source = HttpTrackingSource::new(server_url);
    let code = TrackingCode::parse(KNOWN_CODE).expect("code");

    let mut changes = source.subscribe(&code).await?;
    let first = tokio::time::timeout(std::time::Duration::from_secs(5), changes.next())
        .await?
        .expect("one notification")?;
    assert!(first.concerns(&code));
    Ok(())
}

#[tokio::test]
async fn watch_over_http_reaches_ready_state() -> Result<()> {
    let server_url = spawn_canned_server(snapshot("Delivered", false)).await?;
    let source: Arc<dyn TrackingSource> = Arc::new(HttpTrackingSource::new(server_url));
    let mut watch = watch_shipment(source, TrackingCode::parse(KNOWN_CODE).expect("code"));

    let view = loop {
        let state = tokio::time::timeout(std::time::Duration::from_secs(5), watch.changed())
            .await?
            .expect("watch running");
        if let TrackingState::Ready(view) = state {
            break view;
        }
    };
    assert_eq!(view.progress.percent, 100.0);
    watch.close();
    Ok(())
}
