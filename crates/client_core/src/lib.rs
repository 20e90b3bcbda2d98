use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use reqwest::{Client, StatusCode};
use shared::{
    domain::TrackingCode,
    error::ApiError,
    protocol::{ServerEvent, TrackingSnapshot},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};
use url::Url;

pub mod admin;
pub mod error;
pub mod watch;

pub use admin::{AdminClient, AdminSessionToken};
pub use error::{AdminError, TrackingError};
pub use watch::{watch_shipment, TrackingFailure, TrackingState, TrackingWatch};

/// Change notifications for one shipment, in arrival order. The stream ends
/// when the underlying subscription closes.
pub type ChangeStream = BoxStream<'static, Result<ServerEvent, TrackingError>>;

/// Where the tracking view reads from: a one-shot fetch plus a change feed.
#[async_trait]
pub trait TrackingSource: Send + Sync {
    async fn fetch(&self, code: &TrackingCode) -> Result<TrackingSnapshot, TrackingError>;

    async fn subscribe(&self, code: &TrackingCode) -> Result<ChangeStream, TrackingError>;
}

/// Source backed by the tracking server's public HTTP routes and its
/// websocket change feed.
#[derive(Debug, Clone)]
pub struct HttpTrackingSource {
    http: Client,
    server_url: String,
}

impl HttpTrackingSource {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[async_trait]
impl TrackingSource for HttpTrackingSource {
    async fn fetch(&self, code: &TrackingCode) -> Result<TrackingSnapshot, TrackingError> {
        let response = self
            .http
            .get(format!("{}/track/{}", self.server_url, code))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let message = response
                .json::<ApiError>()
                .await
                .map(|err| err.message)
                .unwrap_or_else(|_| format!("tracking code {code} not found"));
            return Err(TrackingError::NotFound(message));
        }

        let snapshot = response.error_for_status()?.json().await?;
        debug!(tracking_code = %code, "fetched tracking snapshot");
        Ok(snapshot)
    }

    async fn subscribe(&self, code: &TrackingCode) -> Result<ChangeStream, TrackingError> {
        let ws_url = websocket_url(&self.server_url, code)?;
        let (ws_stream, _) = connect_async(ws_url.as_str()).await.map_err(|e| {
            TrackingError::Subscription(format!("failed to connect websocket {ws_url}: {e}"))
        })?;
        info!(tracking_code = %code, "subscribed to shipment changes");

        let changes = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(
                    serde_json::from_str::<ServerEvent>(&text).map_err(|e| {
                        TrackingError::Subscription(format!("malformed change notification: {e}"))
                    }),
                ),
                Ok(_) => None,
                Err(e) => Some(Err(TrackingError::Subscription(e.to_string()))),
            }
        });
        Ok(changes.boxed())
    }
}

/// `http(s)://host/prefix` becomes `ws(s)://host/prefix/ws?tracking_code=...`.
pub fn websocket_url(server_url: &str, code: &TrackingCode) -> Result<Url, TrackingError> {
    let mut url = Url::parse(server_url).map_err(|e| {
        TrackingError::Subscription(format!("invalid server url '{server_url}': {e}"))
    })?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => {
            return Err(TrackingError::Subscription(
                "server_url must start with http:// or https://".into(),
            ))
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        TrackingError::Subscription(format!("cannot derive websocket url from '{server_url}'"))
    })?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("tracking_code", code.as_str());
    Ok(url)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
