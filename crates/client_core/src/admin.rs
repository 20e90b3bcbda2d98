use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{MediaKind, ShipmentId},
    error::{ApiError, ErrorCode},
    protocol::{
        AdminLoginRequest, AdminLoginResponse, NewShipmentRequest, ShipmentRecord, ShipmentStats,
        UpdateStatusRequest,
    },
};
use tracing::info;

use crate::error::AdminError;

/// Bearer token from a successful operator login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSessionToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AdminSessionToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Operator client. It only exists with a session token in hand, so every
/// call is made on behalf of an authenticated operator.
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: Client,
    server_url: String,
    session: AdminSessionToken,
}

impl AdminClient {
    pub async fn login(
        server_url: impl Into<String>,
        username: &str,
        password: &str,
    ) -> Result<Self, AdminError> {
        let http = Client::new();
        let server_url = server_url.into().trim_end_matches('/').to_string();
        let response = http
            .post(format!("{server_url}/admin/login"))
            .json(&AdminLoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let login: AdminLoginResponse = decode(response).await?;
        info!(username, expires_at = %login.expires_at, "admin session opened");

        Ok(Self {
            http,
            server_url,
            session: AdminSessionToken {
                token: login.token,
                expires_at: login.expires_at,
            },
        })
    }

    pub fn with_session(server_url: impl Into<String>, session: AdminSessionToken) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &AdminSessionToken {
        &self.session
    }

    pub async fn list_shipments(&self) -> Result<Vec<ShipmentRecord>, AdminError> {
        self.send(self.http.get(self.url("/admin/shipments"))).await
    }

    pub async fn stats(&self) -> Result<ShipmentStats, AdminError> {
        self.send(self.http.get(self.url("/admin/stats"))).await
    }

    pub async fn create_shipment(
        &self,
        req: &NewShipmentRequest,
    ) -> Result<ShipmentRecord, AdminError> {
        self.send(self.http.post(self.url("/admin/shipments")).json(req))
            .await
    }

    pub async fn update_status(
        &self,
        shipment_id: ShipmentId,
        req: &UpdateStatusRequest,
    ) -> Result<ShipmentRecord, AdminError> {
        let path = format!("/admin/shipments/{}/status", shipment_id.0);
        self.send(self.http.post(self.url(&path)).json(req)).await
    }

    pub async fn toggle_customs_hold(
        &self,
        shipment_id: ShipmentId,
    ) -> Result<ShipmentRecord, AdminError> {
        let path = format!("/admin/shipments/{}/customs-hold", shipment_id.0);
        self.send(self.http.post(self.url(&path))).await
    }

    pub async fn upload_media(
        &self,
        shipment_id: ShipmentId,
        kind: MediaKind,
        filename: Option<&str>,
        mime_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<ShipmentRecord, AdminError> {
        let path = format!("/admin/shipments/{}/media", shipment_id.0);
        let mut query = vec![("kind", kind.as_str())];
        if let Some(filename) = filename {
            query.push(("filename", filename));
        }
        let mut request = self.http.post(self.url(&path)).query(&query).body(bytes);
        if let Some(mime_type) = mime_type {
            request = request.header(reqwest::header::CONTENT_TYPE, mime_type);
        }
        self.send(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AdminError> {
        let response = request.bearer_auth(&self.session.token).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, AdminError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let error = match response.json::<ApiError>().await {
        Ok(error) => error,
        Err(_) => ApiError::new(
            ErrorCode::Internal,
            status
                .canonical_reason()
                .unwrap_or("unexpected response")
                .to_string(),
        ),
    };
    Err(AdminError::Rejected {
        status: status.as_u16(),
        error,
    })
}

#[cfg(test)]
#[path = "tests/admin_tests.rs"]
mod tests;
