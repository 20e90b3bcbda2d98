use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{is_supported_currency, MediaId, MediaKind, ShipmentId, TrackingCode},
    error::{ApiError, ErrorCode},
    protocol::{
        AdminLoginRequest, AdminLoginResponse, NewShipmentRequest, RowChange, ServerEvent,
        ShipmentRecord, ShipmentStats, TrackingSnapshot, UpdateStatusRequest,
    },
    view::{sort_for_display, TrackingView},
};
use storage::{NewEvent, NewMedia, StatusChange, Storage, StoredMedia};
use tracing::{info, warn};

pub mod session;
pub mod tracking_code;

pub use session::{AdminSession, SessionConfig};
use tracking_code::{generate_tracking_code, MAX_TRACKING_CODE_ATTEMPTS};

/// Upper bound for `days_of_package`; ten years of transit.
pub const MAX_DAYS_OF_PACKAGE: i64 = 3650;

const NOT_FOUND_MESSAGE: &str =
    "Tracking ID not found. Please check your tracking number and try again.";

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub sessions: SessionConfig,
    /// Base used to build publicly resolvable media URLs.
    pub public_base_url: String,
}

/// Result of an admin write: the row as it now stands plus the change
/// notifications to fan out.
#[derive(Debug, Clone)]
pub struct AdminWrite {
    pub shipment: ShipmentRecord,
    pub events: Vec<ServerEvent>,
}

pub async fn login(
    ctx: &ApiContext,
    req: &AdminLoginRequest,
) -> Result<(AdminLoginResponse, AdminSession), ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }
    let verified = ctx
        .storage
        .verify_admin_credential(username, &req.password)
        .await
        .map_err(internal)?;
    if !verified {
        warn!(username, "admin login rejected");
        return Err(ApiError::unauthorized("invalid credentials"));
    }

    let (token, session) = session::mint_session(&ctx.sessions, username)
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("session mint failed: {e}")))?;
    info!(username, session_id = %session.session_id, "admin session opened");
    Ok((
        AdminLoginResponse {
            token,
            expires_at: session.expires_at,
        },
        session,
    ))
}

pub fn authenticate(ctx: &ApiContext, token: &str) -> Result<AdminSession, ApiError> {
    session::verify_session(&ctx.sessions, token)
}

/// Anonymous lookup by tracking code. Malformed codes can never match a row
/// and are reported the same way as unknown ones.
pub async fn track_shipment(ctx: &ApiContext, raw_code: &str) -> Result<TrackingSnapshot, ApiError> {
    let code = TrackingCode::parse(raw_code).map_err(|_| ApiError::not_found(NOT_FOUND_MESSAGE))?;
    let shipment = ctx
        .storage
        .load_public_shipment(&code)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND_MESSAGE))?;
    let mut events = ctx
        .storage
        .list_public_events(&code)
        .await
        .map_err(internal)?;
    sort_for_display(&mut events);
    Ok(TrackingSnapshot { shipment, events })
}

pub async fn tracking_view(ctx: &ApiContext, raw_code: &str) -> Result<TrackingView, ApiError> {
    track_shipment(ctx, raw_code).await.map(TrackingView::derive)
}

pub async fn list_shipments(
    ctx: &ApiContext,
    _session: &AdminSession,
) -> Result<Vec<ShipmentRecord>, ApiError> {
    ctx.storage.list_shipments().await.map_err(internal)
}

pub async fn shipment_stats(
    ctx: &ApiContext,
    session: &AdminSession,
) -> Result<ShipmentStats, ApiError> {
    let shipments = list_shipments(ctx, session).await?;
    Ok(ShipmentStats::tally(&shipments))
}

pub async fn create_shipment(
    ctx: &ApiContext,
    session: &AdminSession,
    req: NewShipmentRequest,
) -> Result<AdminWrite, ApiError> {
    create_shipment_with(ctx, session, req, generate_tracking_code).await
}

async fn create_shipment_with(
    ctx: &ApiContext,
    session: &AdminSession,
    req: NewShipmentRequest,
    mut next_code: impl FnMut() -> TrackingCode,
) -> Result<AdminWrite, ApiError> {
    let now = Utc::now();
    let req = validate_new_shipment(req, now)?;

    for attempt in 1..=MAX_TRACKING_CODE_ATTEMPTS {
        let code = next_code();
        if ctx
            .storage
            .tracking_code_exists(&code)
            .await
            .map_err(internal)?
        {
            warn!(tracking_code = %code, attempt, "generated tracking code already in use");
            continue;
        }
        // The existence check can race with another insert; the UNIQUE
        // constraint reports that as `None`.
        let Some(shipment) = ctx
            .storage
            .create_shipment(&code, &req, now)
            .await
            .map_err(internal)?
        else {
            warn!(tracking_code = %code, attempt, "tracking code taken during insert");
            continue;
        };

        info!(
            admin = %session.username,
            tracking_code = %shipment.tracking_code,
            shipment_id = shipment.id.0,
            "shipment created"
        );
        let events = vec![ServerEvent::ShipmentChanged {
            shipment_id: shipment.id,
            tracking_code: shipment.tracking_code.clone(),
            change: RowChange::Insert,
        }];
        return Ok(AdminWrite { shipment, events });
    }

    Err(ApiError::new(
        ErrorCode::Conflict,
        format!("could not allocate a unique tracking code after {MAX_TRACKING_CODE_ATTEMPTS} attempts"),
    ))
}

pub async fn update_status(
    ctx: &ApiContext,
    session: &AdminSession,
    shipment_id: ShipmentId,
    req: UpdateStatusRequest,
) -> Result<AdminWrite, ApiError> {
    let event = validate_status_update(req, Utc::now())?;
    let change = ctx
        .storage
        .update_status(shipment_id, &event)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("shipment not found"))?;
    info!(
        admin = %session.username,
        tracking_code = %change.shipment.tracking_code,
        status = %change.shipment.current_status,
        "shipment status updated"
    );
    Ok(write_with_event(change))
}

pub async fn toggle_customs_hold(
    ctx: &ApiContext,
    session: &AdminSession,
    shipment_id: ShipmentId,
) -> Result<AdminWrite, ApiError> {
    let change = ctx
        .storage
        .toggle_customs_hold(shipment_id, Utc::now())
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("shipment not found"))?;
    info!(
        admin = %session.username,
        tracking_code = %change.shipment.tracking_code,
        held = change.shipment.is_customs_held,
        "customs hold toggled"
    );
    Ok(write_with_event(change))
}

pub struct MediaUpload<'a> {
    pub kind: MediaKind,
    pub mime_type: Option<&'a str>,
    pub filename: Option<&'a str>,
    pub bytes: &'a [u8],
}

pub async fn attach_media(
    ctx: &ApiContext,
    session: &AdminSession,
    shipment_id: ShipmentId,
    upload: MediaUpload<'_>,
) -> Result<AdminWrite, ApiError> {
    if upload.bytes.is_empty() {
        return Err(ApiError::validation("media body cannot be empty"));
    }
    let mime_type = upload.mime_type.map(str::trim).filter(|m| !m.is_empty());
    if let Some(mime) = mime_type {
        let expected_prefix = format!("{}/", upload.kind.as_str());
        if !mime.starts_with(&expected_prefix) {
            return Err(ApiError::validation(format!(
                "mime type '{mime}' does not match media kind '{}'",
                upload.kind.as_str()
            )));
        }
    }

    let shipment = ctx
        .storage
        .store_media(
            shipment_id,
            NewMedia {
                kind: upload.kind,
                mime_type,
                filename: upload.filename.map(str::trim).filter(|f| !f.is_empty()),
                bytes: upload.bytes,
            },
            &ctx.public_base_url,
            Utc::now(),
        )
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("shipment not found"))?;
    info!(
        admin = %session.username,
        tracking_code = %shipment.tracking_code,
        size_bytes = upload.bytes.len(),
        "shipment media attached"
    );
    let events = vec![ServerEvent::ShipmentChanged {
        shipment_id: shipment.id,
        tracking_code: shipment.tracking_code.clone(),
        change: RowChange::Update,
    }];
    Ok(AdminWrite { shipment, events })
}

pub async fn load_media(ctx: &ApiContext, media_id: MediaId) -> Result<StoredMedia, ApiError> {
    ctx.storage
        .load_media(media_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("media not found"))
}

fn write_with_event(change: StatusChange) -> AdminWrite {
    let StatusChange { shipment, event_id } = change;
    let events = vec![
        ServerEvent::ShipmentChanged {
            shipment_id: shipment.id,
            tracking_code: shipment.tracking_code.clone(),
            change: RowChange::Update,
        },
        ServerEvent::ShipmentEventRecorded {
            shipment_id: shipment.id,
            tracking_code: shipment.tracking_code.clone(),
            event_id,
        },
    ];
    AdminWrite { shipment, events }
}

fn required(field: &str, value: String) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn validate_new_shipment(
    req: NewShipmentRequest,
    now: DateTime<Utc>,
) -> Result<NewShipmentRequest, ApiError> {
    if !req.package_value.is_finite() || req.package_value < 0.0 {
        return Err(ApiError::validation("package_value must be a non-negative number"));
    }
    let currency = req.currency.trim().to_ascii_uppercase();
    if !is_supported_currency(&currency) {
        return Err(ApiError::validation(format!("unsupported currency '{currency}'")));
    }
    if let Some(weight) = req.weight_kg {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(ApiError::validation("weight_kg must be positive"));
        }
    }
    if let Some(fee) = req.shipping_fee {
        if !fee.is_finite() || fee < 0.0 {
            return Err(ApiError::validation("shipping_fee must be non-negative"));
        }
    }
    let eta = match (req.eta, req.days_of_package) {
        (_, Some(days)) if !(0..=MAX_DAYS_OF_PACKAGE).contains(&days) => {
            return Err(ApiError::validation(format!(
                "days_of_package must be between 0 and {MAX_DAYS_OF_PACKAGE}"
            )));
        }
        (Some(eta), _) => Some(eta),
        (None, Some(days)) => Some(
            Duration::try_days(days)
                .and_then(|offset| now.checked_add_signed(offset))
                .ok_or_else(|| ApiError::validation("days_of_package is out of range"))?,
        ),
        (None, None) => None,
    };

    Ok(NewShipmentRequest {
        sender_name: required("sender_name", req.sender_name)?,
        sender_address: required("sender_address", req.sender_address)?,
        sender_country: required("sender_country", req.sender_country)?,
        sender_email: optional(req.sender_email),
        receiver_name: required("receiver_name", req.receiver_name)?,
        receiver_address: required("receiver_address", req.receiver_address)?,
        receiver_country: required("receiver_country", req.receiver_country)?,
        receiver_email: optional(req.receiver_email),
        origin: required("origin", req.origin)?,
        destination: required("destination", req.destination)?,
        package_description: required("package_description", req.package_description)?,
        package_value: req.package_value,
        currency,
        weight_kg: req.weight_kg,
        shipping_fee: req.shipping_fee,
        days_of_package: req.days_of_package,
        eta,
    })
}

pub fn validate_status_update(
    req: UpdateStatusRequest,
    now: DateTime<Utc>,
) -> Result<NewEvent, ApiError> {
    let status = required("status", req.status)?;
    match (req.lat, req.lng) {
        (Some(lat), Some(lng)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(ApiError::validation("coordinates are out of range"));
            }
        }
        (None, None) => {}
        _ => return Err(ApiError::validation("lat and lng must be given together")),
    }
    let note = optional(req.note).unwrap_or_else(|| format!("Status updated to {status}"));

    Ok(NewEvent {
        status,
        note: Some(note),
        location: optional(req.location),
        lat: req.lat,
        lng: req.lng,
        occurred_at: now,
    })
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
