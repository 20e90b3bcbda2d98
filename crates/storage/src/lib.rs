use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{EventId, MediaId, MediaKind, ShipmentId, TrackingCode},
    protocol::{
        MediaRef, NewShipmentRequest, PublicShipment, PublicShipmentEvent, ShipmentEventRecord,
        ShipmentRecord,
    },
    status::{
        CREATED_NOTE, CUSTOMS_CLEARED_NOTE, CUSTOMS_CLEARED_STATUS, CUSTOMS_HOLD_NOTE,
        CUSTOMS_HOLD_STATUS,
    },
};

const SHIPMENT_COLUMNS: &str = "id, tracking_code, sender_name, sender_address, sender_country, sender_email,
     receiver_name, receiver_address, receiver_country, receiver_email, origin, destination,
     package_description, package_value, currency, weight_kg, shipping_fee, days_of_package,
     current_status, is_customs_held, eta, last_scan_at, lat, lng, media_url, media_kind,
     created_at, updated_at";

const EVENT_COLUMNS: &str =
    "id, shipment_id, status, note, location, lat, lng, occurred_at, created_at";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// A row to append to `shipment_events`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub status: String,
    pub note: Option<String>,
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

impl NewEvent {
    pub fn new(status: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            status: status.into(),
            note: None,
            location: None,
            lat: None,
            lng: None,
            occurred_at,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub shipment: ShipmentRecord,
    pub event_id: EventId,
}

#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub media_id: MediaId,
    pub shipment_id: ShipmentId,
    pub kind: MediaKind,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewMedia<'a> {
    pub kind: MediaKind,
    pub mime_type: Option<&'a str>,
    pub filename: Option<&'a str>,
    pub bytes: &'a [u8],
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `sqlite::memory:` opens its own database, so the
        // in-memory pool is pinned to one connection that never expires.
        let pool_options = if database_url.starts_with("sqlite::memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn tracking_code_exists(&self, code: &TrackingCode) -> Result<bool> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM shipments WHERE tracking_code = ?)")
                .bind(code.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }

    /// Inserts the shipment and its initial `Created` event in one
    /// transaction. Returns `None` when the tracking code is already taken.
    pub async fn create_shipment(
        &self,
        code: &TrackingCode,
        request: &NewShipmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<ShipmentRecord>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO shipments (
                tracking_code, sender_name, sender_address, sender_country, sender_email,
                receiver_name, receiver_address, receiver_country, receiver_email,
                origin, destination, package_description, package_value, currency,
                weight_kg, shipping_fee, days_of_package, current_status, is_customs_held,
                eta, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'Created', 0, ?, ?, ?)
             ON CONFLICT(tracking_code) DO NOTHING
             RETURNING id",
        )
        .bind(code.as_str())
        .bind(&request.sender_name)
        .bind(&request.sender_address)
        .bind(&request.sender_country)
        .bind(request.sender_email.as_deref())
        .bind(&request.receiver_name)
        .bind(&request.receiver_address)
        .bind(&request.receiver_country)
        .bind(request.receiver_email.as_deref())
        .bind(&request.origin)
        .bind(&request.destination)
        .bind(&request.package_description)
        .bind(request.package_value)
        .bind(&request.currency)
        .bind(request.weight_kg)
        .bind(request.shipping_fee)
        .bind(request.days_of_package)
        .bind(request.eta)
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let shipment_id = ShipmentId(row.get::<i64, _>(0));

        let initial = NewEvent::new("Created", now)
            .with_note(CREATED_NOTE)
            .with_location(request.origin.clone());
        insert_event(&mut tx, shipment_id, &initial, now).await?;
        tx.commit().await?;

        self.load_shipment_by_id(shipment_id).await
    }

    pub async fn load_shipment_by_id(&self, shipment_id: ShipmentId) -> Result<Option<ShipmentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE id = ?"
        ))
        .bind(shipment_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| shipment_from_row(&r)).transpose()
    }

    pub async fn load_shipment_by_tracking_code(
        &self,
        code: &TrackingCode,
    ) -> Result<Option<ShipmentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE tracking_code = ?"
        ))
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| shipment_from_row(&r)).transpose()
    }

    /// Anonymous lookup. Only the public column subset leaves this function.
    pub async fn load_public_shipment(&self, code: &TrackingCode) -> Result<Option<PublicShipment>> {
        Ok(self
            .load_shipment_by_tracking_code(code)
            .await?
            .map(PublicShipment::from))
    }

    pub async fn list_shipments(&self) -> Result<Vec<ShipmentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(shipment_from_row).collect()
    }

    pub async fn list_events_for_shipment(
        &self,
        shipment_id: ShipmentId,
    ) -> Result<Vec<ShipmentEventRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM shipment_events
             WHERE shipment_id = ?
             ORDER BY occurred_at DESC, id DESC"
        ))
        .bind(shipment_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    pub async fn list_public_events(&self, code: &TrackingCode) -> Result<Vec<PublicShipmentEvent>> {
        let rows = sqlx::query(
            "SELECT e.id, e.shipment_id, e.status, e.note, e.location, e.lat, e.lng, e.occurred_at, e.created_at
             FROM shipment_events e
             INNER JOIN shipments s ON s.id = e.shipment_id
             WHERE s.tracking_code = ?
             ORDER BY e.occurred_at DESC, e.id DESC",
        )
        .bind(code.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| event_from_row(r).map(PublicShipmentEvent::from))
            .collect()
    }

    /// Sets the current status, stamps `last_scan_at` and appends the event,
    /// all in one transaction. Coordinates on the event also move the
    /// shipment's current position.
    pub async fn update_status(
        &self,
        shipment_id: ShipmentId,
        event: &NewEvent,
    ) -> Result<Option<StatusChange>> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE shipments
             SET current_status = ?, last_scan_at = ?,
                 lat = COALESCE(?, lat), lng = COALESCE(?, lng), updated_at = ?
             WHERE id = ?",
        )
        .bind(&event.status)
        .bind(event.occurred_at)
        .bind(event.lat)
        .bind(event.lng)
        .bind(event.occurred_at)
        .bind(shipment_id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        let event_id = insert_event(&mut tx, shipment_id, event, event.occurred_at).await?;
        tx.commit().await?;

        let shipment = self
            .load_shipment_by_id(shipment_id)
            .await?
            .ok_or_else(|| anyhow!("shipment {} vanished after status update", shipment_id.0))?;
        Ok(Some(StatusChange { shipment, event_id }))
    }

    /// Flips the customs flag in a single statement and records a
    /// `Customs Hold` / `Customs Cleared` event for the new state.
    pub async fn toggle_customs_hold(
        &self,
        shipment_id: ShipmentId,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusChange>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE shipments
             SET is_customs_held = NOT is_customs_held, updated_at = ?
             WHERE id = ?
             RETURNING is_customs_held",
        )
        .bind(now)
        .bind(shipment_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let held = row.get::<bool, _>(0);
        let event = if held {
            NewEvent::new(CUSTOMS_HOLD_STATUS, now).with_note(CUSTOMS_HOLD_NOTE)
        } else {
            NewEvent::new(CUSTOMS_CLEARED_STATUS, now).with_note(CUSTOMS_CLEARED_NOTE)
        };
        let event_id = insert_event(&mut tx, shipment_id, &event, now).await?;
        tx.commit().await?;

        let shipment = self
            .load_shipment_by_id(shipment_id)
            .await?
            .ok_or_else(|| anyhow!("shipment {} vanished after customs toggle", shipment_id.0))?;
        Ok(Some(StatusChange { shipment, event_id }))
    }

    /// Stores the blob and points the shipment's media reference at
    /// `{public_base_url}/media/{id}`.
    pub async fn store_media(
        &self,
        shipment_id: ShipmentId,
        media: NewMedia<'_>,
        public_base_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ShipmentRecord>> {
        let mut tx = self.pool.begin().await?;
        let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM shipments WHERE id = ?)")
            .bind(shipment_id.0)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let size_bytes = i64::try_from(media.bytes.len()).unwrap_or(i64::MAX);
        let rec = sqlx::query(
            "INSERT INTO media_blobs (shipment_id, kind, mime_type, filename, size_bytes, bytes, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(shipment_id.0)
        .bind(media.kind.as_str())
        .bind(media.mime_type)
        .bind(media.filename)
        .bind(size_bytes)
        .bind(media.bytes)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let media_id = MediaId(rec.get::<i64, _>(0));

        let url = format!("{}/media/{}", public_base_url.trim_end_matches('/'), media_id.0);
        sqlx::query("UPDATE shipments SET media_url = ?, media_kind = ?, updated_at = ? WHERE id = ?")
            .bind(&url)
            .bind(media.kind.as_str())
            .bind(now)
            .bind(shipment_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.load_shipment_by_id(shipment_id).await
    }

    pub async fn load_media(&self, media_id: MediaId) -> Result<Option<StoredMedia>> {
        let row = sqlx::query(
            "SELECT id, shipment_id, kind, mime_type, filename, bytes FROM media_blobs WHERE id = ?",
        )
        .bind(media_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(StoredMedia {
                media_id: MediaId(r.try_get::<i64, _>("id")?),
                shipment_id: ShipmentId(r.try_get::<i64, _>("shipment_id")?),
                kind: parse_media_kind(&r.try_get::<String, _>("kind")?)?,
                mime_type: r.try_get::<Option<String>, _>("mime_type")?,
                filename: r.try_get::<Option<String>, _>("filename")?,
                bytes: r.try_get::<Vec<u8>, _>("bytes")?,
            })
        })
        .transpose()
    }

    pub async fn set_admin_credential(&self, username: &str, password: &str) -> Result<()> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let password_hash = hash_password(&salt, password);
        sqlx::query(
            "INSERT INTO admin_credentials (username, salt_b64, password_hash, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET
                salt_b64 = excluded.salt_b64,
                password_hash = excluded.password_hash,
                updated_at = excluded.updated_at",
        )
        .bind(username)
        .bind(STANDARD.encode(salt))
        .bind(password_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn verify_admin_credential(&self, username: &str, password: &str) -> Result<bool> {
        let row = sqlx::query("SELECT salt_b64, password_hash FROM admin_credentials WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let salt = STANDARD
            .decode(row.get::<String, _>(0))
            .context("stored admin salt is not valid base64")?;
        let expected = row.get::<String, _>(1);
        Ok(constant_time_eq(
            hash_password(&salt, password).as_bytes(),
            expected.as_bytes(),
        ))
    }

    pub async fn has_admin_credentials(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_credentials")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    shipment_id: ShipmentId,
    event: &NewEvent,
    created_at: DateTime<Utc>,
) -> Result<EventId> {
    let rec = sqlx::query(
        "INSERT INTO shipment_events (shipment_id, status, note, location, lat, lng, occurred_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(shipment_id.0)
    .bind(&event.status)
    .bind(event.note.as_deref())
    .bind(event.location.as_deref())
    .bind(event.lat)
    .bind(event.lng)
    .bind(event.occurred_at)
    .bind(created_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(EventId(rec.get::<i64, _>(0)))
}

fn shipment_from_row(r: &SqliteRow) -> Result<ShipmentRecord> {
    let tracking_code = r.try_get::<String, _>("tracking_code")?;
    let tracking_code = TrackingCode::parse(&tracking_code)
        .with_context(|| format!("stored tracking code '{tracking_code}' is malformed"))?;
    let media_url = r.try_get::<Option<String>, _>("media_url")?;
    let media_kind = r.try_get::<Option<String>, _>("media_kind")?;
    let media = match (media_url, media_kind) {
        (Some(url), Some(kind)) => Some(MediaRef {
            url,
            kind: parse_media_kind(&kind)?,
        }),
        _ => None,
    };

    Ok(ShipmentRecord {
        id: ShipmentId(r.try_get::<i64, _>("id")?),
        tracking_code,
        sender_name: r.try_get("sender_name")?,
        sender_address: r.try_get("sender_address")?,
        sender_country: r.try_get("sender_country")?,
        sender_email: r.try_get("sender_email")?,
        receiver_name: r.try_get("receiver_name")?,
        receiver_address: r.try_get("receiver_address")?,
        receiver_country: r.try_get("receiver_country")?,
        receiver_email: r.try_get("receiver_email")?,
        origin: r.try_get("origin")?,
        destination: r.try_get("destination")?,
        package_description: r.try_get("package_description")?,
        package_value: r.try_get("package_value")?,
        currency: r.try_get("currency")?,
        weight_kg: r.try_get("weight_kg")?,
        shipping_fee: r.try_get("shipping_fee")?,
        days_of_package: r.try_get("days_of_package")?,
        current_status: r.try_get("current_status")?,
        is_customs_held: r.try_get("is_customs_held")?,
        eta: r.try_get("eta")?,
        last_scan_at: r.try_get("last_scan_at")?,
        lat: r.try_get("lat")?,
        lng: r.try_get("lng")?,
        media,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn event_from_row(r: &SqliteRow) -> Result<ShipmentEventRecord> {
    Ok(ShipmentEventRecord {
        id: EventId(r.try_get::<i64, _>("id")?),
        shipment_id: ShipmentId(r.try_get::<i64, _>("shipment_id")?),
        status: r.try_get("status")?,
        note: r.try_get("note")?,
        location: r.try_get("location")?,
        lat: r.try_get("lat")?,
        lng: r.try_get("lng")?,
        occurred_at: r.try_get("occurred_at")?,
        created_at: r.try_get("created_at")?,
    })
}

fn parse_media_kind(raw: &str) -> Result<MediaKind> {
    raw.parse::<MediaKind>().map_err(|e| anyhow!(e))
}

fn hash_password(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
