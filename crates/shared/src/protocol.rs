use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EventId, MediaKind, ShipmentId, TrackingCode, DEFAULT_CURRENCY};

/// Full shipment row as seen by authenticated operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub id: ShipmentId,
    pub tracking_code: TrackingCode,
    pub sender_name: String,
    pub sender_address: String,
    pub sender_country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_email: Option<String>,
    pub receiver_name: String,
    pub receiver_address: String,
    pub receiver_country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_email: Option<String>,
    pub origin: String,
    pub destination: String,
    pub package_description: String,
    pub package_value: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_package: Option<i64>,
    pub current_status: String,
    pub is_customs_held: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

/// Column subset exposed to anonymous tracking lookups. Sender and receiver
/// identity, declared value and fees are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicShipment {
    pub id: ShipmentId,
    pub tracking_code: TrackingCode,
    pub origin: String,
    pub destination: String,
    pub package_description: String,
    pub current_status: String,
    pub is_customs_held: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ShipmentRecord> for PublicShipment {
    fn from(value: ShipmentRecord) -> Self {
        Self {
            id: value.id,
            tracking_code: value.tracking_code,
            origin: value.origin,
            destination: value.destination,
            package_description: value.package_description,
            current_status: value.current_status,
            is_customs_held: value.is_customs_held,
            eta: value.eta,
            last_scan_at: value.last_scan_at,
            lat: value.lat,
            lng: value.lng,
            media: value.media,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentEventRecord {
    pub id: EventId,
    pub shipment_id: ShipmentId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicShipmentEvent {
    pub id: EventId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

impl From<ShipmentEventRecord> for PublicShipmentEvent {
    fn from(value: ShipmentEventRecord) -> Self {
        Self {
            id: value.id,
            status: value.status,
            note: value.note,
            location: value.location,
            lat: value.lat,
            lng: value.lng,
            occurred_at: value.occurred_at,
        }
    }
}

/// What a public lookup returns: the shipment and its history, most recent
/// event first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub shipment: PublicShipment,
    pub events: Vec<PublicShipmentEvent>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShipmentRequest {
    pub sender_name: String,
    pub sender_address: String,
    pub sender_country: String,
    #[serde(default)]
    pub sender_email: Option<String>,
    pub receiver_name: String,
    pub receiver_address: String,
    pub receiver_country: String,
    #[serde(default)]
    pub receiver_email: Option<String>,
    pub origin: String,
    pub destination: String,
    pub package_description: String,
    pub package_value: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub shipping_fee: Option<f64>,
    #[serde(default)]
    pub days_of_package: Option<i64>,
    #[serde(default)]
    pub eta: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminLoginRequest {
    #[serde(default = "default_admin_username")]
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminLoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentStats {
    pub total: usize,
    pub delivered: usize,
    pub customs_held: usize,
}

impl ShipmentStats {
    pub fn tally<'a>(shipments: impl IntoIterator<Item = &'a ShipmentRecord>) -> Self {
        shipments
            .into_iter()
            .fold(Self::default(), |mut stats, shipment| {
                stats.total += 1;
                if shipment.current_status.to_lowercase().contains("delivered") {
                    stats.delivered += 1;
                }
                if shipment.is_customs_held {
                    stats.customs_held += 1;
                }
                stats
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowChange {
    Insert,
    Update,
}

/// Change notifications pushed to websocket subscribers. Both variants carry
/// the tracking code so subscribers can filter without a lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ShipmentChanged {
        shipment_id: ShipmentId,
        tracking_code: TrackingCode,
        change: RowChange,
    },
    ShipmentEventRecorded {
        shipment_id: ShipmentId,
        tracking_code: TrackingCode,
        event_id: EventId,
    },
}

impl ServerEvent {
    pub fn tracking_code(&self) -> &TrackingCode {
        match self {
            ServerEvent::ShipmentChanged { tracking_code, .. }
            | ServerEvent::ShipmentEventRecorded { tracking_code, .. } => tracking_code,
        }
    }

    pub fn concerns(&self, code: &TrackingCode) -> bool {
        self.tracking_code() == code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_change_notification_names_its_shipment() {
        let code = TrackingCode::parse("SPD123456789").expect("code");
        let other = TrackingCode::parse("SPD987654321").expect("code");
        let events = [
            ServerEvent::ShipmentChanged {
                shipment_id: ShipmentId(1),
                tracking_code: code.clone(),
                change: RowChange::Update,
            },
            ServerEvent::ShipmentEventRecorded {
                shipment_id: ShipmentId(1),
                tracking_code: code.clone(),
                event_id: EventId(4),
            },
        ];
        for event in &events {
            assert!(event.concerns(&code));
            assert!(!event.concerns(&other));
        }
    }

    #[test]
    fn feed_frames_without_a_shipment_are_not_accepted() {
        let frame = r#"{"type":"error","payload":{"code":"internal","message":"lagged"}}"#;
        assert!(serde_json::from_str::<ServerEvent>(frame).is_err());

        let frame = r#"{"type":"shipment_changed","payload":{"shipment_id":1,"tracking_code":"SPD123456789","change":"insert"}}"#;
        let event = serde_json::from_str::<ServerEvent>(frame).expect("decode");
        assert_eq!(event.tracking_code().as_str(), "SPD123456789");
    }
}
