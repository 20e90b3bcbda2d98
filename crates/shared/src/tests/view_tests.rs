use chrono::{Duration, TimeZone, Utc};

use super::*;
use crate::{
    domain::{EventId, ShipmentId, TrackingCode},
    status::{StepState, FALLBACK_DESCRIPTION},
};

fn shipment(status: &str, held: bool) -> PublicShipment {
    let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    PublicShipment {
        id: ShipmentId(1),
        tracking_code: TrackingCode::parse("SPD123456789").expect("code"),
        origin: "Lagos".into(),
        destination: "Toronto".into(),
        package_description: "Books".into(),
        current_status: status.into(),
        is_customs_held: held,
        eta: None,
        last_scan_at: None,
        lat: None,
        lng: None,
        media: None,
        created_at,
        updated_at: created_at,
    }
}

fn event(id: i64, status: &str, minutes: i64) -> PublicShipmentEvent {
    PublicShipmentEvent {
        id: EventId(id),
        status: status.into(),
        note: None,
        location: None,
        lat: None,
        lng: None,
        occurred_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes),
    }
}

#[test]
fn customs_hold_overlays_in_transit_progress() {
    let view = TrackingView::derive(TrackingSnapshot {
        shipment: shipment("In Transit", true),
        events: vec![],
    });
    assert_eq!(view.progress.current_index, Some(2));
    assert_eq!(view.progress.percent, 50.0);
    assert_eq!(view.customs_notice.as_deref(), Some(CUSTOMS_HOLD_NOTICE));
    assert_eq!(view.tone, StatusTone::InTransit);
}

#[test]
fn history_is_most_recent_first_but_progress_ignores_it() {
    let view = TrackingView::derive(TrackingSnapshot {
        shipment: shipment("in transit", false),
        events: vec![
            event(1, "Created", 0),
            event(3, "Delivered", 30),
            event(2, "Dispatched", 10),
        ],
    });
    let ordered: Vec<&str> = view.events.iter().map(|e| e.status.as_str()).collect();
    assert_eq!(ordered, vec!["Delivered", "Dispatched", "Created"]);
    assert_eq!(view.progress.current_index, Some(2));
    assert_eq!(view.latest_event().map(|e| e.id), Some(EventId(3)));
    assert!(view.customs_notice.is_none());
}

#[test]
fn simultaneous_events_order_by_newest_id() {
    let mut events = vec![event(4, "A", 5), event(9, "B", 5), event(1, "C", 0)];
    sort_for_display(&mut events);
    let ids: Vec<i64> = events.iter().map(|e| e.id.0).collect();
    assert_eq!(ids, vec![9, 4, 1]);
}

#[test]
fn unknown_status_renders_all_pending_with_fallback() {
    let view = TrackingView::derive(TrackingSnapshot {
        shipment: shipment("archived", false),
        events: vec![event(1, "Created", 0)],
    });
    assert!(view
        .progress
        .steps
        .iter()
        .all(|step| step.state == StepState::Pending));
    assert_eq!(view.progress.percent, 0.0);
    assert_eq!(view.progress.description, FALLBACK_DESCRIPTION);
    assert_eq!(view.share_path, "/track/SPD123456789");
}
