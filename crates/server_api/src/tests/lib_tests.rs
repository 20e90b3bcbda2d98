use super::*;
use shared::status::{CUSTOMS_HOLD_NOTICE, FALLBACK_DESCRIPTION};

async fn setup() -> (ApiContext, AdminSession) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .set_admin_credential("admin", "hunter2")
        .await
        .expect("credential");
    let ctx = ApiContext {
        storage,
        sessions: SessionConfig {
            secret: "test-secret".into(),
            ttl_seconds: 600,
        },
        public_base_url: "http://localhost:8080".into(),
    };
    let (_, session) = login(
        &ctx,
        &AdminLoginRequest {
            username: "admin".into(),
            password: "hunter2".into(),
        },
    )
    .await
    .expect("login");
    (ctx, session)
}

fn new_shipment() -> NewShipmentRequest {
    NewShipmentRequest {
        sender_name: " Ada Sender ".into(),
        sender_address: "1 Dock Road".into(),
        sender_country: "NG".into(),
        sender_email: Some("   ".into()),
        receiver_name: "Ben Receiver".into(),
        receiver_address: "9 King St".into(),
        receiver_country: "CA".into(),
        receiver_email: None,
        origin: "Lagos".into(),
        destination: "Toronto".into(),
        package_description: "Books".into(),
        package_value: 80.0,
        currency: "eur".into(),
        weight_kg: Some(1.5),
        shipping_fee: Some(12.0),
        days_of_package: Some(3),
        eta: None,
    }
}

fn status(label: &str) -> UpdateStatusRequest {
    UpdateStatusRequest {
        status: label.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let (ctx, _) = setup().await;
    let err = login(
        &ctx,
        &AdminLoginRequest {
            username: "admin".into(),
            password: "nope".into(),
        },
    )
    .await
    .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn login_token_authenticates_later_requests() {
    let (ctx, _) = setup().await;
    let (response, session) = login(
        &ctx,
        &AdminLoginRequest {
            username: "admin".into(),
            password: "hunter2".into(),
        },
    )
    .await
    .expect("login");
    let verified = authenticate(&ctx, &response.token).expect("verify");
    assert_eq!(verified.session_id, session.session_id);
    assert!(authenticate(&ctx, "garbage").is_err());
}

#[tokio::test]
async fn created_shipment_is_trackable_by_generated_code() {
    let (ctx, session) = setup().await;
    let created = create_shipment(&ctx, &session, new_shipment())
        .await
        .expect("create");
    assert_eq!(created.shipment.current_status, "Created");
    assert_eq!(created.shipment.sender_name, "Ada Sender");
    assert_eq!(created.shipment.sender_email, None);
    assert_eq!(created.shipment.currency, "EUR");
    assert!(created.shipment.eta.is_some());
    assert!(matches!(
        created.events.as_slice(),
        [ServerEvent::ShipmentChanged {
            change: RowChange::Insert,
            ..
        }]
    ));

    let snapshot = track_shipment(&ctx, created.shipment.tracking_code.as_str())
        .await
        .expect("track");
    assert_eq!(snapshot.shipment.tracking_code, created.shipment.tracking_code);
    assert_eq!(snapshot.shipment.current_status, "Created");
    assert_eq!(snapshot.events.len(), 1);
}

#[tokio::test]
async fn lookup_of_unknown_or_malformed_code_is_not_found() {
    let (ctx, _) = setup().await;
    for raw in ["SPD000000000", "not-a-code", ""] {
        let err = track_shipment(&ctx, raw).await.expect_err("should fail");
        assert_eq!(err.code, ErrorCode::NotFound, "code {raw:?}");
    }
}

#[tokio::test]
async fn missing_required_field_is_rejected_server_side() {
    let (ctx, session) = setup().await;
    let mut req = new_shipment();
    req.receiver_name = "  ".into();
    let err = create_shipment(&ctx, &session, req)
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(ctx.storage.list_shipments().await.expect("list").is_empty());
}

#[tokio::test]
async fn unsupported_currency_is_rejected() {
    let (ctx, session) = setup().await;
    let mut req = new_shipment();
    req.currency = "XYZ".into();
    let err = create_shipment(&ctx, &session, req)
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn out_of_range_transit_days_are_rejected_not_panicking() {
    let (ctx, session) = setup().await;
    for days in [-1, MAX_DAYS_OF_PACKAGE + 1, 1_000_000_000, i64::MAX] {
        let mut req = new_shipment();
        req.days_of_package = Some(days);
        let err = create_shipment(&ctx, &session, req)
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation, "days = {days}");
    }

    let mut req = new_shipment();
    req.days_of_package = Some(MAX_DAYS_OF_PACKAGE);
    let created = create_shipment(&ctx, &session, req)
        .await
        .expect("upper bound accepted");
    assert!(created.shipment.eta.is_some());
}

#[tokio::test]
async fn colliding_codes_are_retried_until_a_free_one_is_found() {
    let (ctx, session) = setup().await;
    let taken = TrackingCode::parse("SPD111111111").expect("code");
    let fresh = TrackingCode::parse("SPD222222222").expect("code");
    create_shipment_with(&ctx, &session, new_shipment(), || taken.clone())
        .await
        .expect("first create");

    let mut candidates = vec![fresh.clone(), taken.clone(), taken.clone()];
    let created = create_shipment_with(&ctx, &session, new_shipment(), move || {
        candidates.pop().expect("candidate")
    })
    .await
    .expect("second create");
    assert_eq!(created.shipment.tracking_code, fresh);
}

#[tokio::test]
async fn exhausted_code_attempts_surface_conflict() {
    let (ctx, session) = setup().await;
    let taken = TrackingCode::parse("SPD333333333").expect("code");
    create_shipment_with(&ctx, &session, new_shipment(), || taken.clone())
        .await
        .expect("first create");

    let err = create_shipment_with(&ctx, &session, new_shipment(), || taken.clone())
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Conflict);
    assert_eq!(ctx.storage.list_shipments().await.expect("list").len(), 1);
}

#[tokio::test]
async fn status_progression_drives_view_but_not_event_replay() {
    let (ctx, session) = setup().await;
    let created = create_shipment(&ctx, &session, new_shipment())
        .await
        .expect("create");
    let id = created.shipment.id;
    for label in ["Dispatched", "in transit"] {
        update_status(&ctx, &session, id, status(label))
            .await
            .expect("update");
    }

    let view = tracking_view(&ctx, created.shipment.tracking_code.as_str())
        .await
        .expect("view");
    assert_eq!(view.progress.current_index, Some(2));
    assert_eq!(view.progress.percent, 50.0);
    assert_eq!(view.events.len(), 3);
    assert_eq!(view.events[0].status, "in transit");
    assert_eq!(
        view.events[0].note.as_deref(),
        Some("Status updated to in transit")
    );
}

#[tokio::test]
async fn unknown_status_degrades_to_fallback_view() {
    let (ctx, session) = setup().await;
    let created = create_shipment(&ctx, &session, new_shipment())
        .await
        .expect("create");
    update_status(&ctx, &session, created.shipment.id, status("archived"))
        .await
        .expect("update");

    let view = tracking_view(&ctx, created.shipment.tracking_code.as_str())
        .await
        .expect("view");
    assert_eq!(view.progress.current_index, None);
    assert_eq!(view.progress.percent, 0.0);
    assert_eq!(view.progress.description, FALLBACK_DESCRIPTION);
}

#[tokio::test]
async fn customs_hold_keeps_milestone_progress() {
    let (ctx, session) = setup().await;
    let created = create_shipment(&ctx, &session, new_shipment())
        .await
        .expect("create");
    let id = created.shipment.id;
    update_status(&ctx, &session, id, status("In Transit"))
        .await
        .expect("update");
    let held = toggle_customs_hold(&ctx, &session, id)
        .await
        .expect("toggle");
    assert!(held.shipment.is_customs_held);
    assert_eq!(held.events.len(), 2);

    let view = tracking_view(&ctx, created.shipment.tracking_code.as_str())
        .await
        .expect("view");
    assert_eq!(view.progress.current_index, Some(2));
    assert_eq!(view.customs_notice.as_deref(), Some(CUSTOMS_HOLD_NOTICE));
    assert_eq!(view.shipment.current_status, "In Transit");
}

#[tokio::test]
async fn half_given_coordinates_are_rejected() {
    let (ctx, session) = setup().await;
    let created = create_shipment(&ctx, &session, new_shipment())
        .await
        .expect("create");
    let req = UpdateStatusRequest {
        status: "Processing".into(),
        lat: Some(10.0),
        ..Default::default()
    };
    let err = update_status(&ctx, &session, created.shipment.id, req)
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn writes_to_missing_shipment_are_not_found() {
    let (ctx, session) = setup().await;
    let err = update_status(&ctx, &session, ShipmentId(99), status("Delivered"))
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::NotFound);
    let err = toggle_customs_hold(&ctx, &session, ShipmentId(99))
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn media_kind_must_match_mime_type() {
    let (ctx, session) = setup().await;
    let created = create_shipment(&ctx, &session, new_shipment())
        .await
        .expect("create");
    let err = attach_media(
        &ctx,
        &session,
        created.shipment.id,
        MediaUpload {
            kind: MediaKind::Video,
            mime_type: Some("image/png"),
            filename: None,
            bytes: b"data",
        },
    )
    .await
    .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);

    let written = attach_media(
        &ctx,
        &session,
        created.shipment.id,
        MediaUpload {
            kind: MediaKind::Video,
            mime_type: Some("video/mp4"),
            filename: Some("clip.mp4"),
            bytes: b"data",
        },
    )
    .await
    .expect("attach");
    let media = written.shipment.media.expect("media");
    assert_eq!(media.kind, MediaKind::Video);
}

#[tokio::test]
async fn stats_count_delivered_and_held() {
    let (ctx, session) = setup().await;
    let a = create_shipment(&ctx, &session, new_shipment())
        .await
        .expect("create");
    let b = create_shipment(&ctx, &session, new_shipment())
        .await
        .expect("create");
    update_status(&ctx, &session, a.shipment.id, status("Delivered to recipient"))
        .await
        .expect("update");
    toggle_customs_hold(&ctx, &session, b.shipment.id)
        .await
        .expect("toggle");

    let stats = shipment_stats(&ctx, &session).await.expect("stats");
    assert_eq!(
        stats,
        ShipmentStats {
            total: 2,
            delivered: 1,
            customs_held: 1,
        }
    );
}
