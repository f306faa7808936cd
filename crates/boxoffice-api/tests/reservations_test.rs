//! HTTP round trips for the reservation endpoints.

mod common;

use axum::http::StatusCode;
use chrono::Duration;

// --- create ---

#[tokio::test]
async fn test_create_returns_201_with_deadline_and_total() {
    // Arrange
    let app = common::TestApp::new().await;

    // Act
    let (status, json) = app
        .post_json(
            "/api/v1/reservations",
            Some("user-1"),
            &common::create_body(1000, 2),
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["totalAmount"], 2000);
    assert_eq!(json["expiresAt"], "2026-01-15T10:10:00Z");
    assert!(json["reservationId"].is_string());
}

#[tokio::test]
async fn test_create_without_user_returns_401() {
    let app = common::TestApp::new().await;

    let (status, json) = app
        .post_json("/api/v1/reservations", None, &common::create_body(1000, 2))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthenticated");
}

#[tokio::test]
async fn test_create_with_zero_quantity_returns_400() {
    let app = common::TestApp::new().await;

    let (status, json) = app
        .post_json(
            "/api/v1/reservations",
            Some("user-1"),
            &common::create_body(1000, 0),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn test_create_with_no_tickets_returns_400() {
    let app = common::TestApp::new().await;

    let (status, json) = app
        .post_json(
            "/api/v1/reservations",
            Some("user-1"),
            &serde_json::json!({ "eventId": "concert-7", "tickets": [] }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn test_create_with_out_of_range_amount_returns_400() {
    let mut app = common::TestApp::new().await;

    let (status, json) = app
        .post_json(
            "/api/v1/reservations",
            Some("user-1"),
            &common::create_body(i64::MAX / 2 + 1, 2),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
    assert_eq!(app.sync_projections().await, 0);
}

// --- confirm + queries ---

#[tokio::test]
async fn test_confirmed_reservation_is_listed_and_readable() {
    // Arrange
    let mut app = common::TestApp::new().await;
    let id = app.create_reservation("user-1", 1000, 2).await;
    app.sync_projections().await;
    let (status, listed) = app.get_json("/api/v1/reservations", Some("user-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, serde_json::json!([]));

    // Act
    app.clock.advance(Duration::minutes(3));
    let (confirm_status, _) = app
        .post_empty(&format!("/api/v1/reservations/{id}/confirm"), "user-1")
        .await;
    app.sync_projections().await;

    // Assert
    assert_eq!(confirm_status, StatusCode::NO_CONTENT);
    let (status, json) = app
        .get_json(&format!("/api/v1/reservations/{id}"), Some("user-1"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "CONFIRMED");
    assert_eq!(json["totalAmount"], 2000);
    assert_eq!(json["confirmedAt"], "2026-01-15T10:03:00Z");
    let (_, listed) = app.get_json("/api/v1/reservations", Some("user-1")).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], id.as_str());
}

#[tokio::test]
async fn test_confirm_twice_returns_409() {
    let app = common::TestApp::new().await;
    let id = app.create_reservation("user-1", 1000, 1).await;
    let uri = format!("/api/v1/reservations/{id}/confirm");
    app.post_empty(&uri, "user-1").await;

    let (status, json) = app.post_empty(&uri, "user-1").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "invalid_state");
}

#[tokio::test]
async fn test_confirm_after_deadline_returns_410() {
    // Arrange
    let mut app = common::TestApp::new().await;
    let id = app.create_reservation("user-1", 1000, 1).await;
    app.sync_projections().await;
    app.clock.advance(Duration::minutes(11));

    // Act
    let (status, json) = app
        .post_empty(&format!("/api/v1/reservations/{id}/confirm"), "user-1")
        .await;
    app.sync_projections().await;

    // Assert
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json["error"], "reservation_expired");
    let (status, _) = app
        .get_json(&format!("/api/v1/reservations/{id}"), Some("user-1"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_swept_reservation_disappears_and_cannot_be_confirmed() {
    // Arrange
    let mut app = common::TestApp::new().await;
    let id = app.create_reservation("user-1", 1000, 1).await;
    app.sync_projections().await;
    app.clock.advance(Duration::minutes(10) + Duration::seconds(1));

    // Act
    let expired = app.sweep().await;
    app.sync_projections().await;

    // Assert
    assert_eq!(expired, 1);
    let (status, _) = app
        .get_json(&format!("/api/v1/reservations/{id}"), Some("user-1"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .post_empty(&format!("/api/v1/reservations/{id}/confirm"), "user-1")
        .await;
    assert_eq!(status, StatusCode::GONE);
}

// --- ownership + lookups ---

#[tokio::test]
async fn test_other_user_gets_403() {
    let mut app = common::TestApp::new().await;
    let id = app.create_reservation("user-1", 1000, 1).await;
    app.sync_projections().await;

    let (read_status, json) = app
        .get_json(&format!("/api/v1/reservations/{id}"), Some("user-2"))
        .await;
    let (confirm_status, _) = app
        .post_empty(&format!("/api/v1/reservations/{id}/confirm"), "user-2")
        .await;

    assert_eq!(read_status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "forbidden");
    assert_eq!(confirm_status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_reservation_returns_404() {
    let app = common::TestApp::new().await;
    let id = uuid::Uuid::new_v4();

    let (read_status, json) = app
        .get_json(&format!("/api/v1/reservations/{id}"), Some("user-1"))
        .await;
    let (confirm_status, _) = app
        .post_empty(&format!("/api/v1/reservations/{id}/confirm"), "user-1")
        .await;

    assert_eq!(read_status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "reservation_not_found");
    assert_eq!(confirm_status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_id_is_rejected() {
    let app = common::TestApp::new().await;

    let (status, _) = app
        .get_json("/api/v1/reservations/not-a-uuid", Some("user-1"))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
