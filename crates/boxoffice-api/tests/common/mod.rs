//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use boxoffice_api::routes::reservations::USER_ID_HEADER;
use boxoffice_api::state::AppState;
use boxoffice_booking::application::expiration_sweeper::ExpirationSweeper;
use boxoffice_booking::application::projection_consumer::{PROJECTION_QUEUE, ProjectionConsumer};
use boxoffice_booking::domain::events::{BOOKING_EVENTS_EXCHANGE, RESERVATION_EVENTS_BINDING};
use boxoffice_booking::infrastructure::in_memory::{
    InMemoryProjectionStore, InMemoryReservationRepository,
};
use boxoffice_core::bus::{DeliveryStream, MessageBus};
use boxoffice_messaging::{BusEventPublisher, InMemoryMessageBus};
use boxoffice_test_support::ManualClock;
use futures::{FutureExt, StreamExt};
use http_body_util::BodyExt;
use tower::ServiceExt;

/// The full router over in-memory adapters, plus the handles needed to
/// drive the asynchronous projection side by hand.
pub struct TestApp {
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub reservations: Arc<InMemoryReservationRepository>,
    pub publisher: Arc<BusEventPublisher>,
    consumer: ProjectionConsumer,
    deliveries: DeliveryStream,
}

impl TestApp {
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
        ));
        let bus = Arc::new(InMemoryMessageBus::new());
        let deliveries = bus
            .subscribe(PROJECTION_QUEUE, BOOKING_EVENTS_EXCHANGE, RESERVATION_EVENTS_BINDING)
            .await
            .unwrap();
        let reservations = Arc::new(InMemoryReservationRepository::new());
        let publisher = Arc::new(BusEventPublisher::new(bus, BOOKING_EVENTS_EXCHANGE));
        let projections = Arc::new(InMemoryProjectionStore::new(clock.clone()));
        let app_state = AppState::new(
            clock.clone(),
            reservations.clone(),
            publisher.clone(),
            projections.clone(),
        );

        Self {
            router: boxoffice_api::build_router(app_state),
            clock,
            reservations,
            publisher,
            consumer: ProjectionConsumer::new(projections),
            deliveries,
        }
    }

    /// Lets the projection consumer process everything published so far.
    pub async fn sync_projections(&mut self) -> usize {
        let mut handled = 0;
        while let Some(Some(Ok(delivery))) = self.deliveries.next().now_or_never() {
            self.consumer.handle_delivery(delivery).await;
            handled += 1;
        }
        handled
    }

    /// Runs one expiration sweep at the current clock time.
    pub async fn sweep(&self) -> usize {
        ExpirationSweeper::new(
            self.reservations.clone(),
            self.publisher.clone(),
            self.clock.clone(),
        )
        .run_once()
        .await
        .unwrap()
        .expired
    }

    pub async fn post_json(
        &self,
        uri: &str,
        user_id: Option<&str>,
        body: &serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user_id) = user_id {
            builder = builder.header(USER_ID_HEADER, user_id);
        }
        let request = builder
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap();
        send(self.router.clone(), request).await
    }

    pub async fn post_empty(&self, uri: &str, user_id: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(USER_ID_HEADER, user_id)
            .body(Body::empty())
            .unwrap();
        send(self.router.clone(), request).await
    }

    pub async fn get_json(&self, uri: &str, user_id: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(USER_ID_HEADER, user_id);
        }
        send(self.router.clone(), builder.body(Body::empty()).unwrap()).await
    }

    /// Creates a one-line reservation and returns its ID.
    pub async fn create_reservation(&self, user_id: &str, unit_price: i64, quantity: i64) -> String {
        let (status, json) = self
            .post_json(
                "/api/v1/reservations",
                Some(user_id),
                &create_body(unit_price, quantity),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "unexpected body: {json}");
        json["reservationId"].as_str().unwrap().to_owned()
    }
}

pub fn create_body(unit_price: i64, quantity: i64) -> serde_json::Value {
    serde_json::json!({
        "eventId": "concert-7",
        "tickets": [
            {
                "ticketId": "ticket-vip",
                "ticketName": "VIP",
                "unitPrice": unit_price,
                "quantity": quantity
            }
        ]
    })
}

/// Sends a request; an empty body decodes as `null`.
async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null)
    };

    (status, json)
}
