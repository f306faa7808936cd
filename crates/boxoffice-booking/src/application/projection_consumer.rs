//! Projection consumer: keeps the read store in sync with reservation events.
//!
//! The consumer is the only writer of the projection store. Every handler is
//! idempotent so that at-least-once delivery and replays converge on the same
//! projection.
//!
//! Settlement rules:
//! - applied (or a harmless no-op) → `ack`
//! - undecodable payload or unknown event type → logged, `ack` (never retried)
//! - store failure → logged, `nack` with requeue, until the message has been
//!   delivered [`MAX_DELIVERY_ATTEMPTS`] times; then logged at `error` and
//!   dropped

use std::sync::Arc;
use std::time::Duration;

use boxoffice_core::bus::{Delivery, DeliveryStream, MessageBus};
use boxoffice_core::error::DomainError;
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::domain::events::{
    BOOKING_EVENTS_EXCHANGE, RESERVATION_EVENTS_BINDING, ReservationConfirmed, ReservationCreated,
    ReservationEventKind, ReservationExpired,
};
use crate::domain::projection::{ProjectionStore, ReservationProjection, confirmed_ttl, pending_ttl};

/// Durable queue the consumer reads from.
pub const PROJECTION_QUEUE: &str = "booking.projection-updates";

/// Deliveries after which a failing message is dropped.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// What applying an event did to the projection store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionChange {
    /// A pending projection was written.
    Created,
    /// A projection already existed; the create was a replay and was ignored.
    AlreadyProjected,
    /// The projection was marked confirmed and indexed for its user.
    Confirmed,
    /// No projection existed to confirm.
    Missing,
    /// The projection and its index entry were removed.
    Removed,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Applied and acknowledged.
    Applied(ProjectionChange),
    /// Could not be decoded; acknowledged without effect.
    Discarded,
    /// Store failure; handed back to the bus for redelivery.
    Requeued,
    /// Failed on its final attempt and was dropped.
    Dropped,
}

/// Applies reservation events to the projection store.
pub struct ProjectionConsumer {
    store: Arc<dyn ProjectionStore>,
    retry_delay: Duration,
}

impl ProjectionConsumer {
    /// Creates a consumer writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self {
            store,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Sets the delay before re-subscribing after the stream fails or ends.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Applies one event to the projection store.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store fails.
    pub async fn apply(&self, event: &ReservationEventKind) -> Result<ProjectionChange, DomainError> {
        match event {
            ReservationEventKind::Created(payload) => self.on_created(payload).await,
            ReservationEventKind::Confirmed(payload) => self.on_confirmed(payload).await,
            ReservationEventKind::Expired(payload) => self.on_expired(payload).await,
        }
    }

    async fn on_created(&self, event: &ReservationCreated) -> Result<ProjectionChange, DomainError> {
        if self.store.get(event.reservation_id).await?.is_some() {
            return Ok(ProjectionChange::AlreadyProjected);
        }
        let projection = ReservationProjection::from_created(event);
        self.store.put(&projection, pending_ttl()).await?;
        Ok(ProjectionChange::Created)
    }

    async fn on_confirmed(
        &self,
        event: &ReservationConfirmed,
    ) -> Result<ProjectionChange, DomainError> {
        let Some(mut projection) = self.store.get(event.reservation_id).await? else {
            return Ok(ProjectionChange::Missing);
        };
        projection.apply_confirmed(event);
        self.store.put(&projection, confirmed_ttl()).await?;
        self.store
            .index_for_user(&projection.user_id, projection.id, projection.created_at)
            .await?;
        Ok(ProjectionChange::Confirmed)
    }

    async fn on_expired(&self, event: &ReservationExpired) -> Result<ProjectionChange, DomainError> {
        self.store.delete(event.reservation_id).await?;
        self.store
            .unindex_for_user(&event.user_id, event.reservation_id)
            .await?;
        Ok(ProjectionChange::Removed)
    }

    /// Decodes, applies and settles one delivery.
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let event = match ReservationEventKind::from_message(&delivery.message) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(
                    consumer = PROJECTION_QUEUE,
                    routing_key = %delivery.message.routing_key,
                    error = %error,
                    "discarding undecodable message"
                );
                settle(delivery.ack().await);
                return DeliveryOutcome::Discarded;
            }
        };

        match self.apply(&event).await {
            Ok(change) => {
                tracing::debug!(
                    consumer = PROJECTION_QUEUE,
                    event_type = event.event_type(),
                    reservation_id = %event.reservation_id(),
                    ?change,
                    "projection updated"
                );
                settle(delivery.ack().await);
                DeliveryOutcome::Applied(change)
            }
            Err(error) if delivery.delivery_count >= MAX_DELIVERY_ATTEMPTS => {
                tracing::error!(
                    consumer = PROJECTION_QUEUE,
                    event_type = event.event_type(),
                    reservation_id = %event.reservation_id(),
                    attempts = delivery.delivery_count,
                    error = %error,
                    "giving up on event after repeated failures"
                );
                settle(delivery.nack(false).await);
                DeliveryOutcome::Dropped
            }
            Err(error) => {
                tracing::warn!(
                    consumer = PROJECTION_QUEUE,
                    event_type = event.event_type(),
                    reservation_id = %event.reservation_id(),
                    attempt = delivery.delivery_count,
                    error = %error,
                    "projection update failed, requeueing"
                );
                settle(delivery.nack(true).await);
                DeliveryOutcome::Requeued
            }
        }
    }

    /// Subscribes to the booking exchange and processes deliveries until a
    /// shutdown signal arrives, re-subscribing after `retry_delay` whenever
    /// the subscription fails or the stream ends.
    pub async fn run(self, bus: Arc<dyn MessageBus>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(consumer = PROJECTION_QUEUE, "projection consumer started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                subscribed = bus.subscribe(PROJECTION_QUEUE, BOOKING_EVENTS_EXCHANGE, RESERVATION_EVENTS_BINDING) => {
                    match subscribed {
                        Ok(stream) => {
                            if self.process_stream(stream, &mut shutdown).await {
                                break;
                            }
                            tracing::warn!(
                                consumer = PROJECTION_QUEUE,
                                "delivery stream ended, re-subscribing in {:?}",
                                self.retry_delay
                            );
                        }
                        Err(error) => {
                            tracing::error!(
                                consumer = PROJECTION_QUEUE,
                                error = %error,
                                "failed to subscribe, retrying in {:?}",
                                self.retry_delay
                            );
                        }
                    }
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        tracing::info!(consumer = PROJECTION_QUEUE, "projection consumer stopped");
    }

    /// Processes a stream until it ends (`false`) or shutdown is signalled
    /// (`true`).
    async fn process_stream(
        &self,
        mut stream: DeliveryStream,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return true,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        self.handle_delivery(delivery).await;
                    }
                    Some(Err(error)) => {
                        tracing::error!(
                            consumer = PROJECTION_QUEUE,
                            error = %error,
                            "error receiving delivery"
                        );
                    }
                    None => return false,
                },
            }
        }
    }
}

fn settle(result: Result<(), DomainError>) {
    if let Err(error) = result {
        tracing::error!(consumer = PROJECTION_QUEUE, error = %error, "failed to settle delivery");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use boxoffice_core::bus::{Acknowledger, EVENT_TYPE_HEADER, Message};
    use boxoffice_test_support::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::domain::aggregates::ReservationStatus;
    use crate::domain::events::{
        RESERVATION_CONFIRMED_EVENT_TYPE, RESERVATION_CREATED_EVENT_TYPE,
        RESERVATION_EXPIRED_EVENT_TYPE, TicketQuantity,
    };
    use crate::infrastructure::in_memory::InMemoryProjectionStore;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Settlement {
        Ack,
        Nack { requeue: bool },
    }

    #[derive(Debug, Clone, Default)]
    struct RecordingAcknowledger {
        settlements: Arc<Mutex<Vec<Settlement>>>,
    }

    impl RecordingAcknowledger {
        fn settlements(&self) -> Vec<Settlement> {
            self.settlements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Acknowledger for RecordingAcknowledger {
        async fn ack(&self) -> Result<(), DomainError> {
            self.settlements.lock().unwrap().push(Settlement::Ack);
            Ok(())
        }

        async fn nack(&self, requeue: bool) -> Result<(), DomainError> {
            self.settlements
                .lock()
                .unwrap()
                .push(Settlement::Nack { requeue });
            Ok(())
        }
    }

    struct FailingProjectionStore;

    #[async_trait]
    impl ProjectionStore for FailingProjectionStore {
        async fn put(
            &self,
            _projection: &ReservationProjection,
            _ttl: chrono::Duration,
        ) -> Result<(), DomainError> {
            Err(DomainError::Infrastructure("connection refused".into()))
        }

        async fn get(&self, _id: Uuid) -> Result<Option<ReservationProjection>, DomainError> {
            Err(DomainError::Infrastructure("connection refused".into()))
        }

        async fn delete(&self, _id: Uuid) -> Result<(), DomainError> {
            Err(DomainError::Infrastructure("connection refused".into()))
        }

        async fn index_for_user(
            &self,
            _user_id: &str,
            _id: Uuid,
            _created_at: DateTime<Utc>,
        ) -> Result<(), DomainError> {
            Err(DomainError::Infrastructure("connection refused".into()))
        }

        async fn unindex_for_user(&self, _user_id: &str, _id: Uuid) -> Result<(), DomainError> {
            Err(DomainError::Infrastructure("connection refused".into()))
        }

        async fn user_index(&self, _user_id: &str) -> Result<Vec<Uuid>, DomainError> {
            Err(DomainError::Infrastructure("connection refused".into()))
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn store() -> Arc<InMemoryProjectionStore> {
        Arc::new(InMemoryProjectionStore::new(Arc::new(FixedClock(fixed_now()))))
    }

    fn created(reservation_id: Uuid) -> ReservationCreated {
        ReservationCreated {
            reservation_id,
            user_id: "user-1".to_owned(),
            event_id: "concert-7".to_owned(),
            total_amount: 2000,
            created_at: fixed_now(),
            expires_at: fixed_now() + chrono::Duration::minutes(10),
            items: vec![TicketQuantity {
                ticket_id: "ticket-vip".to_owned(),
                quantity: 2,
            }],
        }
    }

    fn confirmed(reservation_id: Uuid) -> ReservationConfirmed {
        ReservationConfirmed {
            reservation_id,
            user_id: "user-1".to_owned(),
            event_id: "concert-7".to_owned(),
            confirmed_at: fixed_now() + chrono::Duration::minutes(2),
        }
    }

    fn expired(reservation_id: Uuid) -> ReservationExpired {
        ReservationExpired {
            reservation_id,
            user_id: "user-1".to_owned(),
            event_id: "concert-7".to_owned(),
            expired_at: fixed_now() + chrono::Duration::minutes(11),
            items: vec![],
        }
    }

    fn delivery(
        event_type: &str,
        payload: Vec<u8>,
        delivery_count: u32,
    ) -> (Delivery, RecordingAcknowledger) {
        let acker = RecordingAcknowledger::default();
        let message = Message::new(event_type, payload).with_header(EVENT_TYPE_HEADER, event_type);
        (
            Delivery::new(message, delivery_count, Box::new(acker.clone())),
            acker,
        )
    }

    #[tokio::test]
    async fn test_created_writes_pending_projection() {
        // Arrange
        let store = store();
        let consumer = ProjectionConsumer::new(store.clone());
        let id = Uuid::new_v4();

        // Act
        let change = consumer
            .apply(&ReservationEventKind::Created(created(id)))
            .await
            .unwrap();

        // Assert
        assert_eq!(change, ProjectionChange::Created);
        let projection = store.get(id).await.unwrap().unwrap();
        assert_eq!(projection.status, ReservationStatus::Pending);
        assert_eq!(projection.total_amount, 2000);
        assert_eq!(store.ttl(id).unwrap(), Some(chrono::Duration::minutes(15)));
        assert!(store.user_index("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_marks_projection_and_indexes_user() {
        // Arrange
        let store = store();
        let consumer = ProjectionConsumer::new(store.clone());
        let id = Uuid::new_v4();
        consumer
            .apply(&ReservationEventKind::Created(created(id)))
            .await
            .unwrap();

        // Act
        let change = consumer
            .apply(&ReservationEventKind::Confirmed(confirmed(id)))
            .await
            .unwrap();

        // Assert
        assert_eq!(change, ProjectionChange::Confirmed);
        let projection = store.get(id).await.unwrap().unwrap();
        assert_eq!(projection.status, ReservationStatus::Confirmed);
        assert_eq!(projection.confirmed_at, Some(fixed_now() + chrono::Duration::minutes(2)));
        assert_eq!(store.ttl(id).unwrap(), Some(chrono::Duration::days(30)));
        assert_eq!(store.user_index("user-1").await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_confirmed_without_projection_is_a_no_op() {
        let store = store();
        let consumer = ProjectionConsumer::new(store.clone());
        let id = Uuid::new_v4();

        let change = consumer
            .apply(&ReservationEventKind::Confirmed(confirmed(id)))
            .await
            .unwrap();

        assert_eq!(change, ProjectionChange::Missing);
        assert!(store.get(id).await.unwrap().is_none());
        assert!(store.user_index("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replaying_created_and_confirmed_converges() {
        // Arrange
        let store = store();
        let consumer = ProjectionConsumer::new(store.clone());
        let id = Uuid::new_v4();
        let events = [
            ReservationEventKind::Created(created(id)),
            ReservationEventKind::Confirmed(confirmed(id)),
        ];
        for event in &events {
            consumer.apply(event).await.unwrap();
        }
        let once = store.get(id).await.unwrap().unwrap();

        // Act
        for event in &events {
            consumer.apply(event).await.unwrap();
        }

        // Assert
        let twice = store.get(id).await.unwrap().unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.status, ReservationStatus::Confirmed);
        assert_eq!(store.user_index("user-1").await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_expired_removes_projection_and_index_entry() {
        // Arrange
        let store = store();
        let consumer = ProjectionConsumer::new(store.clone());
        let id = Uuid::new_v4();
        consumer
            .apply(&ReservationEventKind::Created(created(id)))
            .await
            .unwrap();
        store.index_for_user("user-1", id, fixed_now()).await.unwrap();

        // Act
        let change = consumer
            .apply(&ReservationEventKind::Expired(expired(id)))
            .await
            .unwrap();
        let again = consumer
            .apply(&ReservationEventKind::Expired(expired(id)))
            .await
            .unwrap();

        // Assert
        assert_eq!(change, ProjectionChange::Removed);
        assert_eq!(again, ProjectionChange::Removed);
        assert!(store.get(id).await.unwrap().is_none());
        assert!(store.user_index("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handle_delivery_acks_applied_event() {
        let consumer = ProjectionConsumer::new(store());
        let payload = serde_json::to_vec(&created(Uuid::new_v4())).unwrap();
        let (delivery, acker) = delivery(RESERVATION_CREATED_EVENT_TYPE, payload, 1);

        let outcome = consumer.handle_delivery(delivery).await;

        assert_eq!(outcome, DeliveryOutcome::Applied(ProjectionChange::Created));
        assert_eq!(acker.settlements(), vec![Settlement::Ack]);
    }

    #[tokio::test]
    async fn test_handle_delivery_acks_unknown_event_type() {
        let consumer = ProjectionConsumer::new(store());
        let (delivery, acker) = delivery("reservation.refunded", b"{}".to_vec(), 1);

        let outcome = consumer.handle_delivery(delivery).await;

        assert_eq!(outcome, DeliveryOutcome::Discarded);
        assert_eq!(acker.settlements(), vec![Settlement::Ack]);
    }

    #[tokio::test]
    async fn test_handle_delivery_acks_malformed_payload() {
        let consumer = ProjectionConsumer::new(store());
        let (delivery, acker) = delivery(RESERVATION_EXPIRED_EVENT_TYPE, b"not json".to_vec(), 1);

        let outcome = consumer.handle_delivery(delivery).await;

        assert_eq!(outcome, DeliveryOutcome::Discarded);
        assert_eq!(acker.settlements(), vec![Settlement::Ack]);
    }

    #[tokio::test]
    async fn test_handle_delivery_requeues_on_store_failure() {
        let consumer = ProjectionConsumer::new(Arc::new(FailingProjectionStore));
        let payload = serde_json::to_vec(&confirmed(Uuid::new_v4())).unwrap();
        let (delivery, acker) = delivery(RESERVATION_CONFIRMED_EVENT_TYPE, payload, 1);

        let outcome = consumer.handle_delivery(delivery).await;

        assert_eq!(outcome, DeliveryOutcome::Requeued);
        assert_eq!(acker.settlements(), vec![Settlement::Nack { requeue: true }]);
    }

    #[tokio::test]
    async fn test_handle_delivery_drops_after_max_attempts() {
        let consumer = ProjectionConsumer::new(Arc::new(FailingProjectionStore));
        let payload = serde_json::to_vec(&confirmed(Uuid::new_v4())).unwrap();
        let (delivery, acker) =
            delivery(RESERVATION_CONFIRMED_EVENT_TYPE, payload, MAX_DELIVERY_ATTEMPTS);

        let outcome = consumer.handle_delivery(delivery).await;

        assert_eq!(outcome, DeliveryOutcome::Dropped);
        assert_eq!(acker.settlements(), vec![Settlement::Nack { requeue: false }]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        // Arrange
        let bus: Arc<dyn MessageBus> = Arc::new(boxoffice_messaging::InMemoryMessageBus::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let consumer = ProjectionConsumer::new(store());
        let handle = tokio::spawn(consumer.run(bus, shutdown_rx));

        // Act
        tokio::task::yield_now().await;
        shutdown_tx.send(()).unwrap();

        // Assert
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer did not stop")
            .unwrap();
    }

    /// Refuses the first `failures` subscriptions, then delegates.
    struct FlakyBus {
        inner: boxoffice_messaging::InMemoryMessageBus,
        failures: Mutex<u32>,
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        async fn publish(&self, exchange: &str, message: Message) -> Result<(), DomainError> {
            self.inner.publish(exchange, message).await
        }

        async fn subscribe(
            &self,
            queue: &str,
            exchange: &str,
            binding: &str,
        ) -> Result<DeliveryStream, DomainError> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(DomainError::Infrastructure("broker unavailable".into()));
                }
            }
            self.inner.subscribe(queue, exchange, binding).await
        }
    }

    #[tokio::test]
    async fn test_run_resubscribes_after_failure() {
        // Arrange
        let inner = boxoffice_messaging::InMemoryMessageBus::new();
        inner
            .declare_queue(PROJECTION_QUEUE, BOOKING_EVENTS_EXCHANGE, RESERVATION_EVENTS_BINDING)
            .unwrap();
        let bus = Arc::new(FlakyBus {
            inner,
            failures: Mutex::new(2),
        });
        let store = store();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let consumer = ProjectionConsumer::new(store.clone()).with_retry_delay(Duration::from_millis(5));
        let handle = tokio::spawn(consumer.run(bus.clone(), shutdown_rx));
        let id = Uuid::new_v4();
        let message = Message::new(
            RESERVATION_CREATED_EVENT_TYPE,
            serde_json::to_vec(&created(id)).unwrap(),
        )
        .with_header(EVENT_TYPE_HEADER, RESERVATION_CREATED_EVENT_TYPE);

        // Act
        bus.publish(BOOKING_EVENTS_EXCHANGE, message).await.unwrap();
        let projected = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(projection) = store.get(id).await.unwrap() {
                    return projection;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event was never projected");
        shutdown_tx.send(()).unwrap();

        // Assert
        assert_eq!(projected.status, ReservationStatus::Pending);
        assert_eq!(*bus.failures.lock().unwrap(), 0);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer did not stop")
            .unwrap();
    }
}
