//! `EventPublisher` implementation that sends domain events over a message bus.

use std::sync::Arc;

use async_trait::async_trait;
use boxoffice_core::bus::{
    AGGREGATE_ID_HEADER, CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON, CORRELATION_ID_HEADER,
    EVENT_ID_HEADER, EVENT_TYPE_HEADER, Message, MessageBus,
};
use boxoffice_core::error::DomainError;
use boxoffice_core::event::{DomainEvent, EventPublisher};

/// Publishes domain events to a topic exchange.
///
/// The routing key and the `event_type` header both carry the event type; the
/// body is the JSON payload without any envelope.
#[derive(Clone)]
pub struct BusEventPublisher {
    bus: Arc<dyn MessageBus>,
    exchange: String,
}

impl BusEventPublisher {
    /// Creates a publisher targeting `exchange`.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, exchange: impl Into<String>) -> Self {
        Self {
            bus,
            exchange: exchange.into(),
        }
    }

    /// Returns the exchange this publisher targets.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

impl std::fmt::Debug for BusEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusEventPublisher")
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

/// Builds the bus message for a domain event.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the payload cannot be encoded.
pub fn event_to_message(event: &dyn DomainEvent) -> Result<Message, DomainError> {
    let metadata = event.metadata();
    let payload = serde_json::to_vec(&event.to_payload())
        .map_err(|e| DomainError::Infrastructure(format!("failed to encode event: {e}")))?;

    Ok(Message::new(event.event_type(), payload)
        .with_header(EVENT_TYPE_HEADER, event.event_type())
        .with_header(EVENT_ID_HEADER, metadata.event_id.to_string())
        .with_header(AGGREGATE_ID_HEADER, metadata.aggregate_id.to_string())
        .with_header(CORRELATION_ID_HEADER, metadata.correlation_id.to_string())
        .with_header(CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON))
}

#[async_trait]
impl EventPublisher for BusEventPublisher {
    async fn publish(&self, event: &dyn DomainEvent) -> Result<(), DomainError> {
        let message = event_to_message(event)?;
        self.bus.publish(&self.exchange, message).await?;

        tracing::debug!(
            exchange = %self.exchange,
            event_type = event.event_type(),
            event_id = %event.metadata().event_id,
            aggregate_id = %event.metadata().aggregate_id,
            "event published"
        );
        Ok(())
    }
}
