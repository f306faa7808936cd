//! Domain event abstractions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name, also used as the routing key and kind discriminator.
    pub event_type: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type name (used for routing and demultiplexing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    fn to_payload(&self) -> serde_json::Value;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;
}

/// Fire-and-forget publication of domain events.
///
/// Callers publish only after the state change that produced the event has
/// been persisted. Delivery is at-least-once; consumers must be idempotent.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Hands the event to the transport.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the transport rejects the event.
    async fn publish(&self, event: &dyn DomainEvent) -> Result<(), DomainError>;
}
