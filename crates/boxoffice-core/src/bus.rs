//! Message bus port.
//!
//! A topic-addressed bus: publishers send a [`Message`] to an exchange with a
//! routing key; subscribers declare a durable queue, bind it to the exchange
//! with a topic pattern, and receive [`Delivery`] values that must be
//! acknowledged. Delivery is at-least-once.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::DomainError;

/// Header carrying the event kind discriminator.
pub const EVENT_TYPE_HEADER: &str = "event_type";

/// Header carrying the unique event identifier.
pub const EVENT_ID_HEADER: &str = "event_id";

/// Header carrying the aggregate identifier (also the partition key).
pub const AGGREGATE_ID_HEADER: &str = "aggregate_id";

/// Header carrying the correlation identifier.
pub const CORRELATION_ID_HEADER: &str = "correlation_id";

/// Header carrying the payload content type.
pub const CONTENT_TYPE_HEADER: &str = "content_type";

/// Content type for JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A message as it travels over the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Routing key used to match topic bindings.
    pub routing_key: String,
    /// String headers (discriminator, ids, content type).
    pub headers: BTreeMap<String, String>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a message with no headers.
    #[must_use]
    pub fn new(routing_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            headers: BTreeMap::new(),
            payload,
        }
    }

    /// Adds a header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns the value of a header, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Settles a delivery with the bus that produced it.
#[async_trait]
pub trait Acknowledger: Send + Sync + std::fmt::Debug {
    /// Marks the message as processed.
    async fn ack(&self) -> Result<(), DomainError>;

    /// Rejects the message; with `requeue` the bus delivers it again.
    async fn nack(&self, requeue: bool) -> Result<(), DomainError>;
}

/// A message handed to a subscriber, awaiting settlement.
#[derive(Debug)]
pub struct Delivery {
    /// The delivered message.
    pub message: Message,
    /// How many times this message has been delivered (1 on first delivery).
    pub delivery_count: u32,
    acknowledger: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Wraps a message with the acknowledger that settles it.
    #[must_use]
    pub fn new(message: Message, delivery_count: u32, acknowledger: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            delivery_count,
            acknowledger,
        }
    }

    /// Returns `true` when the message has been delivered before.
    #[must_use]
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }

    /// Acknowledges successful processing.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the bus cannot record the ack.
    pub async fn ack(self) -> Result<(), DomainError> {
        self.acknowledger.ack().await
    }

    /// Rejects the message, optionally asking for redelivery.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the bus cannot requeue.
    pub async fn nack(self, requeue: bool) -> Result<(), DomainError> {
        self.acknowledger.nack(requeue).await
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, DomainError>> + Send>>;

/// Topic-based message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message to an exchange; routing uses `message.routing_key`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the bus is unavailable.
    async fn publish(&self, exchange: &str, message: Message) -> Result<(), DomainError>;

    /// Declares `queue`, binds it to `exchange` with the topic `binding`
    /// pattern and starts consuming from it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the subscription cannot be set
    /// up (e.g. the queue already has a consumer).
    async fn subscribe(
        &self,
        queue: &str,
        exchange: &str,
        binding: &str,
    ) -> Result<DeliveryStream, DomainError>;
}
