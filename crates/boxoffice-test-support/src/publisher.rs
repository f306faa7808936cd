//! Test publishers — mock `EventPublisher` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use boxoffice_core::error::DomainError;
use boxoffice_core::event::{DomainEvent, EventMetadata, EventPublisher};

/// A snapshot of one published event.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    /// The event type (routing key).
    pub event_type: &'static str,
    /// The serialized payload.
    pub payload: serde_json::Value,
    /// The event metadata.
    pub metadata: EventMetadata,
}

/// A publisher that records every event it is handed and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    published: Mutex<Vec<PublishedEvent>>,
}

impl RecordingEventPublisher {
    /// Creates an empty recording publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all published events, in publication order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Returns the event types published so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn event_types(&self) -> Vec<&'static str> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: &dyn DomainEvent) -> Result<(), DomainError> {
        self.published.lock().unwrap().push(PublishedEvent {
            event_type: event.event_type(),
            payload: event.to_payload(),
            metadata: event.metadata().clone(),
        });
        Ok(())
    }
}

/// A publisher that always returns an infrastructure error. Useful for
/// checking that publish failures do not fail commands.
#[derive(Debug)]
pub struct FailingEventPublisher;

#[async_trait]
impl EventPublisher for FailingEventPublisher {
    async fn publish(&self, _event: &dyn DomainEvent) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("broker unavailable".into()))
    }
}
