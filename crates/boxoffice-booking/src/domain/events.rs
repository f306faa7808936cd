//! Domain events for the booking context.
//!
//! The wire contract carries the payload struct alone as camelCase JSON; the
//! kind travels separately as the event type (routing key and `event_type`
//! header).

use boxoffice_core::bus::{EVENT_TYPE_HEADER, Message};
use boxoffice_core::event::{DomainEvent, EventMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Exchange every booking event is published to.
pub const BOOKING_EVENTS_EXCHANGE: &str = "booking.events";

/// Binding pattern matching every reservation event.
pub const RESERVATION_EVENTS_BINDING: &str = "reservation.*";

/// Event type for `ReservationCreated`.
pub const RESERVATION_CREATED_EVENT_TYPE: &str = "reservation.created";

/// Event type for `ReservationConfirmed`.
pub const RESERVATION_CONFIRMED_EVENT_TYPE: &str = "reservation.confirmed";

/// Event type for `ReservationExpired`.
pub const RESERVATION_EXPIRED_EVENT_TYPE: &str = "reservation.expired";

/// Ticket and quantity pair carried by created/expired events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketQuantity {
    /// The ticket identifier.
    pub ticket_id: String,
    /// Number of tickets held.
    pub quantity: i64,
}

/// Emitted when a reservation is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCreated {
    /// The reservation identifier.
    pub reservation_id: Uuid,
    /// The reserving user.
    pub user_id: String,
    /// The event (show) the tickets are for.
    pub event_id: String,
    /// Sum of item subtotals, in minor units.
    pub total_amount: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// End of the payment window.
    pub expires_at: DateTime<Utc>,
    /// Tickets held.
    pub items: Vec<TicketQuantity>,
}

/// Emitted when a reservation is paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationConfirmed {
    /// The reservation identifier.
    pub reservation_id: Uuid,
    /// The reserving user.
    pub user_id: String,
    /// The event (show) the tickets are for.
    pub event_id: String,
    /// Confirmation time.
    pub confirmed_at: DateTime<Utc>,
}

/// Emitted when the payment window lapses without confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationExpired {
    /// The reservation identifier.
    pub reservation_id: Uuid,
    /// The reserving user.
    pub user_id: String,
    /// The event (show) the tickets are for.
    pub event_id: String,
    /// When the expiry was recorded.
    pub expired_at: DateTime<Utc>,
    /// Tickets released.
    pub items: Vec<TicketQuantity>,
}

/// Event payload variants for the booking context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationEventKind {
    /// A reservation has been created.
    Created(ReservationCreated),
    /// A reservation has been confirmed.
    Confirmed(ReservationConfirmed),
    /// A reservation has expired.
    Expired(ReservationExpired),
}

/// Why an inbound message could not be turned into a reservation event.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The message carries no `event_type` header.
    #[error("message has no event_type header")]
    MissingEventType,

    /// The discriminator names no known event kind.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The payload does not match the named kind.
    #[error("malformed {event_type} payload: {source}")]
    Malformed {
        /// The event type the payload claimed to be.
        event_type: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },
}

impl ReservationEventKind {
    /// Returns the event type (routing key) of this kind.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => RESERVATION_CREATED_EVENT_TYPE,
            Self::Confirmed(_) => RESERVATION_CONFIRMED_EVENT_TYPE,
            Self::Expired(_) => RESERVATION_EXPIRED_EVENT_TYPE,
        }
    }

    /// Returns the reservation this event is about.
    #[must_use]
    pub fn reservation_id(&self) -> Uuid {
        match self {
            Self::Created(p) => p.reservation_id,
            Self::Confirmed(p) => p.reservation_id,
            Self::Expired(p) => p.reservation_id,
        }
    }

    /// Decodes a payload given its event type discriminator.
    ///
    /// # Errors
    ///
    /// Returns `EventDecodeError::UnknownEventType` for an unrecognised
    /// discriminator and `EventDecodeError::Malformed` if the JSON does not
    /// match the kind.
    pub fn decode(event_type: &str, payload: &[u8]) -> Result<Self, EventDecodeError> {
        let malformed = |source| EventDecodeError::Malformed {
            event_type: event_type.to_owned(),
            source,
        };
        match event_type {
            RESERVATION_CREATED_EVENT_TYPE => serde_json::from_slice(payload)
                .map(Self::Created)
                .map_err(malformed),
            RESERVATION_CONFIRMED_EVENT_TYPE => serde_json::from_slice(payload)
                .map(Self::Confirmed)
                .map_err(malformed),
            RESERVATION_EXPIRED_EVENT_TYPE => serde_json::from_slice(payload)
                .map(Self::Expired)
                .map_err(malformed),
            other => Err(EventDecodeError::UnknownEventType(other.to_owned())),
        }
    }

    /// Decodes a bus message using its `event_type` header.
    ///
    /// # Errors
    ///
    /// Returns `EventDecodeError::MissingEventType` if the header is absent,
    /// otherwise see [`ReservationEventKind::decode`].
    pub fn from_message(message: &Message) -> Result<Self, EventDecodeError> {
        let event_type = message
            .header(EVENT_TYPE_HEADER)
            .ok_or(EventDecodeError::MissingEventType)?;
        Self::decode(event_type, &message.payload)
    }
}

/// Domain event envelope for the booking context.
#[derive(Debug, Clone)]
pub struct ReservationEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: ReservationEventKind,
}

impl DomainEvent for ReservationEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        match &self.kind {
            ReservationEventKind::Created(p) => serde_json::to_value(p),
            ReservationEventKind::Confirmed(p) => serde_json::to_value(p),
            ReservationEventKind::Expired(p) => serde_json::to_value(p),
        }
        .expect("ReservationEventKind serialization is infallible")
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn confirmed() -> ReservationConfirmed {
        ReservationConfirmed {
            reservation_id: Uuid::new_v4(),
            user_id: "user-1".to_owned(),
            event_id: "concert-7".to_owned(),
            confirmed_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 5, 0).unwrap(),
        }
    }

    #[test]
    fn test_payload_is_camel_case_without_envelope() {
        // Arrange
        let payload = confirmed();
        let event = ReservationEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: RESERVATION_CONFIRMED_EVENT_TYPE.to_owned(),
                aggregate_id: payload.reservation_id,
                correlation_id: Uuid::new_v4(),
                causation_id: Uuid::new_v4(),
                occurred_at: payload.confirmed_at,
            },
            kind: ReservationEventKind::Confirmed(payload.clone()),
        };

        // Act
        let json = event.to_payload();

        // Assert
        assert_eq!(event.event_type(), RESERVATION_CONFIRMED_EVENT_TYPE);
        assert_eq!(json["reservationId"], payload.reservation_id.to_string());
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["eventId"], "concert-7");
        assert!(json.get("confirmedAt").is_some());
        assert!(json.get("Confirmed").is_none());
    }

    #[test]
    fn test_decode_dispatches_on_event_type() {
        let payload = confirmed();
        let bytes = serde_json::to_vec(&payload).unwrap();

        let kind = ReservationEventKind::decode(RESERVATION_CONFIRMED_EVENT_TYPE, &bytes).unwrap();

        assert_eq!(kind, ReservationEventKind::Confirmed(payload));
    }

    #[test]
    fn test_decode_rejects_unknown_event_type() {
        let result = ReservationEventKind::decode("reservation.refunded", b"{}");

        match result.unwrap_err() {
            EventDecodeError::UnknownEventType(t) => assert_eq!(t, "reservation.refunded"),
            other => panic!("expected UnknownEventType, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_payload_of_wrong_shape() {
        let result = ReservationEventKind::decode(RESERVATION_CREATED_EVENT_TYPE, b"{\"id\":1}");

        match result.unwrap_err() {
            EventDecodeError::Malformed { event_type, .. } => {
                assert_eq!(event_type, RESERVATION_CREATED_EVENT_TYPE);
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_from_message_requires_event_type_header() {
        let message = Message::new(RESERVATION_CONFIRMED_EVENT_TYPE, b"{}".to_vec());

        let result = ReservationEventKind::from_message(&message);

        assert!(matches!(result, Err(EventDecodeError::MissingEventType)));
    }
}
