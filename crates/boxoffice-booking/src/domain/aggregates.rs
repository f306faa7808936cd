//! Aggregate roots for the booking context.

use std::fmt;
use std::str::FromStr;

use boxoffice_core::aggregate::AggregateRoot;
use boxoffice_core::clock::Clock;
use boxoffice_core::error::DomainError;
use boxoffice_core::event::EventMetadata;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{
    RESERVATION_CONFIRMED_EVENT_TYPE, RESERVATION_CREATED_EVENT_TYPE,
    RESERVATION_EXPIRED_EVENT_TYPE, ReservationConfirmed, ReservationCreated, ReservationEvent,
    ReservationEventKind, ReservationExpired, TicketQuantity,
};

/// Minutes a pending reservation may wait for payment.
pub const EXPIRATION_WINDOW_MINUTES: i64 = 10;

/// Returns the payment window as a duration.
#[must_use]
pub fn expiration_window() -> Duration {
    Duration::minutes(EXPIRATION_WINDOW_MINUTES)
}

/// Lifecycle state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Awaiting payment.
    Pending,
    /// Paid.
    Confirmed,
    /// Payment window lapsed.
    Expired,
    /// Withdrawn.
    Cancelled,
}

impl ReservationStatus {
    /// Returns the wire form (`PENDING`, `CONFIRMED`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "EXPIRED" => Ok(Self::Expired),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(DomainError::Validation(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }
}

/// A line of a reservation: some quantity of one ticket type at a unit price.
///
/// Prices are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationItem {
    id: Uuid,
    ticket_id: String,
    ticket_name: String,
    unit_price: i64,
    quantity: i64,
}

impl ReservationItem {
    /// Creates an item.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `ticket_id` is blank, `quantity`
    /// is not positive, `unit_price` is negative, or the subtotal does not
    /// fit in an `i64`.
    pub fn new(
        id: Uuid,
        ticket_id: impl Into<String>,
        ticket_name: impl Into<String>,
        unit_price: i64,
        quantity: i64,
    ) -> Result<Self, DomainError> {
        let ticket_id = ticket_id.into();
        if ticket_id.trim().is_empty() {
            return Err(DomainError::Validation("ticket id must not be blank".into()));
        }
        if quantity <= 0 {
            return Err(DomainError::Validation(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        if unit_price < 0 {
            return Err(DomainError::Validation(format!(
                "unit price must not be negative, got {unit_price}"
            )));
        }
        if unit_price.checked_mul(quantity).is_none() {
            return Err(DomainError::Validation(format!(
                "subtotal of {quantity} x {unit_price} is out of range"
            )));
        }
        Ok(Self {
            id,
            ticket_id,
            ticket_name: ticket_name.into(),
            unit_price,
            quantity,
        })
    }

    /// Returns the item identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the ticket identifier.
    #[must_use]
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    /// Returns the ticket display name.
    #[must_use]
    pub fn ticket_name(&self) -> &str {
        &self.ticket_name
    }

    /// Returns the unit price.
    #[must_use]
    pub fn unit_price(&self) -> i64 {
        self.unit_price
    }

    /// Returns the quantity.
    #[must_use]
    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Returns `unit_price * quantity`.
    #[must_use]
    pub fn subtotal(&self) -> i64 {
        self.unit_price.saturating_mul(self.quantity)
    }

    fn ticket_quantity(&self) -> TicketQuantity {
        TicketQuantity {
            ticket_id: self.ticket_id.clone(),
            quantity: self.quantity,
        }
    }
}

/// Sums `field` over `items`, or `None` on overflow.
fn checked_total(items: &[ReservationItem], field: fn(&ReservationItem) -> i64) -> Option<i64> {
    items
        .iter()
        .try_fold(0_i64, |total, item| total.checked_add(field(item)))
}

/// Persisted state of a reservation, used to rebuild the aggregate.
#[derive(Debug, Clone)]
pub struct ReservationParts {
    /// Reservation identifier.
    pub id: Uuid,
    /// Reserving user.
    pub user_id: String,
    /// Event (show) identifier.
    pub event_id: String,
    /// Items, in order.
    pub items: Vec<ReservationItem>,
    /// Current status.
    pub status: ReservationStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// End of the payment window.
    pub expires_at: DateTime<Utc>,
    /// Confirmation time, if confirmed.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
    /// Persisted version.
    pub version: i64,
}

/// The aggregate root for a ticket reservation.
///
/// Pending reservations must be confirmed within [`EXPIRATION_WINDOW_MINUTES`]
/// of creation; afterwards they can only expire.
#[derive(Debug, Clone)]
pub struct Reservation {
    id: Uuid,
    user_id: String,
    event_id: String,
    items: Vec<ReservationItem>,
    status: ReservationStatus,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    /// Version the aggregate was loaded at (0 when never saved).
    pub(crate) version: i64,
    /// Uncommitted events pending publication.
    uncommitted_events: Vec<ReservationEvent>,
}

impl Reservation {
    /// Creates a pending reservation, producing a `ReservationCreated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `user_id` or `event_id` is blank,
    /// `items` is empty, or the total amount or ticket count does not fit in
    /// an `i64`.
    pub fn create(
        user_id: impl Into<String>,
        event_id: impl Into<String>,
        items: Vec<ReservationItem>,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        let user_id = user_id.into();
        let event_id = event_id.into();
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user id must not be blank".into()));
        }
        if event_id.trim().is_empty() {
            return Err(DomainError::Validation("event id must not be blank".into()));
        }
        if items.is_empty() {
            return Err(DomainError::Validation(
                "a reservation needs at least one item".into(),
            ));
        }
        let total_amount = checked_total(&items, ReservationItem::subtotal)
            .ok_or_else(|| DomainError::Validation("total amount is out of range".into()))?;
        checked_total(&items, ReservationItem::quantity)
            .ok_or_else(|| DomainError::Validation("ticket count is out of range".into()))?;

        let now = clock.now();
        let mut reservation = Self {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            items,
            status: ReservationStatus::Pending,
            created_at: now,
            expires_at: now + expiration_window(),
            confirmed_at: None,
            updated_at: now,
            version: 0,
            uncommitted_events: Vec::new(),
        };

        let kind = ReservationEventKind::Created(ReservationCreated {
            reservation_id: reservation.id,
            user_id: reservation.user_id.clone(),
            event_id: reservation.event_id.clone(),
            total_amount,
            created_at: reservation.created_at,
            expires_at: reservation.expires_at,
            items: reservation.ticket_quantities(),
        });
        reservation.record(RESERVATION_CREATED_EVENT_TYPE, kind, correlation_id, now);
        Ok(reservation)
    }

    /// Rebuilds a reservation from persisted state. No events are recorded.
    #[must_use]
    pub fn reconstitute(parts: ReservationParts) -> Self {
        Self {
            id: parts.id,
            user_id: parts.user_id,
            event_id: parts.event_id,
            items: parts.items,
            status: parts.status,
            created_at: parts.created_at,
            expires_at: parts.expires_at,
            confirmed_at: parts.confirmed_at,
            updated_at: parts.updated_at,
            version: parts.version,
            uncommitted_events: Vec::new(),
        }
    }

    /// Confirms payment, producing a `ReservationConfirmed` event.
    ///
    /// A pending reservation whose window has lapsed is expired instead: the
    /// aggregate moves to `Expired`, records a `ReservationExpired` event, and
    /// the call fails. Callers should still persist the aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidState` unless the reservation is pending,
    /// and `DomainError::Expired` if the payment window has lapsed.
    pub fn confirm(&mut self, correlation_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_pending("confirm")?;

        if self.is_expired(clock) {
            self.expire(correlation_id, clock)?;
            return Err(DomainError::Expired(self.id));
        }

        let now = clock.now();
        self.status = ReservationStatus::Confirmed;
        self.confirmed_at = Some(now);
        self.updated_at = now;

        let kind = ReservationEventKind::Confirmed(ReservationConfirmed {
            reservation_id: self.id,
            user_id: self.user_id.clone(),
            event_id: self.event_id.clone(),
            confirmed_at: now,
        });
        self.record(RESERVATION_CONFIRMED_EVENT_TYPE, kind, correlation_id, now);
        Ok(())
    }

    /// Expires a pending reservation, producing a `ReservationExpired` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidState` unless the reservation is pending.
    pub fn expire(&mut self, correlation_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_pending("expire")?;

        let now = clock.now();
        self.status = ReservationStatus::Expired;
        self.updated_at = now;

        let kind = ReservationEventKind::Expired(ReservationExpired {
            reservation_id: self.id,
            user_id: self.user_id.clone(),
            event_id: self.event_id.clone(),
            expired_at: now,
            items: self.ticket_quantities(),
        });
        self.record(RESERVATION_EXPIRED_EVENT_TYPE, kind, correlation_id, now);
        Ok(())
    }

    /// Cancels a pending or confirmed reservation, clearing any confirmation
    /// time. Records no event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidState` if the reservation is already
    /// expired or cancelled.
    pub fn cancel(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        if matches!(
            self.status,
            ReservationStatus::Expired | ReservationStatus::Cancelled
        ) {
            return Err(DomainError::InvalidState(format!(
                "cannot cancel reservation {} in status {}",
                self.id, self.status
            )));
        }
        self.status = ReservationStatus::Cancelled;
        self.confirmed_at = None;
        self.updated_at = clock.now();
        Ok(())
    }

    /// Returns `true` once the payment window has passed.
    #[must_use]
    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        clock.has_passed(self.expires_at)
    }

    /// Returns `true` if the reservation is pending and still payable.
    #[must_use]
    pub fn can_be_paid(&self, clock: &dyn Clock) -> bool {
        self.status == ReservationStatus::Pending && !self.is_expired(clock)
    }

    /// Returns the sum of item subtotals.
    #[must_use]
    pub fn total_amount(&self) -> i64 {
        checked_total(&self.items, ReservationItem::subtotal).unwrap_or(i64::MAX)
    }

    /// Returns the number of tickets held.
    #[must_use]
    pub fn total_tickets(&self) -> i64 {
        checked_total(&self.items, ReservationItem::quantity).unwrap_or(i64::MAX)
    }

    /// Returns the reservation identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the reserving user.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the event (show) identifier.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Returns the items, in order.
    #[must_use]
    pub fn items(&self) -> &[ReservationItem] {
        &self.items
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    /// Returns the creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the end of the payment window.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the confirmation time, if confirmed.
    #[must_use]
    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    /// Returns the time of the last transition.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn ensure_pending(&self, action: &str) -> Result<(), DomainError> {
        if self.status == ReservationStatus::Pending {
            Ok(())
        } else {
            Err(DomainError::InvalidState(format!(
                "cannot {action} reservation {} in status {}",
                self.id, self.status
            )))
        }
    }

    fn ticket_quantities(&self) -> Vec<TicketQuantity> {
        self.items.iter().map(ReservationItem::ticket_quantity).collect()
    }

    fn record(
        &mut self,
        event_type: &str,
        kind: ReservationEventKind,
        correlation_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) {
        self.uncommitted_events.push(ReservationEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: event_type.to_owned(),
                aggregate_id: self.id,
                correlation_id,
                causation_id: correlation_id,
                occurred_at,
            },
            kind,
        });
    }
}

impl AggregateRoot for Reservation {
    type Event = ReservationEvent;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }
}
