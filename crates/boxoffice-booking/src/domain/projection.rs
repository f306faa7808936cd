//! Read-side projection of reservations and the port of the store holding it.
//!
//! Projections are written only by the projection consumer and read only by
//! the query handlers. They are rebuilt from events, so fields the events do
//! not carry (item names, prices) stay empty.

use async_trait::async_trait;
use boxoffice_core::error::DomainError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregates::ReservationStatus;
use super::events::{ReservationConfirmed, ReservationCreated};

/// Lifetime of a pending projection, in minutes.
pub const PENDING_PROJECTION_TTL_MINUTES: i64 = 15;

/// Lifetime of a confirmed projection, in days.
pub const CONFIRMED_PROJECTION_TTL_DAYS: i64 = 30;

/// Returns the TTL of a pending projection.
#[must_use]
pub fn pending_ttl() -> Duration {
    Duration::minutes(PENDING_PROJECTION_TTL_MINUTES)
}

/// Returns the TTL of a confirmed projection.
#[must_use]
pub fn confirmed_ttl() -> Duration {
    Duration::days(CONFIRMED_PROJECTION_TTL_DAYS)
}

/// A projected reservation line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedItem {
    /// Item identifier, unknown when built from events.
    pub id: Option<Uuid>,
    /// The ticket identifier.
    pub ticket_id: String,
    /// Ticket display name, unknown when built from events.
    pub ticket_name: Option<String>,
    /// Unit price, unknown when built from events.
    pub unit_price: Option<i64>,
    /// Number of tickets.
    pub quantity: i64,
    /// Line subtotal, unknown when built from events.
    pub subtotal: Option<i64>,
}

/// Denormalized reservation as served by the query side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationProjection {
    /// The reservation identifier.
    pub id: Uuid,
    /// The reserving user.
    pub user_id: String,
    /// The event (show) identifier.
    pub event_id: String,
    /// Projected status.
    pub status: ReservationStatus,
    /// Total amount in minor currency units.
    pub total_amount: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// End of the payment window.
    pub expires_at: DateTime<Utc>,
    /// Confirmation time, once confirmed.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Projected items.
    pub items: Vec<ProjectedItem>,
}

impl ReservationProjection {
    /// Builds a pending projection from a `ReservationCreated` event.
    #[must_use]
    pub fn from_created(event: &ReservationCreated) -> Self {
        Self {
            id: event.reservation_id,
            user_id: event.user_id.clone(),
            event_id: event.event_id.clone(),
            status: ReservationStatus::Pending,
            total_amount: event.total_amount,
            created_at: event.created_at,
            expires_at: event.expires_at,
            confirmed_at: None,
            items: event
                .items
                .iter()
                .map(|item| ProjectedItem {
                    id: None,
                    ticket_id: item.ticket_id.clone(),
                    ticket_name: None,
                    unit_price: None,
                    quantity: item.quantity,
                    subtotal: None,
                })
                .collect(),
        }
    }

    /// Marks the projection confirmed.
    pub fn apply_confirmed(&mut self, event: &ReservationConfirmed) {
        self.status = ReservationStatus::Confirmed;
        self.confirmed_at = Some(event.confirmed_at);
    }
}

/// Key/value store of projections plus a per-user index.
///
/// The user index is ordered by reservation creation time and may reference
/// projections that have since been deleted or have lapsed.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Writes (replaces) a projection with a time to live.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on store failure.
    async fn put(&self, projection: &ReservationProjection, ttl: Duration)
    -> Result<(), DomainError>;

    /// Reads a projection.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on store failure or if the
    /// stored value cannot be decoded.
    async fn get(&self, reservation_id: Uuid)
    -> Result<Option<ReservationProjection>, DomainError>;

    /// Deletes a projection; deleting a missing one is not an error.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on store failure.
    async fn delete(&self, reservation_id: Uuid) -> Result<(), DomainError>;

    /// Adds a reservation to the user's index, scored by `created_at`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on store failure.
    async fn index_for_user(
        &self,
        user_id: &str,
        reservation_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    /// Removes a reservation from the user's index.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on store failure.
    async fn unindex_for_user(&self, user_id: &str, reservation_id: Uuid)
    -> Result<(), DomainError>;

    /// Returns the reservation IDs in the user's index, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on store failure.
    async fn user_index(&self, user_id: &str) -> Result<Vec<Uuid>, DomainError>;

    /// Checks that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store does not answer.
    async fn ping(&self) -> Result<(), DomainError> {
        Ok(())
    }
}
