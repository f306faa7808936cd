//! Write-side storage port for reservations.

use async_trait::async_trait;
use boxoffice_core::error::DomainError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::aggregates::{Reservation, ReservationStatus};

/// Durable store of reservation aggregates.
///
/// Saves are optimistic: `save` succeeds only if the stored version still
/// equals `reservation.version()`, and then stores `version + 1`. A version
/// of 0 means the reservation has never been saved.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Inserts or updates a reservation with all its items atomically.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if another writer saved the
    /// reservation first, or `DomainError::Infrastructure` on storage failure.
    async fn save(&self, reservation: &Reservation) -> Result<(), DomainError>;

    /// Loads a reservation by ID.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on storage failure.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Reservation>, DomainError>;

    /// Lists a user's reservations in the given status, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on storage failure.
    async fn find_by_user_and_status(
        &self,
        user_id: &str,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, DomainError>;

    /// Lists all of a user's reservations, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on storage failure.
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Reservation>, DomainError>;

    /// Returns the IDs of pending reservations whose window ended before
    /// `now`, oldest deadline first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on storage failure.
    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, DomainError>;

    /// Checks that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store does not answer.
    async fn ping(&self) -> Result<(), DomainError> {
        Ok(())
    }
}
