//! Query handlers for the booking context.
//!
//! Queries read only the projection store and never touch the write side,
//! so results lag commands by the time it takes the consumer to catch up.

use boxoffice_core::error::DomainError;
use uuid::Uuid;

use crate::domain::aggregates::ReservationStatus;
use crate::domain::projection::{ProjectionStore, ReservationProjection};

/// Retrieves one reservation on behalf of `user_id`.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no projection exists,
/// `DomainError::Forbidden` if it belongs to another user, and
/// `DomainError::Infrastructure` on store failure.
pub async fn get_reservation(
    reservation_id: Uuid,
    user_id: &str,
    store: &dyn ProjectionStore,
) -> Result<ReservationProjection, DomainError> {
    let projection = store
        .get(reservation_id)
        .await?
        .ok_or(DomainError::AggregateNotFound(reservation_id))?;
    if projection.user_id != user_id {
        return Err(DomainError::Forbidden(reservation_id));
    }
    Ok(projection)
}

/// Lists the user's confirmed reservations, newest first.
///
/// Index entries whose projection is gone, or is not confirmed, are skipped.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` on store failure.
pub async fn get_user_reservations(
    user_id: &str,
    store: &dyn ProjectionStore,
) -> Result<Vec<ReservationProjection>, DomainError> {
    let mut reservations = Vec::new();
    for reservation_id in store.user_index(user_id).await? {
        match store.get(reservation_id).await? {
            Some(projection) if projection.status == ReservationStatus::Confirmed => {
                reservations.push(projection);
            }
            Some(_) | None => {
                tracing::debug!(
                    user_id,
                    reservation_id = %reservation_id,
                    "skipping stale user index entry"
                );
            }
        }
    }
    Ok(reservations)
}
