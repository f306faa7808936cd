//! Command handlers for the booking context.
//!
//! Each handler loads or builds the aggregate, applies the transition,
//! persists it, and only then publishes the recorded events. Publishing is
//! best effort: a failure is logged and the command still succeeds.

use boxoffice_core::aggregate::AggregateRoot;
use boxoffice_core::clock::Clock;
use boxoffice_core::command::Command;
use boxoffice_core::error::DomainError;
use boxoffice_core::event::{DomainEvent, EventPublisher};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::aggregates::{Reservation, ReservationItem, ReservationStatus};
use crate::domain::commands::{ConfirmReservation, CreateReservation};
use crate::domain::repository::ReservationRepository;

/// Result of a successfully created reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReservationResult {
    /// The new reservation's identifier.
    pub reservation_id: Uuid,
    /// End of the payment window.
    pub expires_at: DateTime<Utc>,
    /// Total amount in minor currency units.
    pub total_amount: i64,
}

/// Result of a successfully confirmed reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmReservationResult {
    /// The confirmed reservation's identifier.
    pub reservation_id: Uuid,
    /// Confirmation time.
    pub confirmed_at: DateTime<Utc>,
}

/// Publishes the aggregate's recorded events, then clears them.
///
/// Failures are logged at `warn` and swallowed: the state change is already
/// durable and the projection catches up on the next event.
pub(crate) async fn publish_recorded(reservation: &mut Reservation, publisher: &dyn EventPublisher) {
    for event in reservation.uncommitted_events() {
        if let Err(error) = publisher.publish(event).await {
            tracing::warn!(
                reservation_id = %reservation.id(),
                event_type = event.event_type(),
                event_id = %event.metadata().event_id,
                error = %error,
                "failed to publish event"
            );
        }
    }
    reservation.clear_uncommitted_events();
}

/// Saves the aggregate, then publishes what it recorded.
pub(crate) async fn persist_and_publish(
    reservation: &mut Reservation,
    repo: &dyn ReservationRepository,
    publisher: &dyn EventPublisher,
) -> Result<(), DomainError> {
    repo.save(reservation).await?;
    publish_recorded(reservation, publisher).await;
    Ok(())
}

/// Handles the `CreateReservation` command: validates the items, creates a
/// pending reservation, persists it and publishes `reservation.created`.
///
/// # Errors
///
/// Returns `DomainError::Validation` for bad input and
/// `DomainError::Infrastructure` if the store fails.
pub async fn handle_create_reservation(
    command: &CreateReservation,
    clock: &dyn Clock,
    repo: &dyn ReservationRepository,
    publisher: &dyn EventPublisher,
) -> Result<CreateReservationResult, DomainError> {
    let items = command
        .items
        .iter()
        .map(|item| {
            ReservationItem::new(
                Uuid::new_v4(),
                item.ticket_id.clone(),
                item.ticket_name.clone(),
                item.unit_price,
                item.quantity,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut reservation = Reservation::create(
        command.user_id.clone(),
        command.event_id.clone(),
        items,
        command.correlation_id(),
        clock,
    )?;

    persist_and_publish(&mut reservation, repo, publisher).await?;

    tracing::info!(
        command = command.command_type(),
        correlation_id = %command.correlation_id(),
        reservation_id = %reservation.id(),
        user_id = command.issued_by(),
        total_amount = reservation.total_amount(),
        "reservation created"
    );

    Ok(CreateReservationResult {
        reservation_id: reservation.id(),
        expires_at: reservation.expires_at(),
        total_amount: reservation.total_amount(),
    })
}

/// Handles the `ConfirmReservation` command.
///
/// A reservation found past its window is expired on the spot: the expiry is
/// persisted and published before `Expired` is returned. One that is already
/// expired (e.g. by the sweeper) also yields `Expired`. If another writer
/// (typically the sweeper) saved first, the reservation is reloaded once and
/// the decision is made again against the fresh state.
///
/// # Errors
///
/// - `DomainError::AggregateNotFound` if the reservation does not exist.
/// - `DomainError::Forbidden` if the caller does not own it.
/// - `DomainError::InvalidState` if it is confirmed or cancelled.
/// - `DomainError::Expired` if the payment window has lapsed.
/// - `DomainError::ConcurrencyConflict` if it is modified again during the retry.
pub async fn handle_confirm_reservation(
    command: &ConfirmReservation,
    clock: &dyn Clock,
    repo: &dyn ReservationRepository,
    publisher: &dyn EventPublisher,
) -> Result<ConfirmReservationResult, DomainError> {
    let reservation = load_owned(command, repo).await?;
    if reservation.status() == ReservationStatus::Expired {
        return Err(DomainError::Expired(reservation.id()));
    }

    match try_confirm(reservation, command, clock, repo, publisher).await {
        Err(DomainError::ConcurrencyConflict { .. }) => {
            tracing::info!(
                reservation_id = %command.reservation_id,
                correlation_id = %command.correlation_id(),
                "reservation changed concurrently, reloading"
            );
            let reloaded = load_owned(command, repo).await?;
            match reloaded.status() {
                ReservationStatus::Pending => {
                    try_confirm(reloaded, command, clock, repo, publisher).await
                }
                ReservationStatus::Expired => Err(DomainError::Expired(reloaded.id())),
                other => Err(DomainError::InvalidState(format!(
                    "cannot confirm reservation {} in status {other}",
                    reloaded.id()
                ))),
            }
        }
        outcome => outcome,
    }
}

async fn load_owned(
    command: &ConfirmReservation,
    repo: &dyn ReservationRepository,
) -> Result<Reservation, DomainError> {
    let reservation = repo
        .find_by_id(command.reservation_id)
        .await?
        .ok_or(DomainError::AggregateNotFound(command.reservation_id))?;
    if reservation.user_id() != command.user_id {
        return Err(DomainError::Forbidden(command.reservation_id));
    }
    Ok(reservation)
}

async fn try_confirm(
    mut reservation: Reservation,
    command: &ConfirmReservation,
    clock: &dyn Clock,
    repo: &dyn ReservationRepository,
    publisher: &dyn EventPublisher,
) -> Result<ConfirmReservationResult, DomainError> {
    match reservation.confirm(command.correlation_id(), clock) {
        Ok(()) => {
            persist_and_publish(&mut reservation, repo, publisher).await?;
            let confirmed_at = reservation.confirmed_at().unwrap_or_else(|| clock.now());
            tracing::info!(
                command = command.command_type(),
                correlation_id = %command.correlation_id(),
                reservation_id = %reservation.id(),
                user_id = command.issued_by(),
                "reservation confirmed"
            );
            Ok(ConfirmReservationResult {
                reservation_id: reservation.id(),
                confirmed_at,
            })
        }
        Err(DomainError::Expired(id)) => {
            persist_and_publish(&mut reservation, repo, publisher).await?;
            tracing::info!(
                correlation_id = %command.correlation_id(),
                reservation_id = %id,
                "confirmation arrived after the payment window; reservation expired"
            );
            Err(DomainError::Expired(id))
        }
        Err(other) => Err(other),
    }
}
