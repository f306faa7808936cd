//! Routes for the booking context.
//!
//! Commands go to the write side; reads are served from projections only, so
//! a freshly created reservation may briefly answer 404.

use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use boxoffice_booking::application::{command_handlers, query_handlers};
use boxoffice_booking::domain::commands;
use boxoffice_booking::domain::projection::ReservationProjection;

use crate::error::{ApiError, Unauthenticated};
use crate::state::AppState;

/// Header carrying the authenticated caller's user ID.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Unauthenticated;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(value.to_owned()))
            .ok_or(Unauthenticated)
    }
}

/// One ticket line of a create request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSelection {
    /// The ticket identifier.
    pub ticket_id: String,
    /// The ticket display name.
    pub ticket_name: String,
    /// Unit price in minor currency units.
    pub unit_price: i64,
    /// Number of tickets.
    pub quantity: i64,
}

/// Request body for POST /.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    /// The event (show) to reserve for.
    pub event_id: String,
    /// Selected tickets.
    pub tickets: Vec<TicketSelection>,
}

/// Response body for a created reservation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationResponse {
    /// The new reservation's identifier.
    pub reservation_id: Uuid,
    /// End of the payment window.
    pub expires_at: DateTime<Utc>,
    /// Total amount in minor currency units.
    pub total_amount: i64,
}

/// POST /
#[instrument(skip(state, user, request), fields(user_id = %user.0, event_id = %request.event_id))]
async fn create_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<CreateReservationResponse>), ApiError> {
    let command = commands::CreateReservation {
        correlation_id: Uuid::new_v4(),
        user_id: user.0,
        event_id: request.event_id,
        items: request
            .tickets
            .into_iter()
            .map(|ticket| commands::RequestedItem {
                ticket_id: ticket.ticket_id,
                ticket_name: ticket.ticket_name,
                unit_price: ticket.unit_price,
                quantity: ticket.quantity,
            })
            .collect(),
    };

    info!(correlation_id = %command.correlation_id, "handling create_reservation command");

    let result = command_handlers::handle_create_reservation(
        &command,
        state.clock.as_ref(),
        state.reservations.as_ref(),
        state.publisher.as_ref(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateReservationResponse {
            reservation_id: result.reservation_id,
            expires_at: result.expires_at,
            total_amount: result.total_amount,
        }),
    ))
}

/// POST /{id}/confirm
#[instrument(skip(state, user), fields(user_id = %user.0))]
async fn confirm_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reservation_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let command = commands::ConfirmReservation {
        correlation_id: Uuid::new_v4(),
        reservation_id,
        user_id: user.0,
    };

    info!(correlation_id = %command.correlation_id, "handling confirm_reservation command");

    command_handlers::handle_confirm_reservation(
        &command,
        state.clock.as_ref(),
        state.reservations.as_ref(),
        state.publisher.as_ref(),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /
#[instrument(skip(state, user), fields(user_id = %user.0))]
async fn list_reservations(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<ReservationProjection>>, ApiError> {
    let reservations =
        query_handlers::get_user_reservations(&user.0, state.projections.as_ref()).await?;
    Ok(Json(reservations))
}

/// GET /{id}
#[instrument(skip(state, user), fields(user_id = %user.0))]
async fn get_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ReservationProjection>, ApiError> {
    let reservation =
        query_handlers::get_reservation(reservation_id, &user.0, state.projections.as_ref())
            .await?;
    Ok(Json(reservation))
}

/// Returns the router for the booking context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_reservation).get(list_reservations))
        .route("/{id}", get(get_reservation))
        .route("/{id}/confirm", post(confirm_reservation))
}
