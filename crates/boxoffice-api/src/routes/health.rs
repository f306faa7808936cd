//! Health check endpoints.
//!
//! `/health` answers as long as the process serves HTTP; `/health/ready`
//! also pings the reservation and projection stores.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Readiness response, with one entry per backing store.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// `ready` when every store answered, else `unavailable`.
    pub status: &'static str,
    /// Write-side store status.
    pub reservations: &'static str,
    /// Read-side store status.
    pub projections: &'static str,
}

fn check_status<E: std::fmt::Display>(store: &str, result: Result<(), E>) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(store, error = %e, "readiness check failed");
            "unavailable"
        }
    }
}

/// GET /health
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /health/ready
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let (reservations, projections) =
        tokio::join!(state.reservations.ping(), state.projections.ping());
    let reservations = check_status("reservations", reservations);
    let projections = check_status("projections", projections);

    let ready = reservations == "ok" && projections == "ok";
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "unavailable" },
            reservations,
            projections,
        }),
    )
}

/// Returns the health check router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}
