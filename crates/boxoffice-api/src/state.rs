//! Shared application state.

use std::sync::Arc;

use boxoffice_booking::domain::projection::ProjectionStore;
use boxoffice_booking::domain::repository::ReservationRepository;
use boxoffice_core::clock::Clock;
use boxoffice_core::event::EventPublisher;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Clock for time-bound rules.
    pub clock: Arc<dyn Clock>,
    /// Write-side reservation store.
    pub reservations: Arc<dyn ReservationRepository>,
    /// Publisher of reservation events.
    pub publisher: Arc<dyn EventPublisher>,
    /// Read-side projection store.
    pub projections: Arc<dyn ProjectionStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        reservations: Arc<dyn ReservationRepository>,
        publisher: Arc<dyn EventPublisher>,
        projections: Arc<dyn ProjectionStore>,
    ) -> Self {
        Self {
            clock,
            reservations,
            publisher,
            projections,
        }
    }
}
