//! Commands for the booking context.

use boxoffice_core::command::Command;
use uuid::Uuid;

/// One requested line of a new reservation.
#[derive(Debug, Clone)]
pub struct RequestedItem {
    /// The ticket identifier.
    pub ticket_id: String,
    /// The ticket display name.
    pub ticket_name: String,
    /// Unit price in minor currency units.
    pub unit_price: i64,
    /// Number of tickets.
    pub quantity: i64,
}

/// Command to create a reservation.
#[derive(Debug, Clone)]
pub struct CreateReservation {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The authenticated caller.
    pub user_id: String,
    /// The event (show) to reserve tickets for.
    pub event_id: String,
    /// Requested items.
    pub items: Vec<RequestedItem>,
}

impl Command for CreateReservation {
    fn command_type(&self) -> &'static str {
        "booking.create_reservation"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn issued_by(&self) -> &str {
        &self.user_id
    }
}

/// Command to confirm (pay for) a reservation.
#[derive(Debug, Clone)]
pub struct ConfirmReservation {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The reservation to confirm.
    pub reservation_id: Uuid,
    /// The authenticated caller; must own the reservation.
    pub user_id: String,
}

impl Command for ConfirmReservation {
    fn command_type(&self) -> &'static str {
        "booking.confirm_reservation"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn issued_by(&self) -> &str {
        &self.user_id
    }
}
