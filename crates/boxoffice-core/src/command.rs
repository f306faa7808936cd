//! Commands issued on behalf of an authenticated caller.

use uuid::Uuid;

/// A request to change state.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// Stable name used in logs, e.g. `booking.confirm_reservation`.
    fn command_type(&self) -> &'static str;

    /// Correlation ID carried into every event the command produces.
    fn correlation_id(&self) -> Uuid;

    /// The caller the command acts for.
    fn issued_by(&self) -> &str;
}
