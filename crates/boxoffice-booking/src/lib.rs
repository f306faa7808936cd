//! Box Office — reservation lifecycle bounded context.
//!
//! Responsible for creating, confirming and expiring ticket reservations,
//! publishing the resulting domain events, and keeping the read-side
//! projections in sync with them.

pub mod application;
pub mod domain;
#[cfg(any(test, feature = "in-memory"))]
pub mod infrastructure;
