//! Application services of the booking context.

pub mod command_handlers;
pub mod expiration_sweeper;
pub mod projection_consumer;
pub mod query_handlers;
