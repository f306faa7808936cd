//! Domain model of the booking context.

pub mod aggregates;
pub mod commands;
pub mod events;
pub mod projection;
pub mod repository;
