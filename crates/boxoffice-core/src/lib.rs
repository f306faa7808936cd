//! Box Office Core — shared domain abstractions.
//!
//! This crate defines the traits and types that the booking context and its
//! adapters depend on: aggregates, clock, commands, errors, domain events and
//! the message-bus port. It contains no infrastructure code.

pub mod aggregate;
pub mod bus;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
