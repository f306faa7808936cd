//! In-process adapters for the booking ports, built for tests and behind the
//! `in-memory` feature.

pub mod in_memory;
