//! `PostgreSQL` adapter for the reservation store.

pub mod pg_reservation_repository;
pub mod schema;

pub use pg_reservation_repository::PgReservationRepository;
pub use schema::apply_schema;
