//! Reservation store database schema.

use boxoffice_core::error::DomainError;
use sqlx::PgPool;

/// SQL to create the reservation tables.
pub const CREATE_RESERVATION_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS reservations (
    id           UUID PRIMARY KEY,
    user_id      VARCHAR(255) NOT NULL,
    event_id     VARCHAR(255) NOT NULL,
    status       VARCHAR(16) NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL,
    expires_at   TIMESTAMPTZ NOT NULL,
    confirmed_at TIMESTAMPTZ,
    updated_at   TIMESTAMPTZ NOT NULL,
    version      BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reservations_user_status
    ON reservations (user_id, status, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_reservations_pending_expiry
    ON reservations (expires_at) WHERE status = 'PENDING';

CREATE TABLE IF NOT EXISTS reservation_items (
    id             UUID PRIMARY KEY,
    reservation_id UUID NOT NULL REFERENCES reservations (id) ON DELETE CASCADE,
    position       INTEGER NOT NULL,
    ticket_id      VARCHAR(255) NOT NULL,
    ticket_name    VARCHAR(255) NOT NULL,
    unit_price     BIGINT NOT NULL CHECK (unit_price >= 0),
    quantity       BIGINT NOT NULL CHECK (quantity > 0),
    UNIQUE (reservation_id, position)
);
";

/// Creates the reservation tables if they do not exist yet.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if any statement fails.
pub async fn apply_schema(pool: &PgPool) -> Result<(), DomainError> {
    sqlx::raw_sql(CREATE_RESERVATION_TABLES)
        .execute(pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("failed to apply schema: {e}")))?;
    tracing::info!("reservation schema applied");
    Ok(())
}
