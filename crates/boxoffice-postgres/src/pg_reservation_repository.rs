//! `PostgreSQL` implementation of the `ReservationRepository` trait.
//!
//! A reservation is one `reservations` row plus ordered `reservation_items`
//! rows. Items never change after creation, so only inserts write them.
//! Updates are guarded by the version column.

use std::collections::HashMap;

use async_trait::async_trait;
use boxoffice_booking::domain::aggregates::{
    Reservation, ReservationItem, ReservationParts, ReservationStatus,
};
use boxoffice_booking::domain::repository::ReservationRepository;
use boxoffice_core::aggregate::AggregateRoot;
use boxoffice_core::error::DomainError;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

const SELECT_RESERVATION_COLUMNS: &str = "SELECT id, user_id, event_id, status, created_at, \
     expires_at, confirmed_at, updated_at, version FROM reservations";

fn db_error(e: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error: {e}"))
}

fn corrupt_row(e: &DomainError) -> DomainError {
    DomainError::Infrastructure(format!("corrupt reservation row: {e}"))
}

/// PostgreSQL-backed reservation store.
#[derive(Debug, Clone)]
pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    /// Creates a new `PgReservationRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        reservation: &Reservation,
    ) -> Result<u64, DomainError> {
        let inserted = sqlx::query(
            "INSERT INTO reservations (id, user_id, event_id, status, created_at, expires_at, \
             confirmed_at, updated_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(reservation.id())
        .bind(reservation.user_id())
        .bind(reservation.event_id())
        .bind(reservation.status().as_str())
        .bind(reservation.created_at())
        .bind(reservation.expires_at())
        .bind(reservation.confirmed_at())
        .bind(reservation.updated_at())
        .execute(&mut **tx)
        .await
        .map_err(db_error)?
        .rows_affected();

        if inserted == 0 {
            return Ok(0);
        }

        for (position, item) in reservation.items().iter().enumerate() {
            let position = i32::try_from(position).map_err(|_| {
                DomainError::Validation(format!(
                    "reservation {} has too many items",
                    reservation.id()
                ))
            })?;
            sqlx::query(
                "INSERT INTO reservation_items (id, reservation_id, position, ticket_id, \
                 ticket_name, unit_price, quantity) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(item.id())
            .bind(reservation.id())
            .bind(position)
            .bind(item.ticket_id())
            .bind(item.ticket_name())
            .bind(item.unit_price())
            .bind(item.quantity())
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;
        }
        Ok(inserted)
    }

    async fn update(
        tx: &mut Transaction<'_, Postgres>,
        reservation: &Reservation,
    ) -> Result<u64, DomainError> {
        let expected = reservation.version();
        let updated = sqlx::query(
            "UPDATE reservations \
             SET status = $2, confirmed_at = $3, updated_at = $4, version = $5 \
             WHERE id = $1 AND version = $6",
        )
        .bind(reservation.id())
        .bind(reservation.status().as_str())
        .bind(reservation.confirmed_at())
        .bind(reservation.updated_at())
        .bind(expected + 1)
        .bind(expected)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?
        .rows_affected();
        Ok(updated)
    }

    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<i64, DomainError> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error)?;
        Ok(version.unwrap_or(-1))
    }

    /// Attaches items to header rows, preserving the row order.
    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Reservation>, DomainError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;

        let item_rows = sqlx::query(
            "SELECT id, reservation_id, ticket_id, ticket_name, unit_price, quantity \
             FROM reservation_items WHERE reservation_id = ANY($1) \
             ORDER BY reservation_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut items_by_reservation: HashMap<Uuid, Vec<ReservationItem>> = HashMap::new();
        for row in &item_rows {
            let reservation_id: Uuid = row.try_get("reservation_id").map_err(db_error)?;
            let item = ReservationItem::new(
                row.try_get("id").map_err(db_error)?,
                row.try_get::<String, _>("ticket_id").map_err(db_error)?,
                row.try_get::<String, _>("ticket_name").map_err(db_error)?,
                row.try_get("unit_price").map_err(db_error)?,
                row.try_get("quantity").map_err(db_error)?,
            )
            .map_err(|e| corrupt_row(&e))?;
            items_by_reservation
                .entry(reservation_id)
                .or_default()
                .push(item);
        }

        rows.iter()
            .map(|row| -> Result<Reservation, DomainError> {
                let id: Uuid = row.try_get("id").map_err(db_error)?;
                let status: String = row.try_get("status").map_err(db_error)?;
                Ok(Reservation::reconstitute(ReservationParts {
                    id,
                    user_id: row.try_get("user_id").map_err(db_error)?,
                    event_id: row.try_get("event_id").map_err(db_error)?,
                    items: items_by_reservation.remove(&id).unwrap_or_default(),
                    status: status
                        .parse::<ReservationStatus>()
                        .map_err(|e| corrupt_row(&e))?,
                    created_at: row.try_get("created_at").map_err(db_error)?,
                    expires_at: row.try_get("expires_at").map_err(db_error)?,
                    confirmed_at: row.try_get("confirmed_at").map_err(db_error)?,
                    updated_at: row.try_get("updated_at").map_err(db_error)?,
                    version: row.try_get("version").map_err(db_error)?,
                }))
            })
            .collect()
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn save(&self, reservation: &Reservation) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let expected = reservation.version();

        let affected = if expected == 0 {
            Self::insert(&mut tx, reservation).await?
        } else {
            Self::update(&mut tx, reservation).await?
        };

        if affected == 0 {
            let actual = Self::current_version(&mut tx, reservation.id()).await?;
            tx.rollback().await.map_err(db_error)?;
            tracing::debug!(
                reservation_id = %reservation.id(),
                expected,
                actual,
                "optimistic version check failed"
            );
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: reservation.id(),
                expected,
                actual,
            });
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Reservation>, DomainError> {
        let row = sqlx::query(&format!("{SELECT_RESERVATION_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.hydrate(vec![row]).await?.pop())
    }

    async fn find_by_user_and_status(
        &self,
        user_id: &str,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, DomainError> {
        let rows = sqlx::query(&format!(
            "{SELECT_RESERVATION_COLUMNS} WHERE user_id = $1 AND status = $2 \
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        self.hydrate(rows).await
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Reservation>, DomainError> {
        let rows = sqlx::query(&format!(
            "{SELECT_RESERVATION_COLUMNS} WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        self.hydrate(rows).await
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, DomainError> {
        sqlx::query_scalar(
            "SELECT id FROM reservations \
             WHERE status = 'PENDING' AND expires_at < $1 \
             ORDER BY expires_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn ping(&self) -> Result<(), DomainError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
