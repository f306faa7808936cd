//! Redis implementation of the `ProjectionStore` trait.
//!
//! Layout:
//! - `reservation:{id}` holds the projection as JSON, with a TTL
//! - `user:{user_id}:reservations` is a sorted set of reservation IDs scored
//!   by creation time in epoch milliseconds. Each write refreshes its TTL to
//!   the confirmed projection TTL and drops entries whose projections have
//!   lapsed for certain.

use async_trait::async_trait;
use boxoffice_booking::domain::aggregates::expiration_window;
use boxoffice_booking::domain::projection::{ProjectionStore, ReservationProjection, confirmed_ttl};
use boxoffice_core::error::DomainError;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use uuid::Uuid;

fn redis_error(context: &str, e: &redis::RedisError) -> DomainError {
    DomainError::Infrastructure(format!("{context}: {e}"))
}

/// Redis key of a single projection.
#[must_use]
pub fn reservation_key(reservation_id: Uuid) -> String {
    format!("reservation:{reservation_id}")
}

/// Redis key of a user's reservation index.
#[must_use]
pub fn user_reservations_key(user_id: &str) -> String {
    format!("user:{user_id}:reservations")
}

/// Converts a TTL to whole seconds for `SET EX`, never below one second.
fn ttl_seconds(ttl: Duration) -> u64 {
    u64::try_from(ttl.num_seconds()).unwrap_or(0).max(1)
}

/// TTL of a user index, in seconds, refreshed on every write.
fn user_index_ttl_seconds() -> i64 {
    confirmed_ttl().num_seconds()
}

/// Highest index score that is certainly stale when indexing a reservation
/// created at `created_at`.
///
/// A reservation is confirmed within the expiration window of its creation
/// and its projection lives for the confirmed TTL after that, so anything
/// created more than both before `created_at` has lapsed.
fn stale_index_cutoff(created_at: DateTime<Utc>) -> i64 {
    (created_at - confirmed_ttl() - expiration_window()).timestamp_millis()
}

/// Encodes a projection as stored in Redis.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if serialization fails.
pub fn encode_projection(projection: &ReservationProjection) -> Result<String, DomainError> {
    serde_json::to_string(projection).map_err(|e| {
        DomainError::Infrastructure(format!(
            "failed to encode projection {}: {e}",
            projection.id
        ))
    })
}

/// Decodes a projection read from Redis.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the stored JSON is malformed.
pub fn decode_projection(
    reservation_id: Uuid,
    json: &str,
) -> Result<ReservationProjection, DomainError> {
    serde_json::from_str(json).map_err(|e| {
        DomainError::Infrastructure(format!(
            "failed to decode projection {reservation_id}: {e}"
        ))
    })
}

/// Projection store backed by Redis.
#[derive(Clone)]
pub struct RedisProjectionStore {
    conn_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisProjectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisProjectionStore").finish_non_exhaustive()
    }
}

impl RedisProjectionStore {
    /// Connects to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the URL is invalid or the
    /// connection cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self, DomainError> {
        let client = Client::open(redis_url)
            .map_err(|e| redis_error("failed to create Redis client", &e))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| redis_error("failed to connect to Redis", &e))?;
        Ok(Self { conn_manager })
    }

}

#[async_trait]
impl ProjectionStore for RedisProjectionStore {
    async fn put(
        &self,
        projection: &ReservationProjection,
        ttl: Duration,
    ) -> Result<(), DomainError> {
        let mut conn = self.conn_manager.clone();
        let json = encode_projection(projection)?;
        let seconds = ttl_seconds(ttl);
        let _: () = conn
            .set_ex(reservation_key(projection.id), json, seconds)
            .await
            .map_err(|e| redis_error("failed to write projection", &e))?;
        tracing::debug!(
            reservation_id = %projection.id,
            status = %projection.status,
            ttl_seconds = seconds,
            "projection written"
        );
        Ok(())
    }

    async fn get(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<ReservationProjection>, DomainError> {
        let mut conn = self.conn_manager.clone();
        let json: Option<String> = conn
            .get(reservation_key(reservation_id))
            .await
            .map_err(|e| redis_error("failed to read projection", &e))?;
        json.map(|json| decode_projection(reservation_id, &json))
            .transpose()
    }

    async fn delete(&self, reservation_id: Uuid) -> Result<(), DomainError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(reservation_key(reservation_id))
            .await
            .map_err(|e| redis_error("failed to delete projection", &e))?;
        Ok(())
    }

    async fn index_for_user(
        &self,
        user_id: &str,
        reservation_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut conn = self.conn_manager.clone();
        let key = user_reservations_key(user_id);
        let _: () = redis::pipe()
            .atomic()
            .zadd(&key, reservation_id.to_string(), created_at.timestamp_millis())
            .ignore()
            .zrembyscore(&key, "-inf", stale_index_cutoff(created_at))
            .ignore()
            .expire(&key, user_index_ttl_seconds())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("failed to index reservation", &e))?;
        Ok(())
    }

    async fn unindex_for_user(
        &self,
        user_id: &str,
        reservation_id: Uuid,
    ) -> Result<(), DomainError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .zrem(user_reservations_key(user_id), reservation_id.to_string())
            .await
            .map_err(|e| redis_error("failed to unindex reservation", &e))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), DomainError> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("Redis ping failed", &e))?;
        Ok(())
    }

    async fn user_index(&self, user_id: &str) -> Result<Vec<Uuid>, DomainError> {
        let mut conn = self.conn_manager.clone();
        let members: Vec<String> = conn
            .zrevrange(user_reservations_key(user_id), 0, -1)
            .await
            .map_err(|e| redis_error("failed to read user index", &e))?;
        Ok(members
            .into_iter()
            .filter_map(|member| match member.parse::<Uuid>() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(user_id, member, error = %e, "ignoring malformed index entry");
                    None
                }
            })
            .collect())
    }
}
