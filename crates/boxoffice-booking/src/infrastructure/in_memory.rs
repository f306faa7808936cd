//! In-memory adapters for the reservation and projection ports.
//!
//! Both honour the same contracts as the Postgres and Redis adapters
//! (optimistic versioning, TTLs, newest-first user index) and back the unit,
//! lifecycle and HTTP tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use boxoffice_core::aggregate::AggregateRoot;
use boxoffice_core::clock::Clock;
use boxoffice_core::error::DomainError;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::aggregates::{Reservation, ReservationStatus};
use crate::domain::projection::{ProjectionStore, ReservationProjection};
use crate::domain::repository::ReservationRepository;

fn poisoned(what: &str) -> DomainError {
    DomainError::Infrastructure(format!("{what} lock poisoned"))
}

/// Reservation store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct InMemoryReservationRepository {
    rows: Mutex<HashMap<Uuid, Reservation>>,
}

impl InMemoryReservationRepository {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Reservation>>, DomainError> {
        self.rows.lock().map_err(|_| poisoned("reservation store"))
    }

    fn newest_first(mut reservations: Vec<Reservation>) -> Vec<Reservation> {
        reservations.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        reservations
    }
}

#[async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn save(&self, reservation: &Reservation) -> Result<(), DomainError> {
        let mut rows = self.rows()?;
        let expected = reservation.version();
        let actual = rows.get(&reservation.id()).map_or(0, Reservation::version);
        let exists = rows.contains_key(&reservation.id());

        if (expected == 0 && exists) || (expected > 0 && actual != expected) {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: reservation.id(),
                expected,
                actual: if exists { actual } else { -1 },
            });
        }

        let mut stored = reservation.clone();
        stored.clear_uncommitted_events();
        stored.version = expected + 1;
        rows.insert(stored.id(), stored);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Reservation>, DomainError> {
        Ok(self.rows()?.get(&id).cloned())
    }

    async fn find_by_user_and_status(
        &self,
        user_id: &str,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, DomainError> {
        let matching = self
            .rows()?
            .values()
            .filter(|r| r.user_id() == user_id && r.status() == status)
            .cloned()
            .collect();
        Ok(Self::newest_first(matching))
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Reservation>, DomainError> {
        let matching = self
            .rows()?
            .values()
            .filter(|r| r.user_id() == user_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(matching))
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, DomainError> {
        let mut overdue: Vec<(DateTime<Utc>, Uuid)> = self
            .rows()?
            .values()
            .filter(|r| r.status() == ReservationStatus::Pending && r.expires_at() < now)
            .map(|r| (r.expires_at(), r.id()))
            .collect();
        overdue.sort();
        Ok(overdue.into_iter().map(|(_, id)| id).collect())
    }
}

#[derive(Debug)]
struct StoredProjection {
    projection: ReservationProjection,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ProjectionState {
    projections: HashMap<Uuid, StoredProjection>,
    user_indexes: HashMap<String, HashMap<Uuid, i64>>,
}

/// Projection store backed by maps, with TTLs measured on an injected clock.
pub struct InMemoryProjectionStore {
    clock: Arc<dyn Clock>,
    state: Mutex<ProjectionState>,
}

impl InMemoryProjectionStore {
    /// Creates an empty store whose TTLs run on `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(ProjectionState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, ProjectionState>, DomainError> {
        self.state.lock().map_err(|_| poisoned("projection store"))
    }

    /// Returns the remaining time to live of a live projection.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store lock is poisoned.
    pub fn ttl(&self, reservation_id: Uuid) -> Result<Option<Duration>, DomainError> {
        let now = self.clock.now();
        Ok(self
            .state()?
            .projections
            .get(&reservation_id)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.expires_at - now))
    }
}

impl std::fmt::Debug for InMemoryProjectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProjectionStore")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn put(
        &self,
        projection: &ReservationProjection,
        ttl: Duration,
    ) -> Result<(), DomainError> {
        let expires_at = self.clock.now() + ttl;
        self.state()?.projections.insert(
            projection.id,
            StoredProjection {
                projection: projection.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<ReservationProjection>, DomainError> {
        let now = self.clock.now();
        let mut state = self.state()?;
        let lapsed = state
            .projections
            .get(&reservation_id)
            .is_some_and(|stored| stored.expires_at <= now);
        if lapsed {
            state.projections.remove(&reservation_id);
            return Ok(None);
        }
        Ok(state
            .projections
            .get(&reservation_id)
            .map(|stored| stored.projection.clone()))
    }

    async fn delete(&self, reservation_id: Uuid) -> Result<(), DomainError> {
        self.state()?.projections.remove(&reservation_id);
        Ok(())
    }

    async fn index_for_user(
        &self,
        user_id: &str,
        reservation_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.state()?
            .user_indexes
            .entry(user_id.to_owned())
            .or_default()
            .insert(reservation_id, created_at.timestamp_millis());
        Ok(())
    }

    async fn unindex_for_user(
        &self,
        user_id: &str,
        reservation_id: Uuid,
    ) -> Result<(), DomainError> {
        if let Some(index) = self.state()?.user_indexes.get_mut(user_id) {
            index.remove(&reservation_id);
        }
        Ok(())
    }

    async fn user_index(&self, user_id: &str) -> Result<Vec<Uuid>, DomainError> {
        let state = self.state()?;
        let Some(index) = state.user_indexes.get(user_id) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<(i64, Uuid)> = index.iter().map(|(id, score)| (*score, *id)).collect();
        entries.sort_by(|a, b| b.cmp(a));
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }
}
