//! Periodic sweep that expires pending reservations whose payment window has
//! passed.
//!
//! Each candidate is reloaded fresh before the transition so that a
//! reservation confirmed since the query is left alone. Failures are isolated
//! per reservation and never abort a batch.

use std::sync::Arc;
use std::time::Duration;

use boxoffice_core::clock::Clock;
use boxoffice_core::error::DomainError;
use boxoffice_core::event::EventPublisher;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::command_handlers::persist_and_publish;
use crate::domain::aggregates::ReservationStatus;
use crate::domain::repository::ReservationRepository;

/// Default period between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations expired by this sweep.
    pub expired: usize,
    /// Candidates that were no longer pending (or were changed concurrently).
    pub skipped: usize,
    /// Candidates that failed with an infrastructure error.
    pub failed: usize,
}

enum ItemOutcome {
    Expired,
    Skipped,
}

/// Expires overdue pending reservations on a fixed period.
pub struct ExpirationSweeper {
    repo: Arc<dyn ReservationRepository>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ExpirationSweeper {
    /// Creates a sweeper running every [`DEFAULT_SWEEP_INTERVAL`].
    #[must_use]
    pub fn new(
        repo: Arc<dyn ReservationRepository>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            publisher,
            clock,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Sets the period between sweeps.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one sweep.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` only if the candidate query
    /// fails; per-reservation failures are logged and counted instead.
    pub async fn run_once(&self) -> Result<SweepReport, DomainError> {
        let now = self.clock.now();
        let candidates = self.repo.find_expired_pending(now).await?;
        let mut report = SweepReport::default();

        for reservation_id in candidates {
            match self.expire_one(reservation_id).await {
                Ok(ItemOutcome::Expired) => report.expired += 1,
                Ok(ItemOutcome::Skipped) => report.skipped += 1,
                Err(DomainError::ConcurrencyConflict { .. } | DomainError::InvalidState(_)) => {
                    tracing::debug!(
                        reservation_id = %reservation_id,
                        "reservation changed during sweep, skipping"
                    );
                    report.skipped += 1;
                }
                Err(error) => {
                    tracing::error!(
                        reservation_id = %reservation_id,
                        error = %error,
                        "failed to expire reservation"
                    );
                    report.failed += 1;
                }
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "expiration sweep finished"
            );
        }
        Ok(report)
    }

    async fn expire_one(&self, reservation_id: Uuid) -> Result<ItemOutcome, DomainError> {
        let Some(mut reservation) = self.repo.find_by_id(reservation_id).await? else {
            return Ok(ItemOutcome::Skipped);
        };
        if reservation.status() != ReservationStatus::Pending
            || !reservation.is_expired(self.clock.as_ref())
        {
            return Ok(ItemOutcome::Skipped);
        }

        reservation.expire(Uuid::new_v4(), self.clock.as_ref())?;
        persist_and_publish(&mut reservation, self.repo.as_ref(), self.publisher.as_ref()).await?;

        tracing::info!(
            reservation_id = %reservation_id,
            user_id = %reservation.user_id(),
            "reservation expired"
        );
        Ok(ItemOutcome::Expired)
    }

    /// Sweeps every `interval` until a shutdown signal arrives. The first
    /// sweep runs immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "expiration sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    if let Err(error) = self.run_once().await {
                        tracing::error!(error = %error, "expiration sweep failed");
                    }
                }
            }
        }

        tracing::info!("expiration sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use boxoffice_core::aggregate::AggregateRoot;
    use boxoffice_test_support::{FailingEventPublisher, ManualClock, RecordingEventPublisher};
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::domain::aggregates::{Reservation, ReservationItem};
    use crate::domain::events::RESERVATION_EXPIRED_EVENT_TYPE;
    use crate::infrastructure::in_memory::InMemoryReservationRepository;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    async fn seed(repo: &dyn ReservationRepository, clock: &dyn Clock) -> Reservation {
        let item = ReservationItem::new(Uuid::new_v4(), "ticket-ga", "General", 1000, 1).unwrap();
        let mut reservation =
            Reservation::create("user-1", "concert-7", vec![item], Uuid::new_v4(), clock).unwrap();
        repo.save(&reservation).await.unwrap();
        reservation.clear_uncommitted_events();
        reservation
    }

    /// Reports every stored reservation as a candidate but fails to load one.
    struct FlakyRepository {
        inner: InMemoryReservationRepository,
        broken: Uuid,
    }

    #[async_trait]
    impl ReservationRepository for FlakyRepository {
        async fn save(&self, reservation: &Reservation) -> Result<(), DomainError> {
            self.inner.save(reservation).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Reservation>, DomainError> {
            if id == self.broken {
                return Err(DomainError::Infrastructure("connection reset".into()));
            }
            self.inner.find_by_id(id).await
        }

        async fn find_by_user_and_status(
            &self,
            user_id: &str,
            status: ReservationStatus,
        ) -> Result<Vec<Reservation>, DomainError> {
            self.inner.find_by_user_and_status(user_id, status).await
        }

        async fn find_by_user(&self, user_id: &str) -> Result<Vec<Reservation>, DomainError> {
            self.inner.find_by_user(user_id).await
        }

        async fn find_expired_pending(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<Uuid>, DomainError> {
            self.inner.find_expired_pending(now).await
        }
    }

    #[tokio::test]
    async fn test_run_once_expires_overdue_and_publishes() {
        // Arrange
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let repo = Arc::new(InMemoryReservationRepository::new());
        let publisher = Arc::new(RecordingEventPublisher::new());
        let overdue = seed(repo.as_ref(), clock.as_ref()).await;
        clock.advance(chrono::Duration::minutes(5));
        let fresh = seed(repo.as_ref(), clock.as_ref()).await;
        clock.advance(chrono::Duration::minutes(6));
        let sweeper = ExpirationSweeper::new(repo.clone(), publisher.clone(), clock.clone());

        // Act
        let report = sweeper.run_once().await.unwrap();

        // Assert
        assert_eq!(
            report,
            SweepReport {
                expired: 1,
                skipped: 0,
                failed: 0
            }
        );
        let expired = repo.find_by_id(overdue.id()).await.unwrap().unwrap();
        assert_eq!(expired.status(), ReservationStatus::Expired);
        let untouched = repo.find_by_id(fresh.id()).await.unwrap().unwrap();
        assert_eq!(untouched.status(), ReservationStatus::Pending);

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, RESERVATION_EXPIRED_EVENT_TYPE);
        assert_eq!(published[0].metadata.aggregate_id, overdue.id());
    }

    #[tokio::test]
    async fn test_run_once_is_a_no_op_when_nothing_is_due() {
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let repo = Arc::new(InMemoryReservationRepository::new());
        let publisher = Arc::new(RecordingEventPublisher::new());
        seed(repo.as_ref(), clock.as_ref()).await;
        let sweeper = ExpirationSweeper::new(repo, publisher.clone(), clock);

        let report = sweeper.run_once().await.unwrap();

        assert_eq!(report, SweepReport::default());
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_run_once_isolates_per_item_failures() {
        // Arrange
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let inner = InMemoryReservationRepository::new();
        let broken = seed(&inner, clock.as_ref()).await;
        let healthy = seed(&inner, clock.as_ref()).await;
        let repo = Arc::new(FlakyRepository {
            inner,
            broken: broken.id(),
        });
        clock.advance(chrono::Duration::minutes(11));
        let sweeper = ExpirationSweeper::new(
            repo.clone(),
            Arc::new(RecordingEventPublisher::new()),
            clock,
        );

        // Act
        let report = sweeper.run_once().await.unwrap();

        // Assert
        assert_eq!(report.expired, 1);
        assert_eq!(report.failed, 1);
        let expired = repo.find_by_id(healthy.id()).await.unwrap().unwrap();
        assert_eq!(expired.status(), ReservationStatus::Expired);
    }

    #[tokio::test]
    async fn test_run_once_expires_even_when_publish_fails() {
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let repo = Arc::new(InMemoryReservationRepository::new());
        let reservation = seed(repo.as_ref(), clock.as_ref()).await;
        clock.advance(chrono::Duration::minutes(11));
        let sweeper = ExpirationSweeper::new(repo.clone(), Arc::new(FailingEventPublisher), clock);

        let report = sweeper.run_once().await.unwrap();

        assert_eq!(report.expired, 1);
        let stored = repo.find_by_id(reservation.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), ReservationStatus::Expired);
    }

    #[tokio::test]
    async fn test_second_sweep_finds_nothing_left() {
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let repo = Arc::new(InMemoryReservationRepository::new());
        seed(repo.as_ref(), clock.as_ref()).await;
        clock.advance(chrono::Duration::minutes(11));
        let sweeper =
            ExpirationSweeper::new(repo, Arc::new(RecordingEventPublisher::new()), clock);

        sweeper.run_once().await.unwrap();
        let second = sweeper.run_once().await.unwrap();

        assert_eq!(second, SweepReport::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        // Arrange
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let sweeper = ExpirationSweeper::new(
            Arc::new(InMemoryReservationRepository::new()),
            Arc::new(RecordingEventPublisher::new()),
            clock,
        )
        .with_interval(Duration::from_millis(10));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(sweeper.run(shutdown_rx));

        // Act
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();

        // Assert
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
