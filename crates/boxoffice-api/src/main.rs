//! Box Office API server entry point.

use std::error::Error;
use std::sync::Arc;

use boxoffice_api::config::Config;
use boxoffice_api::error::AppError;
use boxoffice_api::state::AppState;
use boxoffice_booking::application::expiration_sweeper::ExpirationSweeper;
use boxoffice_booking::application::projection_consumer::{PROJECTION_QUEUE, ProjectionConsumer};
use boxoffice_booking::domain::events::{BOOKING_EVENTS_EXCHANGE, RESERVATION_EVENTS_BINDING};
use boxoffice_core::bus::MessageBus;
use boxoffice_core::clock::{Clock, SystemClock};
use boxoffice_core::error::DomainError;
use boxoffice_kafka::{KafkaBusConfig, KafkaMessageBus};
use boxoffice_messaging::{BusEventPublisher, InMemoryMessageBus};
use boxoffice_postgres::{PgReservationRepository, apply_schema};
use boxoffice_redis::RedisProjectionStore;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Box Office API server");

    let config = Config::from_env()?;
    let addr = config.bind_addr()?;

    // Write side.
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(AppError::Database)?;
    apply_schema(&pool).await.map_err(AppError::Infrastructure)?;

    // Read side and event transport.
    let projections = Arc::new(
        RedisProjectionStore::connect(&config.redis_url)
            .await
            .map_err(AppError::Infrastructure)?,
    );
    let bus = message_bus(config.kafka_brokers.as_deref()).map_err(AppError::Infrastructure)?;
    let publisher = Arc::new(BusEventPublisher::new(bus.clone(), BOOKING_EVENTS_EXCHANGE));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let reservations = Arc::new(PgReservationRepository::new(pool));

    // Background workers.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let consumer = tokio::spawn(
        ProjectionConsumer::new(projections.clone()).run(bus, shutdown_tx.subscribe()),
    );
    let sweeper = tokio::spawn(
        ExpirationSweeper::new(reservations.clone(), publisher.clone(), clock.clone())
            .with_interval(config.sweep_interval)
            .run(shutdown_tx.subscribe()),
    );

    let app_state = AppState::new(clock, reservations, publisher, projections);
    let app = boxoffice_api::build_router(app_state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(AppError::Server)?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::Server)?;

    tracing::info!("HTTP server stopped, stopping background workers");
    // No receivers left only means both workers already exited.
    let _ = shutdown_tx.send(());
    let (consumer_result, sweeper_result) = tokio::join!(consumer, sweeper);
    for (worker, result) in [
        ("projection consumer", consumer_result),
        ("expiration sweeper", sweeper_result),
    ] {
        if let Err(e) = result {
            tracing::error!(worker, error = %e, "background worker panicked");
        }
    }

    Ok(())
}

/// Picks the broker-backed bus when brokers are configured.
fn message_bus(kafka_brokers: Option<&str>) -> Result<Arc<dyn MessageBus>, DomainError> {
    if let Some(brokers) = kafka_brokers {
        return Ok(Arc::new(KafkaMessageBus::new(KafkaBusConfig::new(brokers))?));
    }
    tracing::warn!("KAFKA_BROKERS not set, using the in-process bus; events do not survive a restart");
    let bus = InMemoryMessageBus::new();
    // Bind the projection queue before anything can publish.
    bus.declare_queue(PROJECTION_QUEUE, BOOKING_EVENTS_EXCHANGE, RESERVATION_EVENTS_BINDING)?;
    Ok(Arc::new(bus))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
