//! Auctionhouse API server entry point.

use std::sync::Arc;

use auctionhouse_api::config::AppConfig;
use auctionhouse_api::error::AppError;
use auctionhouse_api::state::AppState;
use auctionhouse_api::{app, telemetry};
use auctionhouse_auction::domain::aggregates::Auction;
use auctionhouse_bus::DurableBus;
use auctionhouse_core::bus::MessageBus;
use auctionhouse_core::clock::{Clock, SystemClock};
use auctionhouse_core::projection::ProjectionStore;
use auctionhouse_core::rng::SystemRng;
use auctionhouse_outbox::OutboxDispatcher;
use auctionhouse_search::application::projector::{SEARCH_SUBSCRIPTION, SearchProjector};
use auctionhouse_search::domain::events::SUBSCRIBED_EVENT_TYPES;
use auctionhouse_search::domain::items::{SEARCH_PROJECTION, SearchItem};
use auctionhouse_store::pg_aggregate_store::PgAggregateStore;
use auctionhouse_store::pg_delivery_repository::PgDeliveryRepository;
use auctionhouse_store::pg_outbox_repository::PgOutboxRepository;
use auctionhouse_store::pg_projection_store::PgProjectionStore;
use auctionhouse_store::schema::MIGRATOR;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info, warn};

async fn connect(url: &str, max_connections: u32) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let telemetry = telemetry::init(config.otlp_endpoint.as_deref())?;

    info!("Starting Auctionhouse API server");

    // The auction service owns the aggregates and the outbox; the search
    // service owns its projection and the bus its delivery log. Each may live
    // in another database.
    let pool = connect(&config.database_url, config.db_max_connections).await?;
    let search_pool = if config.search_database_url == config.database_url {
        pool.clone()
    } else {
        connect(&config.search_database_url, config.db_max_connections).await?
    };
    let bus_pool = if config.bus_database_url == config.database_url {
        pool.clone()
    } else {
        connect(&config.bus_database_url, config.db_max_connections).await?
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let search_store: Arc<dyn ProjectionStore<SearchItem>> =
        Arc::new(PgProjectionStore::new(search_pool, SEARCH_PROJECTION));

    let bus = Arc::new(DurableBus::new(
        Arc::new(PgDeliveryRepository::new(bus_pool)),
        Arc::clone(&clock),
        Box::new(SystemRng::new()),
        config.bus_config(),
    ));
    bus.subscribe(
        SEARCH_SUBSCRIPTION,
        SUBSCRIBED_EVENT_TYPES,
        Arc::new(SearchProjector::new(Arc::clone(&search_store))),
    )
    .await?;

    let dispatcher = Arc::new(OutboxDispatcher::new(
        Arc::new(PgOutboxRepository::new(pool.clone())),
        bus.clone(),
        Arc::clone(&clock),
        Box::new(SystemRng::new()),
        config.dispatcher_config(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_task = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.run(shutdown_rx).await }
    });

    let app_state = AppState::new(
        clock,
        Arc::new(PgAggregateStore::<Auction>::new(pool)),
        search_store,
    );

    let addr = config.socket_addr()?;
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Committed records that were not dispatched yet and deliveries not yet
    // acknowledged stay pending and are picked up on the next start.
    if shutdown_tx.send(true).is_err() {
        warn!("outbox dispatcher already stopped");
    }
    if let Err(e) = dispatcher_task.await {
        error!(error = %e, "outbox dispatcher task failed");
    }
    bus.close().await;

    info!("Auctionhouse API server stopped");
    telemetry.shutdown();
    Ok(())
}
