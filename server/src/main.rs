//! Boxoffice HTTP server.
//!
//! Wires the reservation and payment coordinators to either in-memory or
//! durable (Redis + `PostgreSQL`) storage, warms the hold store up from the
//! ledger, runs the expiry sweeper, and serves the HTTP API until ctrl-c or
//! SIGTERM.

mod config;
mod provider;

use anyhow::Context;
use boxoffice_core::environment::{Clock, SystemClock};
use boxoffice_core::{
    HoldStore, InventoryLedger, PaymentIntentStore, PaymentProvider, ReservationRepository,
};
use boxoffice_postgres::{PostgresLedger, PostgresPaymentIntentStore, PostgresReservationRepository};
use boxoffice_redis::RedisHoldStore;
use boxoffice_runtime::metrics::MetricsServer;
use boxoffice_runtime::{ExpirySweeper, PaymentCoordinator, ReservationCoordinator};
use boxoffice_testing::{
    InMemoryHoldStore, InMemoryLedger, InMemoryPaymentIntentStore, InMemoryReservationRepository,
};
use boxoffice_web::{AppState, build_router};
use config::{Config, StorageBackend, StorageConfig};
use provider::{HttpPaymentProvider, LoggingPaymentProvider};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Storage handles for one backend.
struct Stores {
    hold_store: Arc<dyn HoldStore>,
    ledger: Arc<dyn InventoryLedger>,
    repository: Arc<dyn ReservationRepository>,
    intents: Arc<dyn PaymentIntentStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,boxoffice=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting boxoffice server");

    let config = Config::from_env()?;
    info!(
        backend = ?config.storage.backend,
        hold_ttl_secs = config.reservation.hold_ttl.as_secs(),
        max_quantity = config.reservation.max_quantity,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.server.metrics_address()?);
    metrics.start().context("starting metrics exporter")?;

    let stores = connect(&config.storage).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let reservations = ReservationCoordinator::new(
        stores.hold_store,
        stores.ledger,
        stores.repository,
        clock.clone(),
        config.reservation.clone(),
    );

    let provider: Arc<dyn PaymentProvider> = match &config.payments.provider_url {
        Some(url) => {
            info!(url = %url, "Using HTTP payment provider");
            Arc::new(HttpPaymentProvider::new(url.clone(), config.payments.provider_timeout)?)
        }
        None => {
            warn!("PAYMENT_PROVIDER_URL not set; payments are only logged");
            Arc::new(LoggingPaymentProvider)
        }
    };
    let payments = PaymentCoordinator::new(stores.intents, provider, reservations.clone(), clock);

    // Hold store capacities are rebuilt from the ledger before any traffic.
    let pools = reservations
        .reconcile()
        .await
        .context("warming up the hold store from the ledger")?;
    info!(pools, "Hold store warmed up");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweeper = ExpirySweeper::new(reservations.clone()).spawn(shutdown_tx.subscribe());

    let app = build_router(AppState::new(reservations, payments));
    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(address = %addr, "HTTP server listening");

    let mut drain = shutdown_tx.subscribe();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = drain.recv().await;
            })
            .await
    });

    tokio::select! {
        () = shutdown_signal() => {}
        result = &mut server => {
            let _ = shutdown_tx.send(());
            result.context("HTTP server task panicked")??;
            anyhow::bail!("HTTP server stopped unexpectedly");
        }
    }

    let _ = shutdown_tx.send(());
    let timeout = config.server.shutdown_timeout;
    match tokio::time::timeout(timeout, async { (server.await, sweeper.await) }).await {
        Ok((server, sweeper)) => {
            match server {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "HTTP server exited with error"),
                Err(e) => error!(error = %e, "HTTP server task failed"),
            }
            if let Err(e) = sweeper {
                error!(error = %e, "Expiry sweeper task failed");
            }
            info!("Shutdown complete");
        }
        Err(_) => warn!(
            timeout_secs = timeout.as_secs(),
            "Shutdown timed out; abandoning in-flight work"
        ),
    }

    Ok(())
}

/// Build the stores for the configured backend.
async fn connect(config: &StorageConfig) -> anyhow::Result<Stores> {
    match config.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; all state is lost on restart");
            Ok(Stores {
                hold_store: Arc::new(InMemoryHoldStore::new()),
                ledger: Arc::new(InMemoryLedger::new()),
                repository: Arc::new(InMemoryReservationRepository::new()),
                intents: Arc::new(InMemoryPaymentIntentStore::new()),
            })
        }
        StorageBackend::Durable => {
            info!("Connecting to PostgreSQL...");
            let pool =
                boxoffice_postgres::connect(&config.database_url, config.database_max_connections)
                    .await
                    .context("connecting to PostgreSQL")?;
            boxoffice_postgres::migrate(&pool)
                .await
                .context("running migrations")?;
            info!("PostgreSQL connected and migrated");

            info!("Connecting to Redis...");
            let hold_store = RedisHoldStore::new(&config.redis_url)
                .await
                .context("connecting to Redis")?;
            info!("Redis connected");

            Ok(Stores {
                hold_store: Arc::new(hold_store),
                ledger: Arc::new(PostgresLedger::new(pool.clone())),
                repository: Arc::new(PostgresReservationRepository::new(pool.clone())),
                intents: Arc::new(PostgresPaymentIntentStore::new(pool)),
            })
        }
    }
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received ctrl-c, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
