//! API server entry point.

use std::sync::Arc;

use api::InMemoryServices;
use api::config::{Config, LogFormat};
use checkout::{Cart, CartItem, CheckoutRecovery};
use common::Money;
use inventory::StaleReservationSweeper;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use store::{
    EventPublisher, InMemoryStore, NatsPublisher, NoopPublisher, OutboxRelay, OutboxStore,
    PostgresStore, ReservationStore, SagaLog,
};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn publisher(config: &Config) -> Arc<dyn EventPublisher> {
    let Some(url) = &config.nats_url else {
        tracing::info!("NATS_URL not set, outbox messages are dropped after delivery");
        return Arc::new(NoopPublisher);
    };
    match NatsPublisher::connect(url).await {
        Ok(publisher) => {
            tracing::info!(%url, "connected to NATS");
            Arc::new(publisher)
        }
        Err(e) => {
            tracing::warn!(%url, error = %e, "NATS unavailable, using no-op publisher");
            Arc::new(NoopPublisher)
        }
    }
}

/// Demo data for the in-memory catalog and cart service: 100 widgets and a
/// cart holding two.
async fn seed_demo_data(services: &InMemoryServices) {
    services.catalog.set_stock("demo-widget", None, 100).await;
    services
        .carts
        .insert_cart(Cart::new(
            "demo-cart",
            vec![CartItem::new("demo-widget", "Widget", 2, Money::from_cents(1000))],
            Money::zero(),
        ))
        .await;
    tracing::info!("seeded demo cart \"demo-cart\"");
}

async fn serve<S>(store: Arc<S>, config: Config, metrics_handle: PrometheusHandle)
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
{
    let (state, services) = api::create_state(store.clone(), &config);
    seed_demo_data(&services).await;

    // Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = vec![
        StaleReservationSweeper::new(store.clone())
            .spawn(config.sweep_interval(), shutdown_rx.clone()),
        OutboxRelay::new(store.clone(), publisher(&config).await)
            .spawn(config.outbox_interval(), shutdown_rx.clone()),
        CheckoutRecovery::new(
            state.orchestrator.ledger().clone(),
            Arc::new(services.orders.clone()),
            config.recovery_grace(),
        )
        .spawn(config.recovery_interval(), shutdown_rx),
    ];

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "background worker panicked");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let _ = dotenvy::dotenv();
    let config = Config::from_env().expect("invalid configuration");

    // 2. Initialize tracing
    init_tracing(&config);

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Pick the store and run
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to Postgres");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using Postgres store");
            serve(Arc::new(store), config, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            serve(Arc::new(InMemoryStore::new()), config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
