//! HTTP API server for the checkout service.
//!
//! Provides REST endpoints for checkouts and raw inventory reservations,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{
    CheckoutCollaborators, CheckoutOrchestrator, FlatRateShipping, InMemoryCartService,
    InMemoryOrderService,
};
use common::Money;
use inventory::{InMemoryCatalog, LedgerConfig, ProductCatalog, ReservationLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{OutboxStore, ReservationStore, SagaLog};
use tax::{
    HttpSettingsSource, HttpTaxProvider, SettingsSource, StaticSettingsSource, TaxCalculator,
    TaxProvider, UnconfiguredTaxProvider,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S, C>
where
    S: ReservationStore + OutboxStore + SagaLog,
    C: ProductCatalog,
{
    pub orchestrator: CheckoutOrchestrator<S, C>,
}

/// The in-memory collaborators behind a default state.
///
/// There are no networked cart, catalog or order services; these stand in
/// for them and let callers seed data.
#[derive(Clone, Default)]
pub struct InMemoryServices {
    pub catalog: InMemoryCatalog,
    pub carts: InMemoryCartService,
    pub orders: InMemoryOrderService,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, C>(state: Arc<AppState<S, C>>, metrics_handle: PrometheusHandle) -> Router
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
    C: ProductCatalog + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::create::<S, C>))
        .route("/checkout/{id}", get(routes::checkout::get::<S, C>))
        .route(
            "/checkout/{id}/confirm-payment",
            post(routes::checkout::confirm_payment::<S, C>),
        )
        .route("/inventory/reserve", post(routes::inventory::reserve::<S, C>))
        .route(
            "/inventory/reserve/{id}",
            axum::routing::delete(routes::inventory::cancel::<S, C>),
        )
        .route(
            "/inventory/reserve/{id}/confirm",
            post(routes::inventory::confirm::<S, C>),
        )
        .route(
            "/inventory/{id}/availability",
            get(routes::inventory::availability::<S, C>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Tax provider named by the configuration.
///
/// A client that cannot be built leaves the provider unconfigured, so tax
/// falls back to the manual path.
pub fn tax_provider(config: &Config) -> Arc<dyn TaxProvider> {
    let Some(url) = &config.tax_provider_url else {
        return Arc::new(UnconfiguredTaxProvider);
    };
    match HttpTaxProvider::new(
        url.clone(),
        config.tax_provider_api_key.clone(),
        config.tax_http_timeout(),
    ) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build tax provider client");
            Arc::new(UnconfiguredTaxProvider)
        }
    }
}

/// Settings source named by the configuration.
///
/// Falls back to the static defaults when the client cannot be built.
pub fn settings_source(config: &Config) -> Arc<dyn SettingsSource> {
    let Some(url) = &config.settings_url else {
        return Arc::new(StaticSettingsSource::default());
    };
    match HttpSettingsSource::new(url.clone(), config.tax_http_timeout()) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build settings client");
            Arc::new(StaticSettingsSource::default())
        }
    }
}

/// Creates application state over `store`, with in-memory cart, catalog and
/// order services.
pub fn create_state<S>(
    store: Arc<S>,
    config: &Config,
) -> (Arc<AppState<S, InMemoryCatalog>>, InMemoryServices)
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
{
    let services = InMemoryServices::default();

    let ledger = ReservationLedger::new(
        store,
        Arc::new(services.catalog.clone()),
        LedgerConfig::with_ttl_secs(config.reservation_ttl_secs),
    );
    let shipping_cents = i64::try_from(config.flat_shipping_cents)
        .unwrap_or(checkout::services::shipping::DEFAULT_FLAT_SHIPPING_CENTS);
    let collaborators = CheckoutCollaborators {
        carts: Arc::new(services.carts.clone()),
        orders: Arc::new(services.orders.clone()),
        settings: settings_source(config),
        tax: TaxCalculator::new(tax_provider(config)),
        shipping: FlatRateShipping::new(Money::from_cents(shipping_cents)),
    };

    let state = Arc::new(AppState {
        orchestrator: CheckoutOrchestrator::new(ledger, collaborators),
    });
    (state, services)
}

/// Creates the default application state with in-memory collaborators.
pub fn create_default_state<S>(store: Arc<S>) -> (Arc<AppState<S, InMemoryCatalog>>, InMemoryServices)
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
{
    create_state(store, &Config::default())
}
