pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use axum::{body::Body, http::Request, routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::cache::CacheService;
use crate::config::{Config, ConfigError, LogFormat};
use crate::services::booking::BookingService;
use crate::services::notifier::Notifier;
use crate::services::payment::PaymentProvider;
use crate::services::pricing::PricingPolicy;
use crate::services::reconciliation::PaymentReconciler;
use crate::services::scheduling::SchedulingService;
use crate::services::webhook::WebhookVerifier;
use crate::store::Store;

// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub cache: CacheService,
    pub bookings: BookingService,
    pub scheduling: SchedulingService,
    pub reconciler: PaymentReconciler,
}

impl AppState {
    /// Wires the services over the given collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        cache: CacheService,
        payments: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>, ConfigError> {
        let venue_offset = config.booking.venue_offset()?;

        let bookings = BookingService::new(
            store.clone(),
            payments,
            PricingPolicy::new(venue_offset),
            config.payment.currency.clone(),
        );
        let scheduling = SchedulingService::new(store.clone(), venue_offset);
        let reconciler = PaymentReconciler::new(
            store.clone(),
            WebhookVerifier::new(
                config.payment.webhook_secret.clone(),
                config.payment.webhook_tolerance_seconds,
            ),
            notifier,
            venue_offset,
        );

        Ok(Arc::new(Self {
            config,
            store,
            cache,
            bookings,
            scheduling,
            reconciler,
        }))
    }
}

/// The full HTTP application: health checks at the root, the API under `/api`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Cinema Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                request_id = %Uuid::new_v4(),
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
        .layer(CorsLayer::permissive())
}

pub fn init_tracing(config: &config::AppConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(&config.rust_log)
        .unwrap_or_else(|_| EnvFilter::new("cinema_booking=debug,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
