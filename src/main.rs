use anyhow::Context;
use chrono::Duration as ChronoDuration;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use cinema_booking::{
    app,
    cache::CacheService,
    config::Config,
    database::Database,
    init_tracing,
    redis_client::RedisClient,
    services::cleanup::CleanupService,
    services::notifier::{LogNotifier, Notifier, SmtpNotifier},
    services::payment::StripeClient,
    store::PgStore,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.app);

    info!(environment = %config.app.environment, "Starting Cinema Booking API");

    // Connect to the database
    let db = Database::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    db.run_migrations().await.context("failed to run migrations")?;

    // Redis is optional, the seat map is served uncached without it
    let cache = match config.redis.url.as_deref() {
        Some(url) => match RedisClient::connect(url).await {
            Ok(redis) => CacheService::new(redis, config.redis.seat_map_ttl_seconds),
            Err(e) => {
                warn!("Redis unavailable, seat map cache disabled: {}", e);
                CacheService::disabled()
            }
        },
        None => CacheService::disabled(),
    };

    let payments = StripeClient::from_config(&config.payment, &config.circuit_breaker)
        .context("failed to build payment client")?;

    let notifier: Arc<dyn Notifier> = match config.email.smtp_host.clone() {
        Some(host) => {
            info!(smtp_host = %host, "Ticket emails go through SMTP");
            Arc::new(SmtpNotifier::new(&config.email, host))
        }
        None => {
            warn!("SMTP_HOST not set, ticket emails are only logged");
            Arc::new(LogNotifier)
        }
    };

    let state = AppState::new(
        config.clone(),
        Arc::new(PgStore::new(db.pool.clone())),
        cache.clone(),
        Arc::new(payments),
        notifier,
    )?;

    // --- Background tasks ---

    let cleanup = CleanupService::new(
        state.bookings.clone(),
        cache,
        ChronoDuration::minutes(config.booking.pending_ttl_minutes),
    );
    tokio::spawn(cleanup.run(Duration::from_secs(config.booking.cleanup_interval_seconds.max(1))));

    // --- Web server ---

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
